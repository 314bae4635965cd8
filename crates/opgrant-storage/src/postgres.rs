//! PostgreSQL storage implementation.
//!
//! Table references are schema-qualified strings resolved once at store
//! construction; queries are built with `sqlx::QueryBuilder` and runtime
//! binds.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};

use opgrant_domain::{EntityId, GrantMatch, OperationCode, TargetType};

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    validate_target, AccessStore, OpSetRow, OperationRow, RoleRow, TargetFilter, TargetRow,
};

/// PostgreSQL configuration options.
#[derive(Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Schema holding the auth tables.
    pub schema: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    pub min_connections: u32,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
}

// Hide credentials in database_url.
impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("database_url", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/opgrant".to_string(),
            schema: "opgrant".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
        }
    }
}

/// Schema-qualified table references, resolved once at startup.
#[derive(Debug, Clone)]
struct Tables {
    op_set: String,
    operation: String,
    op_attrs: String,
    op_target: String,
    op_target_attrs: String,
    role: String,
    id_seq: String,
}

impl Tables {
    fn new(schema: &str) -> Self {
        Self {
            op_set: format!("{schema}.auth_operation_set"),
            operation: format!("{schema}.auth_operation"),
            op_attrs: format!("{schema}.auth_op_attrs"),
            op_target: format!("{schema}.auth_op_target"),
            op_target_attrs: format!("{schema}.auth_op_target_attrs"),
            role: format!("{schema}.auth_role"),
            id_seq: format!("{schema}.auth_id_seq"),
        }
    }
}

/// The DDL for the auth tables, for deploy tooling and test harnesses.
pub fn schema_sql(schema: &str) -> String {
    format!(
        r#"
CREATE SCHEMA IF NOT EXISTS {schema};

CREATE SEQUENCE IF NOT EXISTS {schema}.auth_id_seq;

CREATE TABLE IF NOT EXISTS {schema}.auth_operation_set (
    op_set_id BIGINT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS {schema}.auth_operation (
    op_id BIGINT PRIMARY KEY,
    op_set_id BIGINT NOT NULL,
    op_code INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS auth_operation_set_idx
    ON {schema}.auth_operation (op_set_id);

CREATE TABLE IF NOT EXISTS {schema}.auth_op_attrs (
    op_id BIGINT NOT NULL,
    attr TEXT NOT NULL,
    PRIMARY KEY (op_id, attr)
);

CREATE TABLE IF NOT EXISTS {schema}.auth_op_target (
    op_target_id BIGINT PRIMARY KEY,
    entity_id BIGINT,
    target_type INTEGER NOT NULL,
    has_attr BOOLEAN NOT NULL DEFAULT FALSE
);
CREATE INDEX IF NOT EXISTS auth_op_target_entity_idx
    ON {schema}.auth_op_target (entity_id, target_type);

CREATE TABLE IF NOT EXISTS {schema}.auth_op_target_attrs (
    op_target_id BIGINT NOT NULL,
    attr TEXT NOT NULL,
    PRIMARY KEY (op_target_id, attr)
);

CREATE TABLE IF NOT EXISTS {schema}.auth_role (
    entity_id BIGINT NOT NULL,
    op_set_id BIGINT NOT NULL,
    op_target_id BIGINT NOT NULL,
    PRIMARY KEY (entity_id, op_set_id, op_target_id)
);
CREATE INDEX IF NOT EXISTS auth_role_target_idx
    ON {schema}.auth_role (op_target_id);
"#
    )
}

fn db_err(e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            StorageError::ConnectionError {
                message: e.to_string(),
            }
        }
        other => StorageError::QueryError {
            message: other.to_string(),
        },
    }
}

fn decode_op_code(code: i32) -> StorageResult<OperationCode> {
    OperationCode::from_code(code).ok_or(StorageError::UnknownOperationCode { code })
}

fn decode_target_type(code: i32) -> StorageResult<TargetType> {
    TargetType::from_code(code).ok_or(StorageError::UnknownTargetType { code })
}

/// PostgreSQL implementation of [`AccessStore`].
#[derive(Debug)]
pub struct PostgresAccessStore {
    pool: PgPool,
    tables: Tables,
}

impl PostgresAccessStore {
    /// Connects a pool and resolves the table references.
    pub async fn connect(config: &PostgresConfig) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(db_err)?;
        Ok(Self::with_pool(pool, &config.schema))
    }

    /// Wraps an existing pool (tests, shared pools).
    pub fn with_pool(pool: PgPool, schema: &str) -> Self {
        Self {
            pool,
            tables: Tables::new(schema),
        }
    }

    /// Applies the DDL from [`schema_sql`].
    pub async fn migrate(&self, schema: &str) -> StorageResult<()> {
        sqlx::raw_sql(&schema_sql(schema))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        debug!(schema, "auth schema ensured");
        Ok(())
    }

    async fn next_id(&self) -> StorageResult<EntityId> {
        let row = sqlx::query(&format!("SELECT nextval('{}') AS id", self.tables.id_seq))
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.get::<i64, _>("id"))
    }

    fn decode_target_row(&self, row: &sqlx::postgres::PgRow) -> StorageResult<TargetRow> {
        Ok(TargetRow {
            op_target_id: row.get("op_target_id"),
            entity_id: row.get("entity_id"),
            target_type: decode_target_type(row.get("target_type"))?,
            has_attr: row.get("has_attr"),
        })
    }

    /// Shared body of the role listings.
    async fn list_roles_in(
        &self,
        column: &str,
        ids: &[EntityId],
    ) -> StorageResult<Vec<RoleRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT DISTINCT entity_id, op_set_id, op_target_id FROM {} WHERE {column} IN (",
            self.tables.role
        ));
        {
            let mut sep = qb.separated(", ");
            for id in ids {
                sep.push_bind(*id);
            }
        }
        qb.push(") ORDER BY entity_id, op_set_id, op_target_id");
        let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|row| RoleRow {
                entity_id: row.get("entity_id"),
                op_set_id: row.get("op_set_id"),
                op_target_id: row.get("op_target_id"),
            })
            .collect())
    }
}

#[async_trait]
impl AccessStore for PostgresAccessStore {
    async fn get_op_set(&self, op_set_id: EntityId) -> StorageResult<OpSetRow> {
        let row = sqlx::query(&format!(
            "SELECT op_set_id, name FROM {} WHERE op_set_id = $1",
            self.tables.op_set
        ))
        .bind(op_set_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(StorageError::OpSetNotFound { op_set_id })?;
        Ok(OpSetRow {
            op_set_id: row.get("op_set_id"),
            name: row.get("name"),
        })
    }

    async fn get_op_set_by_name(&self, name: &str) -> StorageResult<OpSetRow> {
        let row = sqlx::query(&format!(
            "SELECT op_set_id, name FROM {} WHERE name = $1",
            self.tables.op_set
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StorageError::OpSetNameNotFound {
            name: name.to_string(),
        })?;
        Ok(OpSetRow {
            op_set_id: row.get("op_set_id"),
            name: row.get("name"),
        })
    }

    #[instrument(skip(self))]
    async fn insert_op_set(&self, name: &str) -> StorageResult<EntityId> {
        let op_set_id = self.next_id().await?;
        sqlx::query(&format!(
            "INSERT INTO {} (op_set_id, name) VALUES ($1, $2)",
            self.tables.op_set
        ))
        .bind(op_set_id)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(op_set_id)
    }

    async fn update_op_set(&self, op_set_id: EntityId, name: &str) -> StorageResult<()> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET name = $2 WHERE op_set_id = $1",
            self.tables.op_set
        ))
        .bind(op_set_id)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::OpSetNotFound { op_set_id });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_op_set(&self, op_set_id: EntityId) -> StorageResult<()> {
        let refs = sqlx::query(&format!(
            "SELECT COUNT(*) AS n FROM {} WHERE op_set_id = $1",
            self.tables.role
        ))
        .bind(op_set_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        let role_count: i64 = refs.get("n");
        if role_count > 0 {
            return Err(StorageError::StillReferenced {
                kind: "operation set",
                id: op_set_id,
                role_count: role_count as usize,
            });
        }

        sqlx::query(&format!(
            "DELETE FROM {} WHERE op_id IN (SELECT op_id FROM {} WHERE op_set_id = $1)",
            self.tables.op_attrs, self.tables.operation
        ))
        .bind(op_set_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        sqlx::query(&format!(
            "DELETE FROM {} WHERE op_set_id = $1",
            self.tables.operation
        ))
        .bind(op_set_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE op_set_id = $1",
            self.tables.op_set
        ))
        .bind(op_set_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::OpSetNotFound { op_set_id });
        }
        Ok(())
    }

    async fn list_op_sets(&self) -> StorageResult<Vec<OpSetRow>> {
        let rows = sqlx::query(&format!(
            "SELECT op_set_id, name FROM {} ORDER BY op_set_id",
            self.tables.op_set
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|row| OpSetRow {
                op_set_id: row.get("op_set_id"),
                name: row.get("name"),
            })
            .collect())
    }

    async fn add_operation(
        &self,
        op_set_id: EntityId,
        op_code: OperationCode,
    ) -> StorageResult<EntityId> {
        // Verify the set exists; auth_operation carries no FK.
        self.get_op_set(op_set_id).await?;
        let op_id = self.next_id().await?;
        sqlx::query(&format!(
            "INSERT INTO {} (op_id, op_set_id, op_code) VALUES ($1, $2, $3)",
            self.tables.operation
        ))
        .bind(op_id)
        .bind(op_set_id)
        .bind(op_code.code())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(op_id)
    }

    async fn remove_operation(
        &self,
        op_set_id: EntityId,
        op_code: OperationCode,
    ) -> StorageResult<()> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE op_id IN \
             (SELECT op_id FROM {} WHERE op_set_id = $1 AND op_code = $2)",
            self.tables.op_attrs, self.tables.operation
        ))
        .bind(op_set_id)
        .bind(op_code.code())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        sqlx::query(&format!(
            "DELETE FROM {} WHERE op_set_id = $1 AND op_code = $2",
            self.tables.operation
        ))
        .bind(op_set_id)
        .bind(op_code.code())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_operations(&self, op_set_id: EntityId) -> StorageResult<Vec<OperationRow>> {
        let rows = sqlx::query(&format!(
            "SELECT op_id, op_set_id, op_code FROM {} WHERE op_set_id = $1 ORDER BY op_id",
            self.tables.operation
        ))
        .bind(op_set_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter()
            .map(|row| {
                Ok(OperationRow {
                    op_id: row.get("op_id"),
                    op_set_id: row.get("op_set_id"),
                    op_code: decode_op_code(row.get("op_code"))?,
                })
            })
            .collect()
    }

    async fn add_operation_attr(&self, op_id: EntityId, attr: &str) -> StorageResult<()> {
        let exists = sqlx::query(&format!(
            "SELECT 1 AS one FROM {} WHERE op_id = $1",
            self.tables.operation
        ))
        .bind(op_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        if exists.is_none() {
            return Err(StorageError::OperationNotFound { op_id });
        }
        sqlx::query(&format!(
            "INSERT INTO {} (op_id, attr) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            self.tables.op_attrs
        ))
        .bind(op_id)
        .bind(attr)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn remove_operation_attr(&self, op_id: EntityId, attr: &str) -> StorageResult<()> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE op_id = $1 AND attr = $2",
            self.tables.op_attrs
        ))
        .bind(op_id)
        .bind(attr)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_operation_attrs(&self, op_id: EntityId) -> StorageResult<Vec<String>> {
        let rows = sqlx::query(&format!(
            "SELECT attr FROM {} WHERE op_id = $1 ORDER BY attr",
            self.tables.op_attrs
        ))
        .bind(op_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(|row| row.get("attr")).collect())
    }

    async fn get_target(&self, op_target_id: EntityId) -> StorageResult<TargetRow> {
        let row = sqlx::query(&format!(
            "SELECT op_target_id, entity_id, target_type, has_attr FROM {} \
             WHERE op_target_id = $1",
            self.tables.op_target
        ))
        .bind(op_target_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(StorageError::TargetNotFound { op_target_id })?;
        self.decode_target_row(&row)
    }

    #[instrument(skip(self))]
    async fn insert_target(
        &self,
        entity_id: Option<EntityId>,
        target_type: TargetType,
    ) -> StorageResult<EntityId> {
        validate_target(entity_id, target_type)?;
        let op_target_id = self.next_id().await?;
        sqlx::query(&format!(
            "INSERT INTO {} (op_target_id, entity_id, target_type, has_attr) \
             VALUES ($1, $2, $3, FALSE)",
            self.tables.op_target
        ))
        .bind(op_target_id)
        .bind(entity_id)
        .bind(target_type.code())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(op_target_id)
    }

    async fn update_target(
        &self,
        op_target_id: EntityId,
        entity_id: Option<EntityId>,
        target_type: TargetType,
    ) -> StorageResult<()> {
        validate_target(entity_id, target_type)?;
        let result = sqlx::query(&format!(
            "UPDATE {} SET entity_id = $2, target_type = $3, \
             has_attr = EXISTS (SELECT 1 FROM {} a WHERE a.op_target_id = $1) \
             WHERE op_target_id = $1",
            self.tables.op_target, self.tables.op_target_attrs
        ))
        .bind(op_target_id)
        .bind(entity_id)
        .bind(target_type.code())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::TargetNotFound { op_target_id });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_target(&self, op_target_id: EntityId) -> StorageResult<()> {
        let refs = sqlx::query(&format!(
            "SELECT COUNT(*) AS n FROM {} WHERE op_target_id = $1",
            self.tables.role
        ))
        .bind(op_target_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        let role_count: i64 = refs.get("n");
        if role_count > 0 {
            return Err(StorageError::StillReferenced {
                kind: "operation target",
                id: op_target_id,
                role_count: role_count as usize,
            });
        }

        sqlx::query(&format!(
            "DELETE FROM {} WHERE op_target_id = $1",
            self.tables.op_target_attrs
        ))
        .bind(op_target_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE op_target_id = $1",
            self.tables.op_target
        ))
        .bind(op_target_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::TargetNotFound { op_target_id });
        }
        Ok(())
    }

    async fn list_targets(&self, filter: &TargetFilter) -> StorageResult<Vec<TargetRow>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT op_target_id, entity_id, target_type, has_attr FROM {} WHERE TRUE",
            self.tables.op_target
        ));
        if let Some(target_id) = filter.target_id {
            qb.push(" AND op_target_id = ");
            qb.push_bind(target_id);
        }
        if let Some(target_type) = filter.target_type {
            qb.push(" AND target_type = ");
            qb.push_bind(target_type.code());
        }
        if let Some(entity_id) = filter.entity_id {
            qb.push(" AND entity_id = ");
            qb.push_bind(entity_id);
        }
        qb.push(" ORDER BY entity_id, op_target_id");
        let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter().map(|row| self.decode_target_row(row)).collect()
    }

    async fn add_target_attr(&self, op_target_id: EntityId, attr: &str) -> StorageResult<()> {
        // Existence check doubles as the has_attr update below.
        sqlx::query(&format!(
            "INSERT INTO {} (op_target_id, attr) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            self.tables.op_target_attrs
        ))
        .bind(op_target_id)
        .bind(attr)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        let result = sqlx::query(&format!(
            "UPDATE {} SET has_attr = TRUE WHERE op_target_id = $1",
            self.tables.op_target
        ))
        .bind(op_target_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            // Undo the orphan attribute row before reporting.
            sqlx::query(&format!(
                "DELETE FROM {} WHERE op_target_id = $1 AND attr = $2",
                self.tables.op_target_attrs
            ))
            .bind(op_target_id)
            .bind(attr)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            return Err(StorageError::TargetNotFound { op_target_id });
        }
        Ok(())
    }

    async fn remove_target_attr(&self, op_target_id: EntityId, attr: &str) -> StorageResult<()> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE op_target_id = $1 AND attr = $2",
            self.tables.op_target_attrs
        ))
        .bind(op_target_id)
        .bind(attr)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        sqlx::query(&format!(
            "UPDATE {} SET has_attr = EXISTS \
             (SELECT 1 FROM {} a WHERE a.op_target_id = $1) WHERE op_target_id = $1",
            self.tables.op_target, self.tables.op_target_attrs
        ))
        .bind(op_target_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_target_attrs(&self, op_target_id: EntityId) -> StorageResult<Vec<String>> {
        let rows = sqlx::query(&format!(
            "SELECT attr FROM {} WHERE op_target_id = $1 ORDER BY attr",
            self.tables.op_target_attrs
        ))
        .bind(op_target_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(|row| row.get("attr")).collect())
    }

    #[instrument(skip(self))]
    async fn grant(
        &self,
        entity_id: EntityId,
        op_set_id: EntityId,
        op_target_id: EntityId,
    ) -> StorageResult<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (entity_id, op_set_id, op_target_id) VALUES ($1, $2, $3) \
             ON CONFLICT DO NOTHING",
            self.tables.role
        ))
        .bind(entity_id)
        .bind(op_set_id)
        .bind(op_target_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn revoke(
        &self,
        entity_id: EntityId,
        op_set_id: EntityId,
        op_target_id: EntityId,
    ) -> StorageResult<()> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE entity_id = $1 AND op_set_id = $2 AND op_target_id = $3",
            self.tables.role
        ))
        .bind(entity_id)
        .bind(op_set_id)
        .bind(op_target_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_roles_by_entities(
        &self,
        entity_ids: &[EntityId],
    ) -> StorageResult<Vec<RoleRow>> {
        self.list_roles_in("entity_id", entity_ids).await
    }

    async fn list_roles_by_targets(
        &self,
        target_ids: &[EntityId],
    ) -> StorageResult<Vec<RoleRow>> {
        self.list_roles_in("op_target_id", target_ids).await
    }

    async fn list_roles(&self) -> StorageResult<Vec<RoleRow>> {
        let rows = sqlx::query(&format!(
            "SELECT entity_id, op_set_id, op_target_id FROM {} \
             ORDER BY entity_id, op_set_id, op_target_id",
            self.tables.role
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|row| RoleRow {
                entity_id: row.get("entity_id"),
                op_set_id: row.get("op_set_id"),
                op_target_id: row.get("op_target_id"),
            })
            .collect())
    }

    async fn matching_grants(
        &self,
        principals: &[EntityId],
        operation: OperationCode,
        target_type: TargetType,
        entity_id: Option<EntityId>,
    ) -> StorageResult<Vec<GrantMatch>> {
        if principals.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT aot.op_target_id, ao.op_id, \
             COALESCE((SELECT array_agg(a.attr ORDER BY a.attr) FROM {op_attrs} a \
                       WHERE a.op_id = ao.op_id), '{{}}') AS op_attrs, \
             COALESCE((SELECT array_agg(t.attr ORDER BY t.attr) FROM {target_attrs} t \
                       WHERE t.op_target_id = aot.op_target_id), '{{}}') AS target_attrs \
             FROM {operation} ao, {op_set} aos, {role} ar, {op_target} aot \
             WHERE ao.op_code = ",
            op_attrs = self.tables.op_attrs,
            target_attrs = self.tables.op_target_attrs,
            operation = self.tables.operation,
            op_set = self.tables.op_set,
            role = self.tables.role,
            op_target = self.tables.op_target,
        ));
        qb.push_bind(operation.code());
        qb.push(
            " AND ao.op_set_id = aos.op_set_id \
             AND aos.op_set_id = ar.op_set_id \
             AND ar.op_target_id = aot.op_target_id \
             AND aot.target_type = ",
        );
        qb.push_bind(target_type.code());
        if let Some(entity_id) = entity_id {
            qb.push(" AND aot.entity_id = ");
            qb.push_bind(entity_id);
        }
        qb.push(" AND ar.entity_id IN (");
        {
            let mut sep = qb.separated(", ");
            for principal in principals {
                sep.push_bind(*principal);
            }
        }
        qb.push(") ORDER BY aot.op_target_id, ao.op_id");

        let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|row| GrantMatch {
                target_id: row.get("op_target_id"),
                op_id: row.get("op_id"),
                op_attrs: row.get("op_attrs"),
                target_attrs: row.get("target_attrs"),
            })
            .collect())
    }

    async fn has_operation_anywhere(
        &self,
        principals: &[EntityId],
        operation: OperationCode,
    ) -> StorageResult<bool> {
        if principals.is_empty() {
            return Ok(false);
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT 1 AS one FROM {operation} ao, {op_set} aos, {role} ar \
             WHERE ao.op_code = ",
            operation = self.tables.operation,
            op_set = self.tables.op_set,
            role = self.tables.role,
        ));
        qb.push_bind(operation.code());
        qb.push(
            " AND ao.op_set_id = aos.op_set_id \
             AND aos.op_set_id = ar.op_set_id \
             AND ar.entity_id IN (",
        );
        {
            let mut sep = qb.separated(", ");
            for principal in principals {
                sep.push_bind(*principal);
            }
        }
        qb.push(") LIMIT 1");

        let row = qb.build().fetch_optional(&self.pool).await.map_err(db_err)?;
        Ok(row.is_some())
    }
}
