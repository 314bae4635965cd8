//! In-memory storage implementation.
//!
//! Backs tests and small single-process deployments. Uses DashMap for
//! thread-safe concurrent access without locks and a DashSet for the role
//! relation, which makes `grant` naturally idempotent.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use opgrant_domain::{EntityId, GrantMatch, OperationCode, TargetType};

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    validate_target, AccessStore, OpSetRow, OperationRow, RoleRow, TargetFilter, TargetRow,
};

/// In-memory implementation of [`AccessStore`].
///
/// # Performance Characteristics
///
/// - **Point lookups / grant / revoke**: O(1) average
/// - **Listings and decision joins**: linear scans over the respective
///   tables; the tables are administrative data and stay small
#[derive(Debug, Default)]
pub struct MemoryAccessStore {
    /// Monotonic id sequence shared by sets, operations and targets.
    seq: AtomicI64,
    op_sets: DashMap<EntityId, OpSetRow>,
    operations: DashMap<EntityId, OperationRow>,
    op_attrs: DashMap<EntityId, BTreeSet<String>>,
    targets: DashMap<EntityId, TargetRow>,
    target_attrs: DashMap<EntityId, BTreeSet<String>>,
    roles: DashSet<RoleRow>,
}

impl MemoryAccessStore {
    /// Creates a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn next_id(&self) -> EntityId {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn roles_referencing_set(&self, op_set_id: EntityId) -> usize {
        self.roles
            .iter()
            .filter(|r| r.op_set_id == op_set_id)
            .count()
    }

    fn roles_referencing_target(&self, op_target_id: EntityId) -> usize {
        self.roles
            .iter()
            .filter(|r| r.op_target_id == op_target_id)
            .count()
    }
}

#[async_trait]
impl AccessStore for MemoryAccessStore {
    async fn get_op_set(&self, op_set_id: EntityId) -> StorageResult<OpSetRow> {
        self.op_sets
            .get(&op_set_id)
            .map(|r| r.value().clone())
            .ok_or(StorageError::OpSetNotFound { op_set_id })
    }

    async fn get_op_set_by_name(&self, name: &str) -> StorageResult<OpSetRow> {
        self.op_sets
            .iter()
            .find(|r| r.value().name == name)
            .map(|r| r.value().clone())
            .ok_or_else(|| StorageError::OpSetNameNotFound {
                name: name.to_string(),
            })
    }

    async fn insert_op_set(&self, name: &str) -> StorageResult<EntityId> {
        let op_set_id = self.next_id();
        self.op_sets.insert(
            op_set_id,
            OpSetRow {
                op_set_id,
                name: name.to_string(),
            },
        );
        Ok(op_set_id)
    }

    async fn update_op_set(&self, op_set_id: EntityId, name: &str) -> StorageResult<()> {
        let mut row = self
            .op_sets
            .get_mut(&op_set_id)
            .ok_or(StorageError::OpSetNotFound { op_set_id })?;
        row.name = name.to_string();
        Ok(())
    }

    async fn delete_op_set(&self, op_set_id: EntityId) -> StorageResult<()> {
        let role_count = self.roles_referencing_set(op_set_id);
        if role_count > 0 {
            return Err(StorageError::StillReferenced {
                kind: "operation set",
                id: op_set_id,
                role_count,
            });
        }
        if self.op_sets.remove(&op_set_id).is_none() {
            return Err(StorageError::OpSetNotFound { op_set_id });
        }
        // Operation entries belong to the set; drop them with it.
        let op_ids: Vec<EntityId> = self
            .operations
            .iter()
            .filter(|r| r.op_set_id == op_set_id)
            .map(|r| r.op_id)
            .collect();
        for op_id in op_ids {
            self.operations.remove(&op_id);
            self.op_attrs.remove(&op_id);
        }
        Ok(())
    }

    async fn list_op_sets(&self) -> StorageResult<Vec<OpSetRow>> {
        let mut rows: Vec<OpSetRow> = self.op_sets.iter().map(|r| r.value().clone()).collect();
        rows.sort_by_key(|r| r.op_set_id);
        Ok(rows)
    }

    async fn add_operation(
        &self,
        op_set_id: EntityId,
        op_code: OperationCode,
    ) -> StorageResult<EntityId> {
        if !self.op_sets.contains_key(&op_set_id) {
            return Err(StorageError::OpSetNotFound { op_set_id });
        }
        let op_id = self.next_id();
        self.operations.insert(
            op_id,
            OperationRow {
                op_id,
                op_set_id,
                op_code,
            },
        );
        Ok(op_id)
    }

    async fn remove_operation(
        &self,
        op_set_id: EntityId,
        op_code: OperationCode,
    ) -> StorageResult<()> {
        let op_ids: Vec<EntityId> = self
            .operations
            .iter()
            .filter(|r| r.op_set_id == op_set_id && r.op_code == op_code)
            .map(|r| r.op_id)
            .collect();
        for op_id in op_ids {
            self.operations.remove(&op_id);
            self.op_attrs.remove(&op_id);
        }
        Ok(())
    }

    async fn list_operations(&self, op_set_id: EntityId) -> StorageResult<Vec<OperationRow>> {
        let mut rows: Vec<OperationRow> = self
            .operations
            .iter()
            .filter(|r| r.op_set_id == op_set_id)
            .map(|r| *r.value())
            .collect();
        rows.sort_by_key(|r| r.op_id);
        Ok(rows)
    }

    async fn add_operation_attr(&self, op_id: EntityId, attr: &str) -> StorageResult<()> {
        if !self.operations.contains_key(&op_id) {
            return Err(StorageError::OperationNotFound { op_id });
        }
        self.op_attrs
            .entry(op_id)
            .or_default()
            .insert(attr.to_string());
        Ok(())
    }

    async fn remove_operation_attr(&self, op_id: EntityId, attr: &str) -> StorageResult<()> {
        if let Some(mut attrs) = self.op_attrs.get_mut(&op_id) {
            attrs.remove(attr);
        }
        Ok(())
    }

    async fn list_operation_attrs(&self, op_id: EntityId) -> StorageResult<Vec<String>> {
        Ok(self
            .op_attrs
            .get(&op_id)
            .map(|attrs| attrs.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_target(&self, op_target_id: EntityId) -> StorageResult<TargetRow> {
        self.targets
            .get(&op_target_id)
            .map(|r| *r.value())
            .ok_or(StorageError::TargetNotFound { op_target_id })
    }

    async fn insert_target(
        &self,
        entity_id: Option<EntityId>,
        target_type: TargetType,
    ) -> StorageResult<EntityId> {
        validate_target(entity_id, target_type)?;
        let op_target_id = self.next_id();
        self.targets.insert(
            op_target_id,
            TargetRow {
                op_target_id,
                entity_id,
                target_type,
                has_attr: false,
            },
        );
        Ok(op_target_id)
    }

    async fn update_target(
        &self,
        op_target_id: EntityId,
        entity_id: Option<EntityId>,
        target_type: TargetType,
    ) -> StorageResult<()> {
        validate_target(entity_id, target_type)?;
        let has_attr = self
            .target_attrs
            .get(&op_target_id)
            .map(|attrs| !attrs.is_empty())
            .unwrap_or(false);
        let mut row = self
            .targets
            .get_mut(&op_target_id)
            .ok_or(StorageError::TargetNotFound { op_target_id })?;
        row.entity_id = entity_id;
        row.target_type = target_type;
        row.has_attr = has_attr;
        Ok(())
    }

    async fn delete_target(&self, op_target_id: EntityId) -> StorageResult<()> {
        let role_count = self.roles_referencing_target(op_target_id);
        if role_count > 0 {
            return Err(StorageError::StillReferenced {
                kind: "operation target",
                id: op_target_id,
                role_count,
            });
        }
        if self.targets.remove(&op_target_id).is_none() {
            return Err(StorageError::TargetNotFound { op_target_id });
        }
        self.target_attrs.remove(&op_target_id);
        Ok(())
    }

    async fn list_targets(&self, filter: &TargetFilter) -> StorageResult<Vec<TargetRow>> {
        let mut rows: Vec<TargetRow> = self
            .targets
            .iter()
            .filter(|r| {
                filter
                    .target_id
                    .map_or(true, |id| r.op_target_id == id)
                    && filter.target_type.map_or(true, |tt| r.target_type == tt)
                    && filter.entity_id.map_or(true, |e| r.entity_id == Some(e))
            })
            .map(|r| *r.value())
            .collect();
        rows.sort_by_key(|r| (r.entity_id, r.op_target_id));
        Ok(rows)
    }

    async fn add_target_attr(&self, op_target_id: EntityId, attr: &str) -> StorageResult<()> {
        let mut row = self
            .targets
            .get_mut(&op_target_id)
            .ok_or(StorageError::TargetNotFound { op_target_id })?;
        self.target_attrs
            .entry(op_target_id)
            .or_default()
            .insert(attr.to_string());
        row.has_attr = true;
        Ok(())
    }

    async fn remove_target_attr(&self, op_target_id: EntityId, attr: &str) -> StorageResult<()> {
        let now_empty = match self.target_attrs.get_mut(&op_target_id) {
            Some(mut attrs) => {
                attrs.remove(attr);
                attrs.is_empty()
            }
            None => return Ok(()),
        };
        if now_empty {
            if let Some(mut row) = self.targets.get_mut(&op_target_id) {
                row.has_attr = false;
            }
        }
        Ok(())
    }

    async fn list_target_attrs(&self, op_target_id: EntityId) -> StorageResult<Vec<String>> {
        Ok(self
            .target_attrs
            .get(&op_target_id)
            .map(|attrs| attrs.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn grant(
        &self,
        entity_id: EntityId,
        op_set_id: EntityId,
        op_target_id: EntityId,
    ) -> StorageResult<()> {
        self.roles.insert(RoleRow {
            entity_id,
            op_set_id,
            op_target_id,
        });
        Ok(())
    }

    async fn revoke(
        &self,
        entity_id: EntityId,
        op_set_id: EntityId,
        op_target_id: EntityId,
    ) -> StorageResult<()> {
        self.roles.remove(&RoleRow {
            entity_id,
            op_set_id,
            op_target_id,
        });
        Ok(())
    }

    async fn list_roles_by_entities(
        &self,
        entity_ids: &[EntityId],
    ) -> StorageResult<Vec<RoleRow>> {
        let mut rows: Vec<RoleRow> = self
            .roles
            .iter()
            .filter(|r| entity_ids.contains(&r.entity_id))
            .map(|r| *r)
            .collect();
        rows.sort_by_key(|r| (r.entity_id, r.op_set_id, r.op_target_id));
        Ok(rows)
    }

    async fn list_roles_by_targets(
        &self,
        target_ids: &[EntityId],
    ) -> StorageResult<Vec<RoleRow>> {
        let mut rows: Vec<RoleRow> = self
            .roles
            .iter()
            .filter(|r| target_ids.contains(&r.op_target_id))
            .map(|r| *r)
            .collect();
        rows.sort_by_key(|r| (r.entity_id, r.op_set_id, r.op_target_id));
        Ok(rows)
    }

    async fn list_roles(&self) -> StorageResult<Vec<RoleRow>> {
        let mut rows: Vec<RoleRow> = self.roles.iter().map(|r| *r).collect();
        rows.sort_by_key(|r| (r.entity_id, r.op_set_id, r.op_target_id));
        Ok(rows)
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
        let mut matches = Vec::new();
        for role in self.roles.iter() {
            if !principals.contains(&role.entity_id) {
                continue;
            }
            // Rows referencing a deleted target never authorize anything;
            // the maintenance sweep removes them.
            let Some(target) = self.targets.get(&role.op_target_id).map(|r| *r.value()) else {
                continue;
            };
            if target.target_type != target_type {
                continue;
            }
            if entity_id.is_some() && target.entity_id != entity_id {
                continue;
            }
            let target_attrs: Vec<String> = self
                .target_attrs
                .get(&target.op_target_id)
                .map(|attrs| attrs.iter().cloned().collect())
                .unwrap_or_default();
            for op in self
                .operations
                .iter()
                .filter(|op| op.op_set_id == role.op_set_id && op.op_code == operation)
            {
                matches.push(GrantMatch {
                    target_id: target.op_target_id,
                    op_id: op.op_id,
                    op_attrs: self
                        .op_attrs
                        .get(&op.op_id)
                        .map(|attrs| attrs.iter().cloned().collect())
                        .unwrap_or_default(),
                    target_attrs: target_attrs.clone(),
                });
            }
        }
        matches.sort_by_key(|m| (m.target_id, m.op_id));
        Ok(matches)
    }

    async fn has_operation_anywhere(
        &self,
        principals: &[EntityId],
        operation: OperationCode,
    ) -> StorageResult<bool> {
        if principals.is_empty() {
            return Ok(false);
        }
        for role in self.roles.iter() {
            if !principals.contains(&role.entity_id) {
                continue;
            }
            if self
                .operations
                .iter()
                .any(|op| op.op_set_id == role.op_set_id && op.op_code == operation)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
