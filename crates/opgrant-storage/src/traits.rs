//! AccessStore trait definition and row types for the six auth tables.

use async_trait::async_trait;

use opgrant_domain::{EntityId, GrantMatch, OperationCode, TargetType};

use crate::error::{StorageError, StorageResult};

/// A named operation set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpSetRow {
    pub op_set_id: EntityId,
    pub name: String,
}

/// An operation entry inside a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationRow {
    pub op_id: EntityId,
    pub op_set_id: EntityId,
    pub op_code: OperationCode,
}

/// An operation target: a concrete entity of some category, or a global
/// category. `has_attr` mirrors whether attribute rows exist for the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetRow {
    pub op_target_id: EntityId,
    pub entity_id: Option<EntityId>,
    pub target_type: TargetType,
    pub has_attr: bool,
}

/// One row of the role relation: grantee holds set on target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoleRow {
    pub entity_id: EntityId,
    pub op_set_id: EntityId,
    pub op_target_id: EntityId,
}

/// Filter for listing operation targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetFilter {
    /// Filter by target id.
    pub target_id: Option<EntityId>,
    /// Filter by target type.
    pub target_type: Option<TargetType>,
    /// Filter by concrete entity id.
    pub entity_id: Option<EntityId>,
}

/// Checks the global/entity invariant for a target row.
pub fn validate_target(
    entity_id: Option<EntityId>,
    target_type: TargetType,
) -> StorageResult<()> {
    match (entity_id, target_type.is_global()) {
        (None, true) | (Some(_), false) => Ok(()),
        (Some(id), true) => Err(StorageError::InvalidTarget {
            message: format!("global target type {target_type} must not carry entity id {id}"),
        }),
        (None, false) => Err(StorageError::InvalidTarget {
            message: format!("target type {target_type} requires an entity id"),
        }),
    }
}

/// Abstract storage interface for the authorization tables.
///
/// Implementations must be thread-safe (Send + Sync). Every method is a
/// single-row or single-query operation; transaction discipline belongs to
/// the caller.
#[async_trait]
pub trait AccessStore: Send + Sync + 'static {
    // Operation sets

    /// Gets an operation set by id.
    async fn get_op_set(&self, op_set_id: EntityId) -> StorageResult<OpSetRow>;

    /// Gets an operation set by name.
    async fn get_op_set_by_name(&self, name: &str) -> StorageResult<OpSetRow>;

    /// Inserts a new operation set, allocating its id from the sequence.
    async fn insert_op_set(&self, name: &str) -> StorageResult<EntityId>;

    /// Renames an operation set.
    async fn update_op_set(&self, op_set_id: EntityId, name: &str) -> StorageResult<()>;

    /// Deletes an operation set and its operation entries.
    ///
    /// Rejected with [`StorageError::StillReferenced`] while role grants
    /// reference the set.
    async fn delete_op_set(&self, op_set_id: EntityId) -> StorageResult<()>;

    /// Lists all operation sets.
    async fn list_op_sets(&self) -> StorageResult<Vec<OpSetRow>>;

    /// Adds an operation entry to a set, returning the new entry's id.
    async fn add_operation(
        &self,
        op_set_id: EntityId,
        op_code: OperationCode,
    ) -> StorageResult<EntityId>;

    /// Removes all entries for `op_code` from a set, along with their
    /// attributes. A no-op when none exist.
    async fn remove_operation(
        &self,
        op_set_id: EntityId,
        op_code: OperationCode,
    ) -> StorageResult<()>;

    /// Lists the operation entries of a set.
    async fn list_operations(&self, op_set_id: EntityId) -> StorageResult<Vec<OperationRow>>;

    /// Adds an attribute to an operation entry.
    async fn add_operation_attr(&self, op_id: EntityId, attr: &str) -> StorageResult<()>;

    /// Removes an attribute from an operation entry. A no-op when absent.
    async fn remove_operation_attr(&self, op_id: EntityId, attr: &str) -> StorageResult<()>;

    /// Lists the attributes of an operation entry.
    async fn list_operation_attrs(&self, op_id: EntityId) -> StorageResult<Vec<String>>;

    // Operation targets

    /// Gets a target by id.
    async fn get_target(&self, op_target_id: EntityId) -> StorageResult<TargetRow>;

    /// Inserts a new target. `entity_id` must be present exactly when the
    /// target type is concrete (see [`validate_target`]).
    async fn insert_target(
        &self,
        entity_id: Option<EntityId>,
        target_type: TargetType,
    ) -> StorageResult<EntityId>;

    /// Rewrites a target's entity and type, re-deriving `has_attr` from the
    /// current attribute rows.
    async fn update_target(
        &self,
        op_target_id: EntityId,
        entity_id: Option<EntityId>,
        target_type: TargetType,
    ) -> StorageResult<()>;

    /// Deletes a target and its attribute rows.
    ///
    /// Rejected with [`StorageError::StillReferenced`] while role grants
    /// reference the target.
    async fn delete_target(&self, op_target_id: EntityId) -> StorageResult<()>;

    /// Lists targets matching the filter, ordered by entity id.
    async fn list_targets(&self, filter: &TargetFilter) -> StorageResult<Vec<TargetRow>>;

    /// Adds an attribute to a target and raises its `has_attr` flag.
    async fn add_target_attr(&self, op_target_id: EntityId, attr: &str) -> StorageResult<()>;

    /// Removes an attribute from a target, clearing `has_attr` when the
    /// last one goes. A no-op when absent.
    async fn remove_target_attr(&self, op_target_id: EntityId, attr: &str) -> StorageResult<()>;

    /// Lists the attributes of a target.
    async fn list_target_attrs(&self, op_target_id: EntityId) -> StorageResult<Vec<String>>;

    // Role grants

    /// Grants `op_set_id` on `op_target_id` to `entity_id`. Idempotent;
    /// does not verify that the set or target exist (the maintenance sweep
    /// covers rows left dangling by careless callers).
    async fn grant(
        &self,
        entity_id: EntityId,
        op_set_id: EntityId,
        op_target_id: EntityId,
    ) -> StorageResult<()>;

    /// Revokes a grant. A no-op when no matching row exists.
    async fn revoke(
        &self,
        entity_id: EntityId,
        op_set_id: EntityId,
        op_target_id: EntityId,
    ) -> StorageResult<()>;

    /// Lists grants held by any of the given entities.
    async fn list_roles_by_entities(
        &self,
        entity_ids: &[EntityId],
    ) -> StorageResult<Vec<RoleRow>>;

    /// Lists grants on any of the given targets ("who owns these targets").
    async fn list_roles_by_targets(
        &self,
        target_ids: &[EntityId],
    ) -> StorageResult<Vec<RoleRow>>;

    /// Lists every grant row. Used by the maintenance sweep and admin
    /// tooling.
    async fn list_roles(&self) -> StorageResult<Vec<RoleRow>>;

    // Decision queries

    /// The join backing the decision engine: rows where a grantee in
    /// `principals` holds an operation set containing `operation` on a
    /// target of `target_type` (optionally on one concrete entity). Each
    /// match carries the operation's and the target's attribute sets.
    async fn matching_grants(
        &self,
        principals: &[EntityId],
        operation: OperationCode,
        target_type: TargetType,
        entity_id: Option<EntityId>,
    ) -> StorageResult<Vec<GrantMatch>>;

    /// Whether any grantee in `principals` holds `operation` on any target.
    /// Joins roles against sets only; a dangling target does not hide the
    /// grant.
    async fn has_operation_anywhere(
        &self,
        principals: &[EntityId],
        operation: OperationCode,
    ) -> StorageResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_target_invariant() {
        assert!(validate_target(Some(17), TargetType::Disk).is_ok());
        assert!(validate_target(None, TargetType::GlobalHost).is_ok());

        assert!(matches!(
            validate_target(Some(17), TargetType::GlobalHost),
            Err(StorageError::InvalidTarget { .. })
        ));
        assert!(matches!(
            validate_target(None, TargetType::Disk),
            Err(StorageError::InvalidTarget { .. })
        ));
    }
}
