//! Traits for the lookups the decision engine performs.

use async_trait::async_trait;

use crate::error::DomainResult;
use crate::model::{DiskInfo, EntityId, GrantMatch, OperationCode, TargetType};

/// Read access to the persisted grant relation, joined across operation
/// sets, operations and operation targets.
#[async_trait]
pub trait GrantReader: Send + Sync {
    /// Rows where a grantee in `principals` holds an operation set
    /// containing `operation` on a target of `target_type`.
    ///
    /// `entity_id` of `Some(id)` restricts to targets on that concrete
    /// entity; `None` applies no entity filter (global targets carry no
    /// entity id, so global queries pass `None`).
    async fn matching_grants(
        &self,
        principals: &[EntityId],
        operation: OperationCode,
        target_type: TargetType,
        entity_id: Option<EntityId>,
    ) -> DomainResult<Vec<GrantMatch>>;

    /// Whether any grantee in `principals` holds `operation` on any target
    /// at all.
    async fn has_operation_anywhere(
        &self,
        principals: &[EntityId],
        operation: OperationCode,
    ) -> DomainResult<bool>;
}

/// Disk/host directory collaborator, needed for hierarchical disk
/// resolution. Implemented by the surrounding entity layer.
#[async_trait]
pub trait DiskReader: Send + Sync {
    /// Looks up a disk's owning host and path.
    ///
    /// Returns [`crate::error::DomainError::DiskNotFound`] for unknown ids;
    /// the engine propagates that unchanged.
    async fn disk(&self, disk_id: EntityId) -> DomainResult<DiskInfo>;
}
