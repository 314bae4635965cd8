//! Adapter exposing an [`AccessStore`] through the engine's reader trait.

use std::sync::Arc;

use async_trait::async_trait;

use opgrant_domain::{
    DomainError, DomainResult, EntityId, GrantMatch, GrantReader, OperationCode, TargetType,
};

use crate::error::StorageError;
use crate::traits::AccessStore;

fn to_domain(e: StorageError) -> DomainError {
    DomainError::Backend {
        message: e.to_string(),
    }
}

/// Wraps a store so the decision engine can read grants from it.
pub struct StoreGrantReader<S> {
    store: Arc<S>,
}

impl<S: AccessStore> StoreGrantReader<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The wrapped store, for callers that also mutate grants.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

#[async_trait]
impl<S: AccessStore> GrantReader for StoreGrantReader<S> {
    async fn matching_grants(
        &self,
        principals: &[EntityId],
        operation: OperationCode,
        target_type: TargetType,
        entity_id: Option<EntityId>,
    ) -> DomainResult<Vec<GrantMatch>> {
        self.store
            .matching_grants(principals, operation, target_type, entity_id)
            .await
            .map_err(to_domain)
    }

    async fn has_operation_anywhere(
        &self,
        principals: &[EntityId],
        operation: OperationCode,
    ) -> DomainResult<bool> {
        self.store
            .has_operation_anywhere(principals, operation)
            .await
            .map_err(to_domain)
    }
}

impl<S> std::fmt::Debug for StoreGrantReader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreGrantReader").finish()
    }
}
