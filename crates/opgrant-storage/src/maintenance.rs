//! Data-integrity sweep for the role relation.
//!
//! `grant` is a plain relation insert and does not verify its references,
//! and imported legacy data may predate referential checks. Rows pointing
//! at a missing operation set or target authorize nothing; this sweep
//! counts them and, unless running dry, removes them.

use std::collections::HashSet;

use tracing::{info, instrument, warn};

use opgrant_domain::EntityId;

use crate::error::StorageResult;
use crate::traits::{AccessStore, TargetFilter};

/// Outcome of a sweep run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Role rows examined.
    pub examined: usize,
    /// Rows referencing a missing set or target.
    pub dangling: usize,
    /// Rows actually removed (zero on a dry run).
    pub removed: usize,
}

/// Finds (and removes, unless `dry_run`) role rows whose operation set or
/// operation target no longer exists.
#[instrument(skip(store))]
pub async fn sweep_dangling_roles<S: AccessStore + ?Sized>(
    store: &S,
    dry_run: bool,
) -> StorageResult<SweepReport> {
    let set_ids: HashSet<EntityId> = store
        .list_op_sets()
        .await?
        .into_iter()
        .map(|s| s.op_set_id)
        .collect();
    let target_ids: HashSet<EntityId> = store
        .list_targets(&TargetFilter::default())
        .await?
        .into_iter()
        .map(|t| t.op_target_id)
        .collect();

    let mut report = SweepReport::default();
    for role in store.list_roles().await? {
        report.examined += 1;
        let missing_set = !set_ids.contains(&role.op_set_id);
        let missing_target = !target_ids.contains(&role.op_target_id);
        if !missing_set && !missing_target {
            continue;
        }
        report.dangling += 1;
        warn!(
            entity_id = role.entity_id,
            op_set_id = role.op_set_id,
            op_target_id = role.op_target_id,
            missing_set,
            missing_target,
            "dangling role grant"
        );
        if !dry_run {
            store
                .revoke(role.entity_id, role.op_set_id, role.op_target_id)
                .await?;
            report.removed += 1;
        }
    }

    info!(
        examined = report.examined,
        dangling = report.dangling,
        removed = report.removed,
        "role sweep finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAccessStore;
    use opgrant_domain::{OperationCode, TargetType};

    async fn seeded_store() -> (MemoryAccessStore, EntityId, EntityId) {
        let store = MemoryAccessStore::new();
        let set = store.insert_op_set("DiskAdmin").await.unwrap();
        store.add_operation(set, OperationCode::CreateUser).await.unwrap();
        let target = store.insert_target(Some(17), TargetType::Disk).await.unwrap();
        (store, set, target)
    }

    #[tokio::test]
    async fn test_sweep_on_clean_store_removes_nothing() {
        let (store, set, target) = seeded_store().await;
        store.grant(42, set, target).await.unwrap();

        let report = sweep_dangling_roles(&store, false).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                examined: 1,
                dangling: 0,
                removed: 0
            }
        );
        assert_eq!(store.list_roles().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_removes_roles_with_missing_references() {
        let (store, set, target) = seeded_store().await;
        store.grant(42, set, target).await.unwrap();
        // grant does not validate references; these rows dangle from birth.
        store.grant(42, 9998, target).await.unwrap();
        store.grant(42, set, 9999).await.unwrap();

        let report = sweep_dangling_roles(&store, false).await.unwrap();
        assert_eq!(report.examined, 3);
        assert_eq!(report.dangling, 2);
        assert_eq!(report.removed, 2);

        let remaining = store.list_roles().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].op_set_id, set);
        assert_eq!(remaining[0].op_target_id, target);
    }

    #[tokio::test]
    async fn test_dry_run_counts_but_keeps_rows() {
        let (store, set, _) = seeded_store().await;
        store.grant(42, set, 9999).await.unwrap();

        let report = sweep_dangling_roles(&store, true).await.unwrap();
        assert_eq!(report.dangling, 1);
        assert_eq!(report.removed, 0);
        assert_eq!(store.list_roles().await.unwrap().len(), 1);
    }
}
