//! The decision engine proper.

use std::sync::Arc;

use regex::Regex;
use tracing::{debug, instrument};

use crate::cache::AnyPermCache;
use crate::error::{DomainError, DomainResult};
use crate::membership::{GroupReader, MembershipResolver};
use crate::model::{CheckMode, Decision, EntityId, OperationCode, TargetRef, TargetType};

use super::traits::{DiskReader, GrantReader};

/// Decides whether an operator may perform an operation against a target.
///
/// Evaluation is ordered and short-circuiting:
///
/// 1. superuser bypass
/// 2. operation-anywhere lookup when no concrete target is supplied
/// 3. global-category short-circuit, guarded so that no global grant ever
///    authorizes an action against a superuser-group member
/// 4. exact-target lookup
/// 5. for disks: the owning host, then host-scoped attribute patterns
///    matched against the disk name
/// 6. deny
///
/// Every call is a bounded number of indexed lookups; concurrent calls are
/// independent. The engine only reads; grant/revoke writes belong to the
/// store, whose callers must invoke [`AccessEngine::notify_grants_changed`]
/// when they need the operation-anywhere cache to reflect the change
/// immediately.
pub struct AccessEngine<R, G, D> {
    grants: Arc<R>,
    disks: Arc<D>,
    membership: MembershipResolver<G>,
    any_perm: AnyPermCache,
}

impl<R, G, D> AccessEngine<R, G, D>
where
    R: GrantReader,
    G: GroupReader,
    D: DiskReader,
{
    /// Creates a new engine. Both caches are injected (the group cache
    /// lives inside `membership`), so tests control clocks and capacities.
    pub fn new(
        grants: Arc<R>,
        disks: Arc<D>,
        membership: MembershipResolver<G>,
        any_perm: AnyPermCache,
    ) -> Self {
        Self {
            grants,
            disks,
            membership,
            any_perm,
        }
    }

    /// The membership resolver, for predicates that need special-group
    /// checks beyond the decision pipeline.
    pub fn membership(&self) -> &MembershipResolver<G> {
        &self.membership
    }

    /// Whether `entity` is a member of the configured superuser group.
    pub async fn is_superuser(&self, entity: EntityId) -> DomainResult<bool> {
        self.membership.is_superuser(entity).await
    }

    /// Evaluates a permission check. See the type-level docs for the rule
    /// order and [`CheckMode`] for the two calling conventions.
    #[instrument(skip(self), fields(operation = %operation))]
    pub async fn evaluate(
        &self,
        operator: EntityId,
        operation: OperationCode,
        target: Option<&TargetRef>,
        victim: Option<EntityId>,
        operation_attr: Option<&str>,
        mode: CheckMode,
    ) -> DomainResult<Decision> {
        if self.membership.is_superuser(operator).await? {
            return Ok(Decision::Allowed);
        }

        let principals = self.membership.principals(operator).await?;

        let target = match target {
            Some(target) => target,
            None => {
                // Operations not tied to a target are authorized by holding
                // the operation on any target at all.
                let held = self
                    .holds_operation_anywhere(operator, operation, &principals)
                    .await?;
                return Ok(if held {
                    Decision::Allowed
                } else {
                    self.deny(None, operation, operation_attr, mode)
                });
            }
        };

        if let Some(global) = target.target_type().global_counterpart() {
            if self
                .has_global_access(&principals, operation, global, victim, operation_attr)
                .await?
            {
                debug!(target_type = %global, "allowed by global grant");
                return Ok(Decision::Allowed);
            }
        }

        if self
            .has_exact_access(
                &principals,
                operation,
                target.target_type(),
                target.entity_id(),
                operation_attr,
            )
            .await?
        {
            return Ok(Decision::Allowed);
        }

        if let TargetRef::Disk(disk_id) = *target {
            if self
                .has_disk_access_via_host(&principals, operation, disk_id, operation_attr)
                .await?
            {
                return Ok(Decision::Allowed);
            }
        }

        Ok(self.deny(Some(target), operation, operation_attr, mode))
    }

    /// Enforce-mode convenience: `Ok(())` when allowed, otherwise
    /// [`DomainError::PermissionDenied`] with the denial reason.
    pub async fn check(
        &self,
        operator: EntityId,
        operation: OperationCode,
        target: Option<&TargetRef>,
        victim: Option<EntityId>,
        operation_attr: Option<&str>,
    ) -> DomainResult<()> {
        self.evaluate(
            operator,
            operation,
            target,
            victim,
            operation_attr,
            CheckMode::Enforce,
        )
        .await?
        .into_result()
    }

    /// QueryAny-mode convenience for command listings: does the operator
    /// hold `operation` on any target at all. Never errors on a miss, and
    /// must never guard a mutating action.
    pub async fn can_run_anywhere(
        &self,
        operator: EntityId,
        operation: OperationCode,
    ) -> DomainResult<bool> {
        Ok(self
            .evaluate(operator, operation, None, None, None, CheckMode::QueryAny)
            .await?
            .is_allowed())
    }

    /// Empties the operation-anywhere cache. Grant/revoke code paths call
    /// this when they need subsequent probes to see the change before the
    /// cache would otherwise turn over.
    pub async fn notify_grants_changed(&self) {
        self.any_perm.invalidate_all().await;
    }

    async fn holds_operation_anywhere(
        &self,
        operator: EntityId,
        operation: OperationCode,
        principals: &[EntityId],
    ) -> DomainResult<bool> {
        if let Some(held) = self.any_perm.get(operator, operation).await {
            return Ok(held);
        }
        let held = self
            .grants
            .has_operation_anywhere(principals, operation)
            .await?;
        self.any_perm.insert(operator, operation, held).await;
        Ok(held)
    }

    /// Step 3: a grant on the subsuming global category, subject to the
    /// superuser-protection guard.
    async fn has_global_access(
        &self,
        principals: &[EntityId],
        operation: OperationCode,
        global_type: TargetType,
        victim: Option<EntityId>,
        operation_attr: Option<&str>,
    ) -> DomainResult<bool> {
        // A global grant never authorizes an action against the superuser
        // group or its members.
        if global_type == TargetType::GlobalGroup {
            if victim == Some(self.membership.superuser_group_id().await?) {
                return Ok(false);
            }
        } else if let Some(victim) = victim {
            if self.membership.is_superuser(victim).await? {
                return Ok(false);
            }
        }

        let rows = self
            .grants
            .matching_grants(principals, operation, global_type, None)
            .await?;
        Ok(rows
            .iter()
            .any(|row| op_attr_allows(&row.op_attrs, operation_attr)))
    }

    /// Step 4: a grant on the exact `(target_type, entity_id)` target.
    async fn has_exact_access(
        &self,
        principals: &[EntityId],
        operation: OperationCode,
        target_type: TargetType,
        entity_id: EntityId,
        operation_attr: Option<&str>,
    ) -> DomainResult<bool> {
        let rows = self
            .grants
            .matching_grants(principals, operation, target_type, Some(entity_id))
            .await?;
        Ok(rows
            .iter()
            .any(|row| op_attr_allows(&row.op_attrs, operation_attr)))
    }

    /// Step 5: host-level grants covering a disk. A host grant without
    /// target attributes covers every disk on the host; one with attributes
    /// covers the disks whose name matches one of the patterns.
    async fn has_disk_access_via_host(
        &self,
        principals: &[EntityId],
        operation: OperationCode,
        disk_id: EntityId,
        operation_attr: Option<&str>,
    ) -> DomainResult<bool> {
        let disk = self.disks.disk(disk_id).await?;
        let rows = self
            .grants
            .matching_grants(principals, operation, TargetType::Host, Some(disk.host_id))
            .await?;

        for row in rows
            .iter()
            .filter(|row| op_attr_allows(&row.op_attrs, operation_attr))
        {
            if row.target_attrs.is_empty() {
                return Ok(true);
            }
            for pattern in &row.target_attrs {
                if pattern_matches(pattern, disk.basename())? {
                    debug!(pattern = %pattern, disk = disk.basename(), "disk name matched host pattern");
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn deny(
        &self,
        target: Option<&TargetRef>,
        operation: OperationCode,
        operation_attr: Option<&str>,
        mode: CheckMode,
    ) -> Decision {
        match mode {
            CheckMode::QueryAny => Decision::not_held(),
            CheckMode::Enforce => {
                let reason = match (target, operation_attr) {
                    (_, Some(attr)) => {
                        format!("not authorized to {} of type '{attr}'", operation.description())
                    }
                    (Some(TargetRef::Disk(_)), None) => "no access to disk".to_string(),
                    (Some(TargetRef::Host(_)), None) => "no access to host".to_string(),
                    (Some(TargetRef::Group(_)), None) => "no access to group".to_string(),
                    (Some(TargetRef::Ou(_)), None) => "no access to OU".to_string(),
                    (Some(TargetRef::Maildomain(_)), None) => {
                        "no access to e-mail domain".to_string()
                    }
                    (Some(TargetRef::Spread(_)), None) => "no access to spread".to_string(),
                    (None, None) => {
                        format!("not authorized to {}", operation.description())
                    }
                };
                Decision::denied(reason)
            }
        }
    }
}

impl<R, G, D> std::fmt::Debug for AccessEngine<R, G, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessEngine")
            .field("membership", &self.membership)
            .field("any_perm", &self.any_perm)
            .finish()
    }
}

/// The attribute law: an empty attribute set on an operation entry applies
/// to all attribute values; a non-empty set applies only to its exact
/// members. A request without an attribute is only satisfied by wildcard
/// entries.
fn op_attr_allows(op_attrs: &[String], requested: Option<&str>) -> bool {
    if op_attrs.is_empty() {
        return true;
    }
    match requested {
        Some(attr) => op_attrs.iter().any(|a| a == attr),
        None => false,
    }
}

/// Matches a target attribute pattern against a disk name, anchored at the
/// start of the name.
fn pattern_matches(pattern: &str, name: &str) -> DomainResult<bool> {
    let re = Regex::new(pattern).map_err(|e| DomainError::InvalidAttributePattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;
    Ok(re.find(name).is_some_and(|m| m.start() == 0))
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_op_attr_wildcard_law() {
        // Empty set authorizes any requested attribute, including none.
        assert!(op_attr_allows(&[], None));
        assert!(op_attr_allows(&[], Some("guest_mailbox")));

        // Non-empty set authorizes only exact members.
        let attrs = vec!["guest_mailbox".to_string()];
        assert!(op_attr_allows(&attrs, Some("guest_mailbox")));
        assert!(!op_attr_allows(&attrs, Some("internal_mailbox")));
        assert!(!op_attr_allows(&attrs, Some("guest")));
        assert!(!op_attr_allows(&attrs, None));
    }

    #[test]
    fn test_pattern_matches_is_anchored_at_start() {
        assert!(pattern_matches("^lab-.*", "lab-3").unwrap());
        assert!(pattern_matches("lab-.*", "lab-3").unwrap());
        // Matching is from the start of the name, not anywhere inside it.
        assert!(!pattern_matches("lab-.*", "old-lab-3").unwrap());
        assert!(!pattern_matches("lab-.*", "prod-1").unwrap());
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let err = pattern_matches("lab-(", "lab-3").unwrap_err();
        assert!(matches!(err, DomainError::InvalidAttributePattern { .. }));
    }
}
