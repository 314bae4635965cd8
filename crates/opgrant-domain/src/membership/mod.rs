//! Membership resolution: effective principal sets and named special groups.
//!
//! Role grants are held by accounts and by groups. To find the grants that
//! apply to an operator, the engine needs the operator's *effective
//! principal set*: the operator id plus the groups it belongs to. Superuser
//! and guest-owner predicates additionally need the member sets of a handful
//! of named groups, which this resolver caches with a fixed TTL.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::instrument;

use crate::cache::GroupMemberCache;
use crate::error::{DomainError, DomainResult};
use crate::model::EntityId;

/// Group directory collaborator. Implemented by the surrounding entity
/// layer; this core only consumes it.
#[async_trait]
pub trait GroupReader: Send + Sync {
    /// Resolves a group name to its entity id.
    ///
    /// Returns [`DomainError::GroupNotFound`] for unknown names.
    async fn group_id(&self, name: &str) -> DomainResult<EntityId>;

    /// The direct members of the named group.
    async fn members_of(&self, name: &str) -> DomainResult<HashSet<EntityId>>;

    /// The groups `entity` is a direct member of.
    async fn direct_groups_of(&self, entity: EntityId) -> DomainResult<Vec<EntityId>>;
}

/// How far group membership is expanded when computing the effective
/// principal set.
///
/// This is a deliberate configuration point: grants held by a group that
/// only contains other groups are invisible under `Direct` and visible
/// under `Transitive`. Deployments must choose one and keep it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupExpansion {
    /// Operator plus the groups it is a direct member of (the default).
    #[default]
    Direct,
    /// Fixpoint expansion through nested groups.
    Transitive,
}

/// Configuration for [`MembershipResolver`].
#[derive(Debug, Clone)]
pub struct MembershipConfig {
    /// Name of the group whose members bypass all checks and are shielded
    /// from global-category grants.
    pub superuser_group: String,
    /// Name of the group whose members own guest accounts, when the
    /// deployment uses guest accounts.
    pub guest_owner_group: Option<String>,
    /// Principal-set expansion depth.
    pub expansion: GroupExpansion,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            superuser_group: "superusers".to_string(),
            guest_owner_group: None,
            expansion: GroupExpansion::Direct,
        }
    }
}

impl MembershipConfig {
    /// Sets the superuser group name.
    pub fn with_superuser_group(mut self, name: impl Into<String>) -> Self {
        self.superuser_group = name.into();
        self
    }

    /// Sets the guest-owner group name.
    pub fn with_guest_owner_group(mut self, name: impl Into<String>) -> Self {
        self.guest_owner_group = Some(name.into());
        self
    }

    /// Sets the principal-set expansion depth.
    pub fn with_expansion(mut self, expansion: GroupExpansion) -> Self {
        self.expansion = expansion;
        self
    }
}

/// Resolves operators to principal sets and named groups to member sets.
pub struct MembershipResolver<G> {
    groups: Arc<G>,
    cache: GroupMemberCache,
    config: MembershipConfig,
    /// Superuser group id, resolved on first use for the global-group guard.
    superuser_group_id: OnceCell<EntityId>,
}

impl<G: GroupReader> MembershipResolver<G> {
    /// Creates a new resolver. The cache is injected so tests can pick
    /// their own TTL.
    pub fn new(groups: Arc<G>, cache: GroupMemberCache, config: MembershipConfig) -> Self {
        Self {
            groups,
            cache,
            config,
            superuser_group_id: OnceCell::new(),
        }
    }

    /// Returns the configuration for this resolver.
    pub fn config(&self) -> &MembershipConfig {
        &self.config
    }

    /// The effective principal set for role lookups: the operator plus its
    /// groups, expanded per the configured [`GroupExpansion`].
    #[instrument(skip(self))]
    pub async fn principals(&self, operator: EntityId) -> DomainResult<Vec<EntityId>> {
        let mut principals = vec![operator];
        match self.config.expansion {
            GroupExpansion::Direct => {
                principals.extend(self.groups.direct_groups_of(operator).await?);
            }
            GroupExpansion::Transitive => {
                let mut seen: HashSet<EntityId> = principals.iter().copied().collect();
                let mut frontier = vec![operator];
                while let Some(entity) = frontier.pop() {
                    for group in self.groups.direct_groups_of(entity).await? {
                        if seen.insert(group) {
                            principals.push(group);
                            frontier.push(group);
                        }
                    }
                }
            }
        }
        Ok(principals)
    }

    /// The member set of a named group, served from the TTL cache when
    /// fresh.
    pub async fn members(&self, group_name: &str) -> DomainResult<Arc<HashSet<EntityId>>> {
        if let Some(cached) = self.cache.get(group_name).await {
            return Ok(cached);
        }
        let members = Arc::new(self.groups.members_of(group_name).await?);
        self.cache.insert(group_name, Arc::clone(&members)).await;
        Ok(members)
    }

    /// Whether `entity` is a member of the named group.
    pub async fn is_member_of(&self, entity: EntityId, group_name: &str) -> DomainResult<bool> {
        Ok(self.members(group_name).await?.contains(&entity))
    }

    /// Whether `entity` is a member of the configured superuser group.
    pub async fn is_superuser(&self, entity: EntityId) -> DomainResult<bool> {
        self.is_member_of(entity, &self.config.superuser_group).await
    }

    /// Whether `entity` is a member of the configured guest-owner group.
    /// Always false when no guest-owner group is configured.
    pub async fn is_guest_owner(&self, entity: EntityId) -> DomainResult<bool> {
        match &self.config.guest_owner_group {
            Some(name) => self.is_member_of(entity, name).await,
            None => Ok(false),
        }
    }

    /// The entity id of the superuser group, resolved once.
    pub async fn superuser_group_id(&self) -> DomainResult<EntityId> {
        self.superuser_group_id
            .get_or_try_init(|| self.groups.group_id(&self.config.superuser_group))
            .await
            .copied()
    }
}

impl<G> std::fmt::Debug for MembershipResolver<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipResolver")
            .field("config", &self.config)
            .finish()
    }
}
