//! opgrant-domain: Core authorization decision logic
//!
//! This crate contains the decision side of the operation-grant model:
//! - Model types (operation codes, target types, decisions)
//! - Membership resolution (effective principal sets, special groups)
//! - The authorization decision engine
//! - The two decision-path caches
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               opgrant-domain                │
//! ├─────────────────────────────────────────────┤
//! │  model/      - Codes, targets, decisions    │
//! │  membership/ - Principal-set resolution     │
//! │  engine/     - Decision engine              │
//! │  cache/      - Group & any-perm caches      │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Persistence for the grant tables lives in `opgrant-storage`; the engine
//! only sees the narrow reader traits defined in [`engine`].

pub mod cache;
pub mod engine;
pub mod error;
pub mod membership;
pub mod model;

// Re-export commonly used types at the crate root
pub use cache::{AnyPermCache, AnyPermCacheConfig, GroupCacheConfig, GroupMemberCache};
pub use engine::{AccessEngine, DiskReader, GrantReader};
pub use error::{DomainError, DomainResult};
pub use membership::{GroupExpansion, GroupReader, MembershipConfig, MembershipResolver};
pub use model::{
    CheckMode, Decision, DiskInfo, EntityId, GrantMatch, OperationCode, TargetRef, TargetType,
};
