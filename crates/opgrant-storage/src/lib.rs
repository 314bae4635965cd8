//! opgrant-storage: Persistence for the authorization tables
//!
//! This crate provides storage for the operation-grant model:
//! - AccessStore trait over the six auth tables
//! - In-memory implementation (tests, single-process deployments)
//! - PostgreSQL implementation (production)
//! - Change-tracking upsert records for grant tooling
//! - The dangling-role maintenance sweep
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              opgrant-storage                │
//! ├─────────────────────────────────────────────┤
//! │  traits.rs      - AccessStore trait, rows   │
//! │  memory.rs      - In-memory implementation  │
//! │  postgres.rs    - PostgreSQL implementation │
//! │  record.rs      - Upsert records            │
//! │  adapter.rs     - GrantReader adapter       │
//! │  maintenance.rs - Dangling-role sweep       │
//! └─────────────────────────────────────────────┘
//! ```

pub mod adapter;
pub mod error;
pub mod maintenance;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod traits;

// Re-export commonly used types
pub use adapter::StoreGrantReader;
pub use error::{StorageError, StorageResult};
pub use maintenance::{sweep_dangling_roles, SweepReport};
pub use memory::MemoryAccessStore;
pub use postgres::{schema_sql, PostgresAccessStore, PostgresConfig};
pub use record::{create_or_update_op_set, create_or_update_target, OpSetRecord, TargetRecord};
pub use traits::{AccessStore, OpSetRow, OperationRow, RoleRow, TargetFilter, TargetRow};
