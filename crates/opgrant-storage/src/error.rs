//! Storage error types.

use thiserror::Error;

use opgrant_domain::EntityId;

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Operation set not found by id.
    #[error("operation set not found: {op_set_id}")]
    OpSetNotFound { op_set_id: EntityId },

    /// Operation set not found by name.
    #[error("operation set not found: {name}")]
    OpSetNameNotFound { name: String },

    /// Operation entry not found.
    #[error("operation not found: {op_id}")]
    OperationNotFound { op_id: EntityId },

    /// Operation target not found.
    #[error("operation target not found: {op_target_id}")]
    TargetNotFound { op_target_id: EntityId },

    /// Delete rejected because role grants still reference the row.
    #[error("{kind} {id} is still referenced by {role_count} role grant(s)")]
    StillReferenced {
        kind: &'static str,
        id: EntityId,
        role_count: usize,
    },

    /// Target violates the global/entity invariant: global target types
    /// carry no entity id, concrete ones require one.
    #[error("invalid target: {message}")]
    InvalidTarget { message: String },

    /// A persisted operation code this build does not know.
    #[error("unknown operation code: {code}")]
    UnknownOperationCode { code: i32 },

    /// A persisted target type this build does not know.
    #[error("unknown target type: {code}")]
    UnknownTargetType { code: i32 },

    /// Database connection error.
    #[error("database connection error: {message}")]
    ConnectionError { message: String },

    /// Database query error.
    #[error("database query error: {message}")]
    QueryError { message: String },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
