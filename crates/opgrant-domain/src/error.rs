//! Domain error types for authorization decisions.

use thiserror::Error;

/// Domain-specific errors for authorization decisions.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An Enforce-mode check was denied. Carries the administrator-facing
    /// reason ("no access to disk", "not authorized to ...").
    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    /// Named group does not exist in the group directory.
    #[error("group not found: {name}")]
    GroupNotFound { name: String },

    /// Disk lookup failed; raised by the disk/host collaborator.
    #[error("disk not found: {disk_id}")]
    DiskNotFound { disk_id: i64 },

    /// A target attribute could not be compiled as a pattern.
    #[error("invalid attribute pattern '{pattern}': {message}")]
    InvalidAttributePattern { pattern: String, message: String },

    /// Infrastructure failure from the grant store or a collaborator.
    #[error("backend error: {message}")]
    Backend { message: String },
}

impl DomainError {
    /// Creates a PermissionDenied error with the given reason.
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            reason: reason.into(),
        }
    }

    /// Creates a GroupNotFound error.
    pub fn group_not_found(name: impl Into<String>) -> Self {
        Self::GroupNotFound { name: name.into() }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
