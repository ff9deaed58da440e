//! Top-level error type for ingestion operations.

use crate::field_policy::{FieldError, FieldPolicyError};
use crate::scope::ScopeError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors returned by the resolver, conflict detector, merge engine and
/// ingestion service.
#[derive(Error, Debug)]
pub enum DedupError {
    /// The tenant scope is missing or malformed. Never retried.
    #[error("Missing tenant scope: {0}")]
    MissingTenantScope(#[from] ScopeError),

    /// A field value could not be assigned.
    #[error(transparent)]
    Field(#[from] FieldError),

    /// The field policy or a custom allowlist is invalid.
    #[error("Invalid field policy: {0}")]
    Policy(#[from] FieldPolicyError),

    /// Invalid service configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A store error, passed through unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DedupError {
    /// Returns the underlying store error, if any.
    pub fn as_store_error(&self) -> Option<&StoreError> {
        match self {
            DedupError::Store(err) => Some(err),
            _ => None,
        }
    }
}

/// Result alias for ingestion operations.
pub type DedupResult<T> = Result<T, DedupError>;
