//! Tenant scoping for inventory ingestion.
//!
//! Every read, insert, and uniqueness check performed by this crate is
//! partitioned by a [`TenantScope`]: the `(client_account_id, engagement_id)`
//! pair supplied by the caller. A scope with a nil component is treated as
//! missing and rejected before any store access happens.
//!
//! # Example
//!
//! ```rust
//! use aw_core::scope::TenantScope;
//!
//! let scope = TenantScope::parse(
//!     Some("6f1c1f4e-8e0e-4bb9-9d6c-2d6f1c5a0b11"),
//!     Some("0b6c3a1e-5d0f-4c3e-8a6b-7e2f9c1d4a22"),
//! )
//! .unwrap();
//! assert!(scope.validate().is_ok());
//!
//! assert!(TenantScope::parse(None, Some("0b6c3a1e-5d0f-4c3e-8a6b-7e2f9c1d4a22")).is_err());
//! ```

use crate::models::Asset;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised when a tenant scope is absent or malformed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    /// The client account identifier is missing or nil.
    #[error("client_account_id is required")]
    MissingClientAccount,

    /// The engagement identifier is missing or nil.
    #[error("engagement_id is required")]
    MissingEngagement,

    /// An identifier could not be parsed as a UUID.
    #[error("Invalid {field}: {value}")]
    InvalidIdentifier { field: &'static str, value: String },
}

/// The `(client_account_id, engagement_id)` pair partitioning all asset data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantScope {
    /// Client account owning the data.
    pub client_account_id: Uuid,
    /// Engagement within the client account.
    pub engagement_id: Uuid,
}

impl TenantScope {
    /// Creates a validated scope.
    pub fn new(client_account_id: Uuid, engagement_id: Uuid) -> Result<Self, ScopeError> {
        let scope = Self {
            client_account_id,
            engagement_id,
        };
        scope.validate()?;
        Ok(scope)
    }

    /// Parses a scope from the raw identifiers handed over by a request context.
    pub fn parse(
        client_account_id: Option<&str>,
        engagement_id: Option<&str>,
    ) -> Result<Self, ScopeError> {
        let client = parse_component(
            client_account_id,
            "client_account_id",
            ScopeError::MissingClientAccount,
        )?;
        let engagement = parse_component(
            engagement_id,
            "engagement_id",
            ScopeError::MissingEngagement,
        )?;
        Self::new(client, engagement)
    }

    /// Rejects scopes with a nil component.
    pub fn validate(&self) -> Result<(), ScopeError> {
        if self.client_account_id.is_nil() {
            return Err(ScopeError::MissingClientAccount);
        }
        if self.engagement_id.is_nil() {
            return Err(ScopeError::MissingEngagement);
        }
        Ok(())
    }

    /// Returns true if the asset belongs to this scope.
    pub fn contains(&self, asset: &Asset) -> bool {
        asset.client_account_id == self.client_account_id
            && asset.engagement_id == self.engagement_id
    }
}

impl std::fmt::Display for TenantScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.client_account_id, self.engagement_id)
    }
}

fn parse_component(
    raw: Option<&str>,
    field: &'static str,
    missing: ScopeError,
) -> Result<Uuid, ScopeError> {
    let raw = match raw.map(str::trim) {
        Some(value) if !value.is_empty() => value,
        _ => return Err(missing),
    };
    Uuid::parse_str(raw).map_err(|_| ScopeError::InvalidIdentifier {
        field,
        value: raw.to_string(),
    })
}
