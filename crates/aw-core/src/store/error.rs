//! Record store error types.

use thiserror::Error;

/// Errors that can occur during record store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Store connection error.
    #[error("Store connection error: {0}")]
    Connection(String),

    /// Query execution error.
    #[error("Query error: {0}")]
    Query(String),

    /// Duplicate key on the tenant-scoped identity of an asset.
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// Any other constraint failure (not-null, foreign key, check).
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Transaction or savepoint error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Invalid configuration.
    #[error("Invalid store configuration: {0}")]
    Configuration(String),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(String),
}

impl StoreError {
    /// True for a duplicate key on the tenant-scoped identity.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }

    /// True for any constraint failure, including uniqueness.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            StoreError::UniqueViolation(_) | StoreError::IntegrityViolation(_)
        )
    }
}

/// Result alias for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(feature = "database")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;

        match err {
            sqlx::Error::Database(db_err) => match db_err.kind() {
                ErrorKind::UniqueViolation => StoreError::UniqueViolation(db_err.message().to_string()),
                ErrorKind::NotNullViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::CheckViolation => {
                    StoreError::IntegrityViolation(db_err.message().to_string())
                }
                _ => StoreError::Query(db_err.message().to_string()),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Connection(err.to_string())
            }
            sqlx::Error::Configuration(msg) => StoreError::Configuration(msg.to_string()),
            _ => StoreError::Query(err.to_string()),
        }
    }
}

#[cfg(feature = "database")]
impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Migration(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
