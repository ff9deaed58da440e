//! SQLite connection pool management.

use super::StoreError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Escapes `%`, `_` and `\` so a name fragment matches literally inside
/// `LIKE ... ESCAPE '\'`.
///
/// ```
/// use aw_core::store::escape_like_pattern;
///
/// assert_eq!(escape_like_pattern("web_01%"), r"web\_01\%");
/// ```
pub fn escape_like_pattern(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len() * 2);
    for c in pattern.chars() {
        match c {
            '%' | '_' | '\\' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Connection pool sizing.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a session may wait for a free connection.
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

fn env_or<T: FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(fallback)
}

impl Default for PoolOptions {
    /// Reads `ASSET_WARDEN_DB_MAX_CONNECTIONS` and
    /// `ASSET_WARDEN_DB_ACQUIRE_TIMEOUT_SECS`.
    fn default() -> Self {
        Self {
            max_connections: env_or("ASSET_WARDEN_DB_MAX_CONNECTIONS", 5),
            min_connections: 1,
            acquire_timeout: Duration::from_secs(env_or("ASSET_WARDEN_DB_ACQUIRE_TIMEOUT_SECS", 30)),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}

/// Creates a SQLite connection pool from a database URL (`sqlite:` scheme).
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, StoreError> {
    create_pool_with_options(database_url, PoolOptions::default()).await
}

/// Creates a SQLite connection pool with custom options.
///
/// In-memory databases are limited to a single connection so that every
/// session sees the same database.
pub async fn create_pool_with_options(
    database_url: &str,
    options: PoolOptions,
) -> Result<SqlitePool, StoreError> {
    if !database_url.starts_with("sqlite:") {
        return Err(StoreError::Configuration(format!(
            "Unsupported database URL scheme. Expected sqlite:, got: {}",
            database_url.split(':').next().unwrap_or("unknown")
        )));
    }

    let connect_options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
    let max_connections = if in_memory { 1 } else { options.max_connections };

    info!(max_connections, "Creating SQLite connection pool");
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .min_connections(options.min_connections.min(max_connections))
        .acquire_timeout(options.acquire_timeout)
        .idle_timeout(options.idle_timeout)
        .connect_with(connect_options)
        .await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like_pattern() {
        assert_eq!(escape_like_pattern("srv"), "srv");
        assert_eq!(escape_like_pattern("100%_done"), r"100\%\_done");
        assert_eq!(escape_like_pattern(r"a\b"), r"a\\b");
    }

    #[tokio::test]
    async fn test_rejects_unknown_scheme() {
        let err = create_pool("postgres://localhost/assets").await.unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));
    }
}
