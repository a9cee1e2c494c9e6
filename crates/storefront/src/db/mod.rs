//! Database operations for the settlement `PostgreSQL` schema.
//!
//! # Schema: `commerce`
//!
//! ## Tables
//!
//! - `tenant` - Sellers and their payment-provider sub-accounts
//! - `product` / `product_variant` - Catalog; `product_variant.stock` is the inventory ledger
//! - `sales_order` / `sales_order_item` - Order header and immutable line-item snapshot
//! - `sales_order_event` - Append-only audit trail per order
//! - `payment_event` - Provider webhook deduplication ledger
//! - `order_access_token` - Hashed guest access tokens
//!
//! Repository functions take any `PgExecutor`, so the same query runs against
//! the pool or inside a transaction (`&mut *tx`).
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p solehaus-cli -- migrate
//! ```

pub mod access_tokens;
pub mod catalog;
pub mod inventory;
pub mod order_events;
pub mod orders;
pub mod payment_events;

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

/// `SQLSTATE` codes for conflicts that succeed when the transaction is retried:
/// serialization failure, deadlock, lock timeout, statement timeout.
const RETRYABLE_SQLSTATES: &[&str] = &["40001", "40P01", "55P03", "57014"];

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate idempotency key).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Whether retrying the enclosing transaction may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(err) => is_retryable_conflict(err),
            _ => false,
        }
    }
}

/// Whether `err` is a lock or serialization conflict rather than a real failure.
#[must_use]
pub fn is_retryable_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .is_some_and(|code| RETRYABLE_SQLSTATES.contains(&code.as_ref())),
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

/// Map a unique-constraint violation to [`RepositoryError::Conflict`].
pub(crate) fn map_unique_violation(err: sqlx::Error, message: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.is_unique_violation()
    {
        return RepositoryError::Conflict(message.to_owned());
    }
    RepositoryError::Database(err)
}

/// Parse a text column into a domain enum, reporting bad values as corruption.
pub(crate) fn parse_column<T>(column: &str, value: &str) -> Result<T, RepositoryError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| RepositoryError::DataCorruption(format!("invalid {column} in database: {e}")))
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_not_retryable() {
        assert!(!is_retryable_conflict(&sqlx::Error::RowNotFound));
        assert!(is_retryable_conflict(&sqlx::Error::PoolTimedOut));
        assert!(!RepositoryError::NotFound.is_retryable());
        assert!(!RepositoryError::Conflict("dup".to_owned()).is_retryable());
    }

    #[test]
    fn test_parse_column_reports_corruption() {
        let status: Result<solehaus_core::OrderStatus, _> = parse_column("status", "paid");
        assert!(status.is_ok());
        let bad: Result<solehaus_core::OrderStatus, _> = parse_column("status", "lost");
        assert!(matches!(bad, Err(RepositoryError::DataCorruption(msg)) if msg.contains("status")));
    }
}
