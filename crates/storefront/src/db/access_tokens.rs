//! Guest order access tokens. Only SHA-256 digests are stored.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use solehaus_core::{AccessTokenId, OrderId};

use super::RepositoryError;

/// A stored token digest that is neither revoked nor expired.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LiveToken {
    pub id: AccessTokenId,
    pub token_hash: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

/// Store the digest of a freshly issued token.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn insert(
    executor: impl PgExecutor<'_>,
    order_id: OrderId,
    token_hash: &[u8],
    expires_at: DateTime<Utc>,
) -> Result<AccessTokenId, RepositoryError> {
    let id = sqlx::query_scalar::<_, AccessTokenId>(
        r"
        INSERT INTO commerce.order_access_token (order_id, token_hash, expires_at)
        VALUES ($1, $2, $3)
        RETURNING id
        ",
    )
    .bind(order_id)
    .bind(token_hash)
    .bind(expires_at)
    .fetch_one(executor)
    .await?;

    Ok(id)
}

/// Tokens of an order still usable at `now`.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn live_for_order(
    executor: impl PgExecutor<'_>,
    order_id: OrderId,
    now: DateTime<Utc>,
) -> Result<Vec<LiveToken>, RepositoryError> {
    let tokens = sqlx::query_as::<_, LiveToken>(
        r"
        SELECT id, token_hash, expires_at
        FROM commerce.order_access_token
        WHERE order_id = $1 AND revoked_at IS NULL AND expires_at > $2
        ",
    )
    .bind(order_id)
    .bind(now)
    .fetch_all(executor)
    .await?;

    Ok(tokens)
}

/// Record a successful use of a token.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn touch(
    executor: impl PgExecutor<'_>,
    id: AccessTokenId,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    sqlx::query("UPDATE commerce.order_access_token SET last_used_at = $2 WHERE id = $1")
        .bind(id)
        .bind(now)
        .execute(executor)
        .await?;

    Ok(())
}

/// When a token was last used.
///
/// # Errors
///
/// Returns `RepositoryError::NotFound` if the token does not exist.
pub async fn last_used_at(
    executor: impl PgExecutor<'_>,
    id: AccessTokenId,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
        "SELECT last_used_at FROM commerce.order_access_token WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(executor)
    .await?
    .ok_or(RepositoryError::NotFound)
}

/// Revoke every live token of an order. Returns how many were revoked.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn revoke_all(
    executor: impl PgExecutor<'_>,
    order_id: OrderId,
    now: DateTime<Utc>,
) -> Result<u64, RepositoryError> {
    let result = sqlx::query(
        r"
        UPDATE commerce.order_access_token
        SET revoked_at = $2
        WHERE order_id = $1 AND revoked_at IS NULL
        ",
    )
    .bind(order_id)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}
