//! Inventory ledger: per-variant stock counters.
//!
//! `product_variant.stock` is the only stock figure in the system and the
//! functions here are the only writers. Decrements happen exclusively inside
//! the settlement transaction, after the row has been locked with
//! [`lock_stock`].

use sqlx::PgExecutor;

use solehaus_core::VariantId;

use super::RepositoryError;

/// Lock a variant row and read its stock.
///
/// Returns `None` if the variant does not exist. The row lock is held until
/// the surrounding transaction ends, serializing concurrent settlements that
/// touch the same variant.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails (including lock timeouts).
pub async fn lock_stock(
    executor: impl PgExecutor<'_>,
    variant_id: VariantId,
) -> Result<Option<i32>, RepositoryError> {
    let stock = sqlx::query_scalar::<_, i32>(
        "SELECT stock FROM commerce.product_variant WHERE id = $1 FOR UPDATE",
    )
    .bind(variant_id)
    .fetch_optional(executor)
    .await?;

    Ok(stock)
}

/// Read a variant's stock without locking.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn get_stock(
    executor: impl PgExecutor<'_>,
    variant_id: VariantId,
) -> Result<Option<i32>, RepositoryError> {
    let stock = sqlx::query_scalar::<_, i32>(
        "SELECT stock FROM commerce.product_variant WHERE id = $1",
    )
    .bind(variant_id)
    .fetch_optional(executor)
    .await?;

    Ok(stock)
}

/// Decrement a variant's stock by `quantity` and return the new level.
///
/// The `stock >= quantity` guard and the `stock >= 0` check constraint both
/// refuse to go negative; callers lock the row first so the guard never
/// fires in practice.
///
/// # Errors
///
/// Returns `RepositoryError::Conflict` if the stock is insufficient.
/// Returns `RepositoryError::NotFound` if the variant does not exist.
pub async fn decrement(
    executor: impl PgExecutor<'_>,
    variant_id: VariantId,
    quantity: i32,
) -> Result<i32, RepositoryError> {
    let remaining = sqlx::query_scalar::<_, i32>(
        r"
        UPDATE commerce.product_variant
        SET stock = stock - $2, updated_at = NOW()
        WHERE id = $1 AND stock >= $2
        RETURNING stock
        ",
    )
    .bind(variant_id)
    .bind(quantity)
    .fetch_optional(executor)
    .await?;

    remaining.ok_or_else(|| {
        RepositoryError::Conflict(format!("insufficient stock for variant {variant_id}"))
    })
}
