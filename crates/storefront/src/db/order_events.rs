//! Append-only order audit trail.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use solehaus_core::{OrderEventKind, OrderId};

use super::{RepositoryError, parse_column};
use crate::models::OrderEvent;

#[derive(Debug, sqlx::FromRow)]
struct OrderEventRow {
    id: i64,
    order_id: OrderId,
    kind: String,
    message: String,
    actor: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderEventRow> for OrderEvent {
    type Error = RepositoryError;

    fn try_from(row: OrderEventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            order_id: row.order_id,
            kind: parse_column::<OrderEventKind>("kind", &row.kind)?,
            message: row.message,
            actor: row.actor,
            created_at: row.created_at,
        })
    }
}

/// Append an event to an order's trail.
///
/// Kinds that may occur once per order (see
/// [`OrderEventKind::is_once_per_order`]) are deduplicated by a partial unique
/// index; a second append of such a kind is silently dropped. Returns whether
/// a row was written, which callers use as an "emit this side effect once"
/// guard.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn append(
    executor: impl PgExecutor<'_>,
    order_id: OrderId,
    kind: OrderEventKind,
    message: &str,
    actor: &str,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        r"
        INSERT INTO commerce.sales_order_event (order_id, kind, message, actor)
        VALUES ($1, $2::commerce.order_event_kind, $3, $4)
        ON CONFLICT DO NOTHING
        ",
    )
    .bind(order_id)
    .bind(kind.as_str())
    .bind(message)
    .bind(actor)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// All events of an order, oldest first.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn list(
    executor: impl PgExecutor<'_>,
    order_id: OrderId,
) -> Result<Vec<OrderEvent>, RepositoryError> {
    sqlx::query_as::<_, OrderEventRow>(
        r"
        SELECT id, order_id, kind::text AS kind, message, actor, created_at
        FROM commerce.sales_order_event
        WHERE order_id = $1
        ORDER BY created_at, id
        ",
    )
    .bind(order_id)
    .fetch_all(executor)
    .await?
    .into_iter()
    .map(OrderEvent::try_from)
    .collect()
}

/// Number of events of one kind recorded for an order.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn count(
    executor: impl PgExecutor<'_>,
    order_id: OrderId,
    kind: OrderEventKind,
) -> Result<i64, RepositoryError> {
    let count = sqlx::query_scalar::<_, i64>(
        r"
        SELECT COUNT(*)
        FROM commerce.sales_order_event
        WHERE order_id = $1 AND kind = $2::commerce.order_event_kind
        ",
    )
    .bind(order_id)
    .bind(kind.as_str())
    .fetch_one(executor)
    .await?;

    Ok(count)
}
