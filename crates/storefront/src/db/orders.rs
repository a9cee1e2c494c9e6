//! Order header and line-item persistence.
//!
//! Enum columns travel as text (`status::text`) and are cast back on write
//! (`$1::commerce.order_status`), so rows decode into plain strings and are
//! validated in `TryFrom<OrderRow>`.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use solehaus_core::{
    CurrencyCode, Email, FulfillmentMode, OrderEventKind, OrderId, OrderItemId, OrderStatus,
    ProductId, TenantId, UserId, VariantId,
};

use super::{RepositoryError, map_unique_violation, parse_column};
use crate::models::{Order, OrderItem, OrderOwner};

macro_rules! select_order {
    ($tail:literal) => {
        concat!(
            r"
            SELECT id, tenant_id, status::text AS status, currency,
                   subtotal_cents, shipping_cents, tax_cents, total_cents,
                   fulfillment::text AS fulfillment, user_id, guest_email,
                   payment_intent_id, refund_amount_cents, idempotency_key, cart_hash,
                   expires_at, paid_at, refunded_at, shipping_carrier, tracking_number,
                   created_at, updated_at
            FROM commerce.sales_order
            ",
            $tail
        )
    };
}

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    tenant_id: TenantId,
    status: String,
    currency: String,
    subtotal_cents: i64,
    shipping_cents: i64,
    tax_cents: i64,
    total_cents: i64,
    fulfillment: String,
    user_id: Option<UserId>,
    guest_email: Option<String>,
    payment_intent_id: Option<String>,
    refund_amount_cents: i64,
    idempotency_key: String,
    cart_hash: String,
    expires_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
    shipping_carrier: Option<String>,
    tracking_number: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let owner = match (row.user_id, row.guest_email) {
            (Some(user_id), None) => OrderOwner::User(user_id),
            (None, Some(email)) => OrderOwner::Guest(Email::parse(&email).map_err(|e| {
                RepositoryError::DataCorruption(format!("invalid guest email in database: {e}"))
            })?),
            _ => {
                return Err(RepositoryError::DataCorruption(format!(
                    "order {} must have exactly one of user_id/guest_email",
                    row.id
                )));
            }
        };

        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            status: parse_column::<OrderStatus>("status", &row.status)?,
            currency: parse_column::<CurrencyCode>("currency", &row.currency)?,
            subtotal_cents: row.subtotal_cents,
            shipping_cents: row.shipping_cents,
            tax_cents: row.tax_cents,
            total_cents: row.total_cents,
            fulfillment: parse_column::<FulfillmentMode>("fulfillment", &row.fulfillment)?,
            owner,
            payment_intent_id: row.payment_intent_id,
            refund_amount_cents: row.refund_amount_cents,
            idempotency_key: row.idempotency_key,
            cart_hash: row.cart_hash,
            expires_at: row.expires_at,
            paid_at: row.paid_at,
            refunded_at: row.refunded_at,
            shipping_carrier: row.shipping_carrier,
            tracking_number: row.tracking_number,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow {
    id: OrderItemId,
    order_id: OrderId,
    product_id: ProductId,
    variant_id: VariantId,
    quantity: i32,
    unit_price_cents: i64,
    unit_cost_cents: i64,
    line_total_cents: i64,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        Self {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            variant_id: row.variant_id,
            quantity: row.quantity,
            unit_price_cents: row.unit_price_cents,
            unit_cost_cents: row.unit_cost_cents,
            line_total_cents: row.line_total_cents,
        }
    }
}

// =============================================================================
// Inputs
// =============================================================================

/// Parameters for inserting a pending order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub tenant_id: TenantId,
    pub currency: CurrencyCode,
    pub subtotal_cents: i64,
    pub shipping_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub fulfillment: FulfillmentMode,
    pub owner: OrderOwner,
    pub idempotency_key: String,
    pub cart_hash: String,
    pub expires_at: DateTime<Utc>,
}

/// Parameters for one line-item snapshot row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub unit_cost_cents: i64,
    pub line_total_cents: i64,
}

/// An order flagged by an unresolved reconciliation event.
#[derive(Debug, Clone)]
pub struct ReconciliationCase {
    pub order: Order,
    pub kind: OrderEventKind,
    pub message: String,
    pub flagged_at: DateTime<Utc>,
}

// =============================================================================
// Queries
// =============================================================================

/// Get an order by ID.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
/// Returns `RepositoryError::DataCorruption` if the stored row is invalid.
pub async fn get(
    executor: impl PgExecutor<'_>,
    id: OrderId,
) -> Result<Option<Order>, RepositoryError> {
    sqlx::query_as::<_, OrderRow>(select_order!("WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await?
        .map(Order::try_from)
        .transpose()
}

/// Get an order by ID and lock its row until the transaction ends.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails (including lock timeouts).
pub async fn get_for_update(
    executor: impl PgExecutor<'_>,
    id: OrderId,
) -> Result<Option<Order>, RepositoryError> {
    sqlx::query_as::<_, OrderRow>(select_order!("WHERE id = $1 FOR UPDATE"))
        .bind(id)
        .fetch_optional(executor)
        .await?
        .map(Order::try_from)
        .transpose()
}

/// Get the order created with a checkout idempotency key.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn get_by_idempotency_key(
    executor: impl PgExecutor<'_>,
    key: &str,
) -> Result<Option<Order>, RepositoryError> {
    sqlx::query_as::<_, OrderRow>(select_order!("WHERE idempotency_key = $1"))
        .bind(key)
        .fetch_optional(executor)
        .await?
        .map(Order::try_from)
        .transpose()
}

/// Get the order paid by a provider payment intent.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn get_by_payment_intent(
    executor: impl PgExecutor<'_>,
    payment_intent_id: &str,
) -> Result<Option<Order>, RepositoryError> {
    sqlx::query_as::<_, OrderRow>(select_order!("WHERE payment_intent_id = $1"))
        .bind(payment_intent_id)
        .fetch_optional(executor)
        .await?
        .map(Order::try_from)
        .transpose()
}

/// Get the line-item snapshot of an order.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn items(
    executor: impl PgExecutor<'_>,
    order_id: OrderId,
) -> Result<Vec<OrderItem>, RepositoryError> {
    let rows = sqlx::query_as::<_, OrderItemRow>(
        r"
        SELECT id, order_id, product_id, variant_id, quantity,
               unit_price_cents, unit_cost_cents, line_total_cents
        FROM commerce.sales_order_item
        WHERE order_id = $1
        ORDER BY variant_id
        ",
    )
    .bind(order_id)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(OrderItem::from).collect())
}

/// Insert a new pending order.
///
/// # Errors
///
/// Returns `RepositoryError::Conflict` if the idempotency key is already used.
/// Returns `RepositoryError::Database` if the query fails.
pub async fn insert(
    executor: impl PgExecutor<'_>,
    order: &NewOrder,
) -> Result<Order, RepositoryError> {
    let row = sqlx::query_as::<_, OrderRow>(
        r"
        INSERT INTO commerce.sales_order (
            tenant_id, status, currency, subtotal_cents, shipping_cents, tax_cents,
            total_cents, fulfillment, user_id, guest_email, idempotency_key,
            cart_hash, expires_at
        )
        VALUES ($1, 'pending', $2, $3, $4, $5, $6, $7::commerce.fulfillment_mode,
                $8, $9, $10, $11, $12)
        RETURNING id, tenant_id, status::text AS status, currency,
                  subtotal_cents, shipping_cents, tax_cents, total_cents,
                  fulfillment::text AS fulfillment, user_id, guest_email,
                  payment_intent_id, refund_amount_cents, idempotency_key, cart_hash,
                  expires_at, paid_at, refunded_at, shipping_carrier, tracking_number,
                  created_at, updated_at
        ",
    )
    .bind(order.tenant_id)
    .bind(order.currency.as_str())
    .bind(order.subtotal_cents)
    .bind(order.shipping_cents)
    .bind(order.tax_cents)
    .bind(order.total_cents)
    .bind(order.fulfillment.as_str())
    .bind(order.owner.user_id())
    .bind(order.owner.guest_email().map(Email::as_str))
    .bind(&order.idempotency_key)
    .bind(&order.cart_hash)
    .bind(order.expires_at)
    .fetch_one(executor)
    .await
    .map_err(|e| map_unique_violation(e, "idempotency key already used"))?;

    row.try_into()
}

/// Insert one line-item snapshot row.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn insert_item(
    executor: impl PgExecutor<'_>,
    order_id: OrderId,
    item: &NewOrderItem,
) -> Result<OrderItemId, RepositoryError> {
    let id = sqlx::query_scalar::<_, OrderItemId>(
        r"
        INSERT INTO commerce.sales_order_item (
            order_id, product_id, variant_id, quantity,
            unit_price_cents, unit_cost_cents, line_total_cents
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        ",
    )
    .bind(order_id)
    .bind(item.product_id)
    .bind(item.variant_id)
    .bind(item.quantity)
    .bind(item.unit_price_cents)
    .bind(item.unit_cost_cents)
    .bind(item.line_total_cents)
    .fetch_one(executor)
    .await?;

    Ok(id)
}

/// Attach the provider payment intent to an order.
///
/// Only writes when no intent is recorded yet (or the same one is), so a
/// replayed checkout can never swap the intent of an existing order.
///
/// # Errors
///
/// Returns `RepositoryError::Conflict` if the intent already belongs to another order.
pub async fn set_payment_intent(
    executor: impl PgExecutor<'_>,
    id: OrderId,
    payment_intent_id: &str,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        r"
        UPDATE commerce.sales_order
        SET payment_intent_id = $2, updated_at = NOW()
        WHERE id = $1 AND (payment_intent_id IS NULL OR payment_intent_id = $2)
        ",
    )
    .bind(id)
    .bind(payment_intent_id)
    .execute(executor)
    .await
    .map_err(|e| map_unique_violation(e, "payment intent already attached to another order"))?;

    Ok(result.rows_affected() == 1)
}

/// Move a pending order to `paid`, recording the payment reference.
///
/// Returns `false` when the order was not pending.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn mark_paid(
    executor: impl PgExecutor<'_>,
    id: OrderId,
    payment_reference: &str,
    paid_at: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        r"
        UPDATE commerce.sales_order
        SET status = 'paid',
            payment_intent_id = COALESCE(payment_intent_id, $2),
            paid_at = $3,
            updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        ",
    )
    .bind(id)
    .bind(payment_reference)
    .bind(paid_at)
    .execute(executor)
    .await
    .map_err(|e| map_unique_violation(e, "payment reference already used by another order"))?;

    Ok(result.rows_affected() == 1)
}

/// Set the status of an order, optionally recording shipment details.
///
/// # Errors
///
/// Returns `RepositoryError::NotFound` if the order does not exist.
pub async fn update_status(
    executor: impl PgExecutor<'_>,
    id: OrderId,
    status: OrderStatus,
    shipment: Option<(&str, &str)>,
) -> Result<(), RepositoryError> {
    let (carrier, tracking) = shipment.unzip();
    let result = sqlx::query(
        r"
        UPDATE commerce.sales_order
        SET status = $2::commerce.order_status,
            shipping_carrier = COALESCE($3, shipping_carrier),
            tracking_number = COALESCE($4, tracking_number),
            updated_at = NOW()
        WHERE id = $1
        ",
    )
    .bind(id)
    .bind(status.as_str())
    .bind(carrier)
    .bind(tracking)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound);
    }
    Ok(())
}

/// Write the cumulative refund amount and the status it implies.
///
/// The `refund_amount_cents <= total_cents` check constraint rejects any
/// amount past the total.
///
/// # Errors
///
/// Returns `RepositoryError::NotFound` if the order does not exist.
pub async fn set_refund_amount(
    executor: impl PgExecutor<'_>,
    id: OrderId,
    refund_amount_cents: i64,
    status: OrderStatus,
    refunded_at: Option<DateTime<Utc>>,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        r"
        UPDATE commerce.sales_order
        SET refund_amount_cents = $2,
            status = $3::commerce.order_status,
            refunded_at = COALESCE($4, refunded_at),
            updated_at = NOW()
        WHERE id = $1
        ",
    )
    .bind(id)
    .bind(refund_amount_cents)
    .bind(status.as_str())
    .bind(refunded_at)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound);
    }
    Ok(())
}

/// Pending orders whose checkout window closed before `now`.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn list_expired_pending(
    executor: impl PgExecutor<'_>,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Order>, RepositoryError> {
    sqlx::query_as::<_, OrderRow>(select_order!(
        "WHERE status = 'pending' AND expires_at <= $1 ORDER BY expires_at LIMIT $2"
    ))
    .bind(now)
    .bind(limit)
    .fetch_all(executor)
    .await?
    .into_iter()
    .map(Order::try_from)
    .collect()
}

#[derive(Debug, sqlx::FromRow)]
struct ReconciliationRow {
    order_id: OrderId,
    kind: String,
    message: String,
    flagged_at: DateTime<Utc>,
}

/// Orders flagged for an operator and not yet resolved.
///
/// A flag is resolved by a later `refund` event: the money went back to the
/// customer. A `stock_conflict` also stops counting once the order leaves
/// `pending`. `payment_conflict` and `refund_reconciliation` stay listed
/// until refunded.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn list_needing_reconciliation(
    pool: &sqlx::PgPool,
) -> Result<Vec<ReconciliationCase>, RepositoryError> {
    let rows = sqlx::query_as::<_, ReconciliationRow>(
        r"
        SELECT DISTINCT ON (e.order_id)
               e.order_id, e.kind::text AS kind, e.message, e.created_at AS flagged_at
        FROM commerce.sales_order_event e
        JOIN commerce.sales_order o ON o.id = e.order_id
        WHERE ((e.kind = 'stock_conflict' AND o.status = 'pending')
               OR e.kind IN ('payment_conflict', 'refund_reconciliation'))
          AND NOT EXISTS (
                SELECT 1 FROM commerce.sales_order_event r
                WHERE r.order_id = e.order_id
                  AND r.kind = 'refund'
                  AND r.created_at >= e.created_at
              )
        ORDER BY e.order_id, e.created_at DESC
        ",
    )
    .fetch_all(pool)
    .await?;

    let mut cases = Vec::with_capacity(rows.len());
    for row in rows {
        let order = get(pool, row.order_id).await?.ok_or(RepositoryError::NotFound)?;
        cases.push(ReconciliationCase {
            order,
            kind: parse_column::<OrderEventKind>("kind", &row.kind)?,
            message: row.message,
            flagged_at: row.flagged_at,
        });
    }
    cases.sort_by_key(|case| case.flagged_at);
    Ok(cases)
}
