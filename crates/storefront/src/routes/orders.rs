//! Order status route.
//!
//! Access is granted to the signed-in owner or to anyone holding a valid
//! access token for the order. Every denial, including "no such order",
//! renders the same 404.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use solehaus_core::{
    CurrencyCode, FulfillmentMode, OrderEventKind, OrderId, OrderStatus, ProductId, UserId,
    VariantId,
};

use crate::db::{order_events, orders};
use crate::error::{AppError, Result};
use crate::middleware::OptionalUser;
use crate::models::{Order, OrderEvent, OrderItem};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct OrderQuery {
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderItemView {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub line_total_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct OrderEventView {
    pub kind: OrderEventKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Public view of an order: status, pricing, fulfillment and history.
#[derive(Debug, Serialize)]
pub struct OrderStatusView {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub currency: CurrencyCode,
    pub subtotal_cents: i64,
    pub shipping_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub refund_amount_cents: i64,
    pub fulfillment: FulfillmentMode,
    pub shipping_carrier: Option<String>,
    pub tracking_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItemView>,
    /// Oldest first.
    pub events: Vec<OrderEventView>,
}

impl OrderStatusView {
    /// Build the view; internal audit fields (actor, cost) are left out.
    #[must_use]
    pub fn new(order: Order, items: Vec<OrderItem>, events: Vec<OrderEvent>) -> Self {
        Self {
            order_id: order.id,
            status: order.status,
            currency: order.currency,
            subtotal_cents: order.subtotal_cents,
            shipping_cents: order.shipping_cents,
            tax_cents: order.tax_cents,
            total_cents: order.total_cents,
            refund_amount_cents: order.refund_amount_cents,
            fulfillment: order.fulfillment,
            shipping_carrier: order.shipping_carrier,
            tracking_number: order.tracking_number,
            created_at: order.created_at,
            paid_at: order.paid_at,
            items: items
                .into_iter()
                .map(|item| OrderItemView {
                    product_id: item.product_id,
                    variant_id: item.variant_id,
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price_cents,
                    line_total_cents: item.line_total_cents,
                })
                .collect(),
            events: events
                .into_iter()
                .map(|event| OrderEventView {
                    kind: event.kind,
                    message: event.message,
                    created_at: event.created_at,
                })
                .collect(),
        }
    }
}

/// Allow the signed-in owner, or anyone presenting a valid access token.
///
/// # Errors
///
/// Every denial is `AppError::NotFound`.
pub(crate) async fn authorize(
    state: &AppState,
    order: &Order,
    user: Option<UserId>,
    token: Option<&str>,
) -> Result<()> {
    if user.is_some_and(|id| order.owner.user_id() == Some(id)) {
        return Ok(());
    }
    let token = token.ok_or(AppError::NotFound)?;
    state.tokens().validate(order.id, token).await?;
    Ok(())
}

/// `GET /api/orders/{id}` with either the owner's identity or `?token=`.
pub async fn show(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
    Query(query): Query<OrderQuery>,
    OptionalUser(user): OptionalUser,
) -> Result<Json<OrderStatusView>> {
    if user.is_none() && query.token.is_none() {
        return Err(AppError::NotFound);
    }

    let order = orders::get(state.pool(), order_id)
        .await?
        .ok_or(AppError::NotFound)?;
    authorize(&state, &order, user, query.token.as_deref()).await?;

    let items = orders::items(state.pool(), order_id).await?;
    let events = order_events::list(state.pool(), order_id).await?;
    Ok(Json(OrderStatusView::new(order, items, events)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::tests::pending_order;
    use solehaus_core::OrderItemId;

    #[test]
    fn test_view_uses_snapshot_prices_and_hides_internals() {
        let order = pending_order(2400);
        let item = OrderItem {
            id: OrderItemId::generate(),
            order_id: order.id,
            product_id: ProductId::generate(),
            variant_id: VariantId::generate(),
            quantity: 2,
            unit_price_cents: 1200,
            unit_cost_cents: 500,
            line_total_cents: 2400,
        };
        let event = OrderEvent {
            id: 1,
            order_id: order.id,
            kind: OrderEventKind::Created,
            message: "Order created".to_string(),
            actor: "checkout".to_string(),
            created_at: order.created_at,
        };

        let view = OrderStatusView::new(order, vec![item], vec![event]);
        let json = serde_json::to_value(&view).unwrap_or_default();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["items"][0]["line_total_cents"], 2400);
        assert!(json["items"][0].get("unit_cost_cents").is_none());
        assert_eq!(json["events"][0]["kind"], "created");
        assert!(json["events"][0].get("actor").is_none());
    }
}
