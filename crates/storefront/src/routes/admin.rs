//! Operator routes: refunds, fulfillment transitions, access tokens and the
//! reconciliation queue.
//!
//! All handlers sit behind [`crate::middleware::require_admin`].

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use solehaus_core::{OrderEventKind, OrderId, OrderStatus};

use crate::db::orders;
use crate::error::{AppError, Result};
use crate::services::fulfillment::shipment_from_parts;
use crate::services::{RefundReceipt, TransitionOutcome};
use crate::state::AppState;

const ADMIN_ACTOR: &str = "admin";

#[derive(Debug, Default, Deserialize)]
pub struct RefundInput {
    /// Omit to refund everything still refundable.
    pub amount_cents: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShipInput {
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelInput {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IssuedTokenView {
    pub order_id: OrderId,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ReconciliationView {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub total_cents: i64,
    pub refund_amount_cents: i64,
    pub kind: OrderEventKind,
    pub message: String,
    pub flagged_at: DateTime<Utc>,
}

/// `POST /admin/orders/{id}/refund`
pub async fn refund(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
    Json(input): Json<RefundInput>,
) -> Result<Json<RefundReceipt>> {
    let receipt = state
        .refunds()
        .refund(order_id, input.amount_cents, ADMIN_ACTOR)
        .await?;
    Ok(Json(receipt))
}

/// `POST /admin/orders/{id}/ship`
pub async fn ship(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
    Json(input): Json<ShipInput>,
) -> Result<Json<TransitionOutcome>> {
    let shipment = shipment_from_parts(input.carrier, input.tracking_number)?;
    let outcome = state
        .fulfillment()
        .ship(order_id, shipment, ADMIN_ACTOR)
        .await?;
    Ok(Json(outcome))
}

/// `POST /admin/orders/{id}/pickup`
pub async fn pickup(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<TransitionOutcome>> {
    Ok(Json(state.fulfillment().pickup(order_id, ADMIN_ACTOR).await?))
}

/// `POST /admin/orders/{id}/deliver`
pub async fn deliver(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<TransitionOutcome>> {
    Ok(Json(state.fulfillment().deliver(order_id, ADMIN_ACTOR).await?))
}

/// `POST /admin/orders/{id}/cancel`
pub async fn cancel(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
    Json(input): Json<CancelInput>,
) -> Result<Json<TransitionOutcome>> {
    let reason = input
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
        .unwrap_or("canceled by operator");
    Ok(Json(
        state
            .fulfillment()
            .cancel(order_id, reason, ADMIN_ACTOR)
            .await?,
    ))
}

/// `POST /admin/orders/{id}/access-tokens`
///
/// The plaintext token is returned once and never stored.
pub async fn issue_token(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
) -> Result<(StatusCode, Json<IssuedTokenView>)> {
    orders::get(state.pool(), order_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let issued = state.tokens().issue(order_id, ADMIN_ACTOR).await?;
    info!(%order_id, "Access token issued by operator");
    Ok((
        StatusCode::CREATED,
        Json(IssuedTokenView {
            order_id,
            token: issued.token,
            expires_at: issued.expires_at,
        }),
    ))
}

/// `DELETE /admin/orders/{id}/access-tokens`
pub async fn revoke_tokens(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Value>> {
    let revoked = state.tokens().revoke_all(order_id, ADMIN_ACTOR).await?;
    Ok(Json(json!({ "order_id": order_id, "revoked": revoked })))
}

/// `GET /admin/reconciliation`
///
/// Orders flagged for manual review, oldest flag first.
pub async fn reconciliation(
    State(state): State<AppState>,
) -> Result<Json<Vec<ReconciliationView>>> {
    let cases = orders::list_needing_reconciliation(state.pool()).await?;
    Ok(Json(
        cases
            .into_iter()
            .map(|case| ReconciliationView {
                order_id: case.order.id,
                status: case.order.status,
                total_cents: case.order.total_cents,
                refund_amount_cents: case.order.refund_amount_cents,
                kind: case.kind,
                message: case.message,
                flagged_at: case.flagged_at,
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inputs_accept_empty_bodies() {
        let refund: RefundInput = serde_json::from_str("{}").unwrap_or_default();
        assert_eq!(refund.amount_cents, None);

        let ship: ShipInput = serde_json::from_str(r#"{"carrier":"UPS","tracking_number":"1Z"}"#)
            .unwrap_or_default();
        assert_eq!(ship.carrier.as_deref(), Some("UPS"));

        let cancel: CancelInput = serde_json::from_str("{}").unwrap_or_default();
        assert!(cancel.reason.is_none());
    }
}
