//! Checkout session and payment confirmation routes.

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

use solehaus_core::{Email, FulfillmentMode, OrderId, OrderStatus, ProductId, VariantId};

use super::orders::authorize;
use crate::db::orders;
use crate::error::{AppError, Result};
use crate::middleware::OptionalUser;
use crate::models::{LineItem, OrderOwner};
use crate::services::{CheckoutRequest, CheckoutSession, Confirmation};
use crate::state::AppState;

/// One cart line as sent by the checkout client.
#[derive(Debug, Deserialize)]
pub struct CheckoutItemInput {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub quantity: i32,
}

/// Request body of `POST /api/checkout/session`.
#[derive(Debug, Deserialize)]
pub struct CheckoutSessionInput {
    pub items: Vec<CheckoutItemInput>,
    pub idempotency_key: String,
    #[serde(default)]
    pub fulfillment: FulfillmentMode,
    /// Required when no signed-in user is present.
    pub guest_email: Option<String>,
}

impl CheckoutSessionInput {
    /// Resolve the buyer and convert to a service request.
    fn into_request(self, user: OptionalUser) -> Result<CheckoutRequest> {
        let owner = match (user.0, self.guest_email) {
            (Some(user_id), _) => OrderOwner::User(user_id),
            (None, Some(email)) => OrderOwner::Guest(
                Email::parse(&email).map_err(|e| AppError::Validation(e.to_string()))?,
            ),
            (None, None) => {
                return Err(AppError::Validation(
                    "guest_email is required for guest checkout".to_string(),
                ));
            }
        };

        Ok(CheckoutRequest {
            items: self
                .items
                .into_iter()
                .map(|item| LineItem {
                    product_id: item.product_id,
                    variant_id: item.variant_id,
                    quantity: item.quantity,
                })
                .collect(),
            idempotency_key: self.idempotency_key,
            fulfillment: self.fulfillment,
            owner,
        })
    }
}

/// Create (or replay) a checkout session.
///
/// Responds 201 for a new order and 200 for a replay of the same
/// idempotency key.
pub async fn create_session(
    State(state): State<AppState>,
    user: OptionalUser,
    Json(input): Json<CheckoutSessionInput>,
) -> Result<(StatusCode, Json<CheckoutSession>)> {
    let request = input.into_request(user)?;
    let session = state.checkout().create_session(&request).await?;

    let status = if session.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(session)))
}

/// Request body of `POST /api/checkout/confirm`.
#[derive(Debug, Deserialize)]
pub struct ConfirmInput {
    pub order_id: OrderId,
    pub payment_intent_id: String,
    /// Access token for guest orders.
    pub token: Option<String>,
}

/// Response of `POST /api/checkout/confirm`.
#[derive(Debug, Serialize)]
pub struct ConfirmView {
    pub order_id: OrderId,
    pub processing: bool,
    pub already_paid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
}

impl ConfirmView {
    fn new(order_id: OrderId, confirmation: Confirmation) -> (StatusCode, Self) {
        let (code, processing, already_paid, status) = match confirmation {
            Confirmation::Processing => (StatusCode::ACCEPTED, true, false, None),
            Confirmation::Settled => (StatusCode::OK, false, false, Some(OrderStatus::Paid)),
            Confirmation::AlreadySettled { status } => (StatusCode::OK, false, true, Some(status)),
        };
        (
            code,
            Self {
                order_id,
                processing,
                already_paid,
                status,
            },
        )
    }
}

/// Settle an order once the client has confirmed its payment.
///
/// Responds 202 while the provider is still processing the payment.
pub async fn confirm(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
    Json(input): Json<ConfirmInput>,
) -> Result<(StatusCode, Json<ConfirmView>)> {
    if user.is_none() && input.token.is_none() {
        return Err(AppError::NotFound);
    }

    let order = orders::get(state.pool(), input.order_id)
        .await?
        .ok_or(AppError::NotFound)?;
    authorize(&state, &order, user, input.token.as_deref()).await?;

    let confirmation = state
        .confirmations()
        .confirm(&order, &input.payment_intent_id)
        .await?;
    let (code, view) = ConfirmView::new(order.id, confirmation);
    Ok((code, Json(view)))
}
