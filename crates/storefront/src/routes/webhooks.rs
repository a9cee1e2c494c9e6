//! Payment provider webhook route.
//!
//! The body is taken as raw `Bytes`: the signature covers the exact bytes
//! sent, so it must be verified before any JSON parsing. Every authentic
//! delivery is acknowledged with 200, including ones that cannot be decoded.

use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use serde_json::{Value, json};

use crate::error::{Result, add_breadcrumb};
use crate::payments::signature::SIGNATURE_HEADER;
use crate::services::WebhookAck;
use crate::state::AppState;

/// `POST /api/webhooks/stripe`
pub async fn stripe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let ack = state.webhooks().handle(signature, &body).await?;

    let response = match ack {
        WebhookAck::Duplicate { event_id } => {
            add_breadcrumb("webhook", "Duplicate event", Some(&[("event_id", &event_id)]));
            json!({ "received": true, "duplicate": true })
        }
        WebhookAck::Processed { event_id, outcome } => {
            add_breadcrumb(
                "webhook",
                "Event processed",
                Some(&[("event_id", &event_id), ("outcome", outcome)]),
            );
            json!({ "received": true, "duplicate": false, "outcome": outcome })
        }
        WebhookAck::Malformed { reason } => {
            add_breadcrumb("webhook", "Malformed event", Some(&[("reason", &reason)]));
            json!({ "received": true, "duplicate": false, "outcome": "malformed" })
        }
    };
    Ok(Json(response))
}
