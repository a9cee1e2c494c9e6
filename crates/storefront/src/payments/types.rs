//! Provider request, response and webhook event types.

use std::collections::HashMap;

use serde::Deserialize;
use solehaus_core::{CurrencyCode, OrderId};

/// Webhook event type for a captured payment.
pub const PAYMENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";
/// Webhook event type for a failed payment attempt.
pub const PAYMENT_INTENT_FAILED: &str = "payment_intent.payment_failed";
/// Webhook event type for a (partial) refund of a charge.
pub const CHARGE_REFUNDED: &str = "charge.refunded";

/// Payment intent status once funds are captured.
pub const INTENT_SUCCEEDED: &str = "succeeded";
/// Payment intent status while the provider is still confirming funds.
pub const INTENT_PROCESSING: &str = "processing";

/// Metadata key carrying our order id on intents, charges and refunds.
pub const ORDER_ID_METADATA_KEY: &str = "order_id";

// =============================================================================
// Outbound
// =============================================================================

/// Parameters for creating a payment intent.
#[derive(Debug, Clone)]
pub struct CreatePaymentIntent<'a> {
    /// Connected sub-account of the tenant; `None` charges the platform account.
    pub account: Option<&'a str>,
    pub amount_cents: i64,
    pub currency: CurrencyCode,
    pub order_id: OrderId,
    pub idempotency_key: String,
}

/// Parameters for refunding a payment intent.
#[derive(Debug, Clone)]
pub struct CreateRefund<'a> {
    pub account: Option<&'a str>,
    pub payment_intent_id: &'a str,
    pub amount_cents: i64,
    pub order_id: OrderId,
    pub idempotency_key: String,
}

/// A payment intent as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    /// Secret handed to the browser to confirm the payment.
    pub client_secret: Option<String>,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A refund as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Refund {
    pub id: String,
    pub amount: i64,
    pub status: Option<String>,
}

/// Error envelope of a failed provider call.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorDetail {
    pub code: Option<String>,
    pub message: Option<String>,
}

// =============================================================================
// Inbound webhooks
// =============================================================================

/// The envelope of every webhook delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Globally unique event id (`evt_...`); the deduplication key.
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Unix seconds at which the provider created the event.
    pub created: i64,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

/// The `data.object` of a `payment_intent.*` event.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntentObject {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// The `data.object` of a `charge.*` event.
#[derive(Debug, Clone, Deserialize)]
pub struct ChargeObject {
    pub id: String,
    pub payment_intent: Option<String>,
    pub amount: i64,
    /// Cumulative amount refunded on this charge so far.
    pub amount_refunded: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A webhook event decoded by type.
#[derive(Debug, Clone)]
pub enum EventPayload {
    PaymentSucceeded(PaymentIntentObject),
    ChargeRefunded(ChargeObject),
    /// Any type this service does not act on.
    Unhandled,
}

impl WebhookEvent {
    /// Decode `data.object` according to the event type.
    ///
    /// # Errors
    ///
    /// Returns an error if the object does not match the shape its type implies.
    pub fn payload(&self) -> Result<EventPayload, serde_json::Error> {
        Ok(match self.event_type.as_str() {
            PAYMENT_INTENT_SUCCEEDED => {
                EventPayload::PaymentSucceeded(serde_json::from_value(self.data.object.clone())?)
            }
            CHARGE_REFUNDED => {
                EventPayload::ChargeRefunded(serde_json::from_value(self.data.object.clone())?)
            }
            _ => EventPayload::Unhandled,
        })
    }
}

/// Read our order id from provider metadata, ignoring malformed values.
#[must_use]
pub fn metadata_order_id(metadata: &HashMap<String, String>) -> Option<OrderId> {
    metadata
        .get(ORDER_ID_METADATA_KEY)
        .and_then(|raw| raw.parse().ok())
}

/// Whether a provider-reported currency (lowercase ISO) is `expected`.
#[must_use]
pub fn currency_matches(reported: &str, expected: CurrencyCode) -> bool {
    reported.eq_ignore_ascii_case(expected.as_str())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_payment_succeeded() {
        let order_id = OrderId::generate();
        let raw = serde_json::json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "created": 1_700_000_000,
            "data": {"object": {
                "id": "pi_1",
                "amount": 4200,
                "currency": "usd",
                "metadata": {"order_id": order_id.to_string()}
            }}
        });
        let event: WebhookEvent = serde_json::from_value(raw).unwrap();
        match event.payload().unwrap() {
            EventPayload::PaymentSucceeded(intent) => {
                assert_eq!(intent.id, "pi_1");
                assert_eq!(metadata_order_id(&intent.metadata), Some(order_id));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_decode_charge_refunded() {
        let raw = serde_json::json!({
            "id": "evt_2",
            "type": "charge.refunded",
            "created": 1_700_000_100,
            "data": {"object": {
                "id": "ch_1",
                "payment_intent": "pi_1",
                "amount": 4200,
                "amount_refunded": 1000
            }}
        });
        let event: WebhookEvent = serde_json::from_value(raw).unwrap();
        match event.payload().unwrap() {
            EventPayload::ChargeRefunded(charge) => {
                assert_eq!(charge.amount_refunded, 1000);
                assert!(charge.metadata.is_empty());
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_unhandled_types_skip_object_decoding() {
        let raw = serde_json::json!({
            "id": "evt_3",
            "type": "customer.created",
            "created": 1,
            "data": {"object": {"whatever": true}}
        });
        let event: WebhookEvent = serde_json::from_value(raw).unwrap();
        assert!(matches!(event.payload().unwrap(), EventPayload::Unhandled));
    }

    #[test]
    fn test_metadata_order_id_ignores_garbage() {
        let mut metadata = HashMap::new();
        metadata.insert(ORDER_ID_METADATA_KEY.to_string(), "not-a-uuid".to_string());
        assert_eq!(metadata_order_id(&metadata), None);
    }

    #[test]
    fn test_currency_match_ignores_case() {
        assert!(currency_matches("usd", CurrencyCode::Usd));
        assert!(currency_matches("USD", CurrencyCode::Usd));
        assert!(!currency_matches("jpy", CurrencyCode::Usd));
        assert!(!currency_matches("", CurrencyCode::Eur));
    }
}
