//! Integration tests for Solehaus order settlement.
//!
//! # Running Tests
//!
//! The tests use `#[sqlx::test]`, which creates a throwaway database per test
//! and applies `crates/storefront/migrations`. They are ignored by default:
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/solehaus_test \
//!     cargo test -p solehaus-integration-tests -- --ignored
//! ```
//!
//! This library holds the shared fixtures: catalog seeding, an in-memory
//! payment gateway and signed webhook payloads.

#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use secrecy::SecretString;
use sqlx::PgPool;

use solehaus_core::{Email, FulfillmentMode, OrderId, ProductId, TenantId, VariantId};
use solehaus_storefront::config::{CheckoutConfig, SettlementConfig};
use solehaus_storefront::db::orders;
use solehaus_storefront::models::{LineItem, OrderItem, OrderOwner};
use solehaus_storefront::payments::types::ORDER_ID_METADATA_KEY;
use solehaus_storefront::payments::{
    CreatePaymentIntent, CreateRefund, PaymentError, PaymentGateway, PaymentIntent, Refund,
    signature,
};
use solehaus_storefront::services::{
    AccessTokenService, CheckoutRequest, CheckoutService, CheckoutSession, ConfirmationService,
    FulfillmentService, Notifier, RefundService, SettlementService, WebhookService,
};

/// Webhook signing secret shared by [`webhook_service`] and [`sign`].
pub const WEBHOOK_SECRET: &str = "whsec_it_4Rk8Pz2Wq7Nv1Lx5Tb9Hc3";

// =============================================================================
// Catalog
// =============================================================================

/// One seeded sellable variant.
#[derive(Debug, Clone, Copy)]
pub struct Variant {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub price_cents: i64,
}

/// Insert a tenant, a product and one variant with the given price and stock.
pub async fn seed_variant(pool: &PgPool, price_cents: i64, stock: i32) -> Variant {
    let tenant_id: TenantId = sqlx::query_scalar(
        "INSERT INTO commerce.tenant (name) VALUES ('Solehaus Test') RETURNING id",
    )
    .fetch_one(pool)
    .await
    .unwrap();

    add_variant(pool, tenant_id, price_cents, stock).await
}

/// Insert another product with one variant under an existing tenant.
pub async fn add_variant(
    pool: &PgPool,
    tenant_id: TenantId,
    price_cents: i64,
    stock: i32,
) -> Variant {
    let product_id: ProductId = sqlx::query_scalar(
        "INSERT INTO commerce.product (tenant_id, name) VALUES ($1, 'Court Low') RETURNING id",
    )
    .bind(tenant_id)
    .fetch_one(pool)
    .await
    .unwrap();

    let variant_id: VariantId = sqlx::query_scalar(
        r"
        INSERT INTO commerce.product_variant
            (product_id, sku, size_label, price_cents, cost_cents, stock)
        VALUES ($1, $2, 'EU 42', $3, $4, $5)
        RETURNING id
        ",
    )
    .bind(product_id)
    .bind(format!("SKU-{}", uuid::Uuid::new_v4()))
    .bind(price_cents)
    .bind(price_cents / 2)
    .bind(stock)
    .fetch_one(pool)
    .await
    .unwrap();

    Variant {
        tenant_id,
        product_id,
        variant_id,
        price_cents,
    }
}

pub async fn stock_of(pool: &PgPool, variant_id: VariantId) -> i32 {
    solehaus_storefront::db::inventory::get_stock(pool, variant_id)
        .await
        .unwrap()
        .unwrap()
}

pub async fn set_price(pool: &PgPool, variant_id: VariantId, price_cents: i64) {
    sqlx::query("UPDATE commerce.product_variant SET price_cents = $2 WHERE id = $1")
        .bind(variant_id)
        .bind(price_cents)
        .execute(pool)
        .await
        .unwrap();
}

// =============================================================================
// Payment gateway
// =============================================================================

#[derive(Debug, Clone)]
struct StoredIntent {
    amount: i64,
    currency: String,
    order_id: OrderId,
    status: String,
}

#[derive(Debug, Default)]
struct GatewayState {
    intents: HashMap<String, StoredIntent>,
    refunds: Vec<i64>,
}

/// In-memory payment provider.
///
/// Payment intent ids are derived from the order id, so repeated creation
/// for the same order returns the same intent, as the real provider does
/// for a repeated idempotency key.
#[derive(Debug, Clone, Default)]
pub struct FakeGateway {
    state: Arc<Mutex<GatewayState>>,
    refund_delay: Option<Duration>,
    cancel_on_refund: Option<PgPool>,
}

impl FakeGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every refund call for `delay` before answering.
    #[must_use]
    pub fn with_refund_delay(mut self, delay: Duration) -> Self {
        self.refund_delay = Some(delay);
        self
    }

    /// Cancel the refunded order behind the service's back while the
    /// refund call is in flight.
    #[must_use]
    pub fn canceling_orders_on_refund(mut self, pool: &PgPool) -> Self {
        self.cancel_on_refund = Some(pool.clone());
        self
    }

    /// Amounts of every refund issued so far.
    #[must_use]
    pub fn refunds(&self) -> Vec<i64> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .refunds
            .clone()
    }

    /// Move a created intent to `status` (`succeeded`, `processing`, ...).
    pub fn set_intent_status(&self, payment_intent_id: &str, status: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let intent = state
            .intents
            .get_mut(payment_intent_id)
            .unwrap_or_else(|| panic!("unknown intent {payment_intent_id}"));
        intent.status = status.to_owned();
    }

    fn intent(id: &str, stored: &StoredIntent) -> PaymentIntent {
        PaymentIntent {
            id: id.to_owned(),
            client_secret: Some(format!("{id}_secret_test")),
            status: stored.status.clone(),
            amount: stored.amount,
            currency: stored.currency.clone(),
            metadata: HashMap::from([(
                ORDER_ID_METADATA_KEY.to_owned(),
                stored.order_id.to_string(),
            )]),
        }
    }
}

impl PaymentGateway for FakeGateway {
    async fn create_payment_intent(
        &self,
        request: &CreatePaymentIntent<'_>,
    ) -> Result<PaymentIntent, PaymentError> {
        let id = intent_id(request.order_id);
        let stored = StoredIntent {
            amount: request.amount_cents,
            currency: request.currency.as_str().to_owned(),
            order_id: request.order_id,
            status: "requires_payment_method".to_owned(),
        };
        let intent = Self::intent(&id, &stored);
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .intents
            .insert(id, stored);
        Ok(intent)
    }

    async fn retrieve_payment_intent(
        &self,
        _account: Option<&str>,
        payment_intent_id: &str,
    ) -> Result<PaymentIntent, PaymentError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let stored = state
            .intents
            .get(payment_intent_id)
            .ok_or_else(|| PaymentError::Api {
                status: 404,
                code: Some("resource_missing".to_owned()),
                message: format!("no such payment_intent: {payment_intent_id}"),
            })?;
        Ok(Self::intent(payment_intent_id, stored))
    }

    async fn create_refund(&self, request: &CreateRefund<'_>) -> Result<Refund, PaymentError> {
        if let Some(delay) = self.refund_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(pool) = &self.cancel_on_refund {
            sqlx::query("UPDATE commerce.sales_order SET status = 'canceled' WHERE id = $1")
                .bind(request.order_id)
                .execute(pool)
                .await
                .unwrap();
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.refunds.push(request.amount_cents);
        Ok(Refund {
            id: format!("re_test_{}", state.refunds.len()),
            amount: request.amount_cents,
            status: Some("succeeded".to_owned()),
        })
    }
}

/// The payment intent id [`FakeGateway`] assigns to an order.
#[must_use]
pub fn intent_id(order_id: OrderId) -> String {
    format!("pi_test_{}", order_id.as_uuid().simple())
}

// =============================================================================
// Services
// =============================================================================

pub fn tokens(pool: &PgPool) -> AccessTokenService {
    AccessTokenService::new(pool.clone(), CheckoutConfig::default().token_ttl)
}

pub fn checkout(pool: &PgPool, gateway: &FakeGateway) -> CheckoutService<FakeGateway> {
    CheckoutService::new(
        pool.clone(),
        gateway.clone(),
        tokens(pool),
        CheckoutConfig::default(),
    )
}

pub fn settlement(pool: &PgPool) -> SettlementService {
    SettlementService::new(pool.clone(), SettlementConfig::default())
}

pub fn refunds(pool: &PgPool, gateway: &FakeGateway) -> RefundService<FakeGateway> {
    RefundService::new(pool.clone(), gateway.clone(), 1)
}

pub fn confirmations(pool: &PgPool, gateway: &FakeGateway) -> ConfirmationService<FakeGateway> {
    ConfirmationService::new(
        pool.clone(),
        gateway.clone(),
        settlement(pool),
        Notifier::new(None).unwrap(),
    )
}

pub fn fulfillment(pool: &PgPool) -> FulfillmentService {
    FulfillmentService::new(pool.clone())
}

pub fn webhook_service(pool: &PgPool) -> WebhookService {
    WebhookService::new(
        pool.clone(),
        settlement(pool),
        Notifier::new(None).unwrap(),
        SecretString::from(WEBHOOK_SECRET),
        Duration::from_secs(300),
    )
}

// =============================================================================
// Orders
// =============================================================================

/// A guest checkout request for `quantity` units of one variant.
#[must_use]
pub fn guest_request(variant: &Variant, quantity: i32, key: &str) -> CheckoutRequest {
    CheckoutRequest {
        items: vec![LineItem {
            product_id: variant.product_id,
            variant_id: variant.variant_id,
            quantity,
        }],
        idempotency_key: key.to_owned(),
        fulfillment: FulfillmentMode::Pickup,
        owner: OrderOwner::Guest(Email::parse("guest@example.com").unwrap()),
    }
}

/// Place a pending guest order through checkout.
pub async fn place_order(
    pool: &PgPool,
    gateway: &FakeGateway,
    variant: &Variant,
    quantity: i32,
) -> CheckoutSession {
    let key = format!("it-{}", uuid::Uuid::new_v4());
    checkout(pool, gateway)
        .create_session(&guest_request(variant, quantity, &key))
        .await
        .unwrap()
}

/// The line items settlement needs for an order.
pub async fn line_items(pool: &PgPool, order_id: OrderId) -> Vec<LineItem> {
    orders::items(pool, order_id)
        .await
        .unwrap()
        .iter()
        .map(OrderItem::line_item)
        .collect()
}

// =============================================================================
// Webhooks
// =============================================================================

/// A `payment_intent.succeeded` delivery body.
#[must_use]
pub fn payment_succeeded(event_id: &str, order_id: OrderId, amount: i64) -> Vec<u8> {
    payment_succeeded_in(event_id, order_id, amount, "usd")
}

/// A `payment_intent.succeeded` delivery body captured in `currency`.
#[must_use]
pub fn payment_succeeded_in(
    event_id: &str,
    order_id: OrderId,
    amount: i64,
    currency: &str,
) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "id": event_id,
        "type": "payment_intent.succeeded",
        "created": Utc::now().timestamp(),
        "data": { "object": {
            "id": intent_id(order_id),
            "amount": amount,
            "currency": currency,
            "metadata": { "order_id": order_id.to_string() }
        }}
    }))
    .unwrap()
}

/// A `charge.refunded` delivery body carrying the cumulative refunded amount.
#[must_use]
pub fn charge_refunded(
    event_id: &str,
    order_id: OrderId,
    amount: i64,
    amount_refunded: i64,
) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "id": event_id,
        "type": "charge.refunded",
        "created": Utc::now().timestamp(),
        "data": { "object": {
            "id": format!("ch_{event_id}"),
            "payment_intent": intent_id(order_id),
            "amount": amount,
            "amount_refunded": amount_refunded,
            "metadata": { "order_id": order_id.to_string() }
        }}
    }))
    .unwrap()
}

/// Signature header for `payload`, timestamped now.
#[must_use]
pub fn sign(payload: &[u8]) -> String {
    signature::sign(
        &SecretString::from(WEBHOOK_SECRET),
        Utc::now().timestamp(),
        payload,
    )
}
