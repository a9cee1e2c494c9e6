//! Checkout session creation.
//!
//! Turns a cart into a `pending` order with a price snapshot, then asks the
//! provider for a payment intent. The client's idempotency key makes the
//! whole operation replayable:
//!
//! - same key, same cart: the existing order is returned (transparent replay)
//! - same key, different cart: [`CheckoutError::CartMismatch`]
//! - same key, order expired or canceled: [`CheckoutError::CheckoutExpired`]
//!
//! The payment intent is created outside the order transaction with the
//! provider idempotency key `pi:{order_id}`, so a replay after a failed
//! provider call converges on the same intent.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, instrument, warn};

use solehaus_core::{
    CurrencyCode, FulfillmentMode, OrderEventKind, OrderId, OrderStatus, ProductId, TenantId,
    VariantId,
};

use super::access_token::{AccessTokenError, AccessTokenService, IssuedToken};
use crate::config::CheckoutConfig;
use crate::db::{RepositoryError, catalog, order_events, orders};
use crate::models::{LineItem, Order, OrderOwner, VariantSnapshot};
use crate::payments::{CreatePaymentIntent, PaymentError, PaymentGateway, PaymentIntent};

pub const MAX_LINE_ITEMS: usize = 50;
pub const MAX_QUANTITY: i32 = 99;
pub const MIN_IDEMPOTENCY_KEY_LEN: usize = 8;
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

const CHECKOUT_ACTOR: &str = "checkout";

/// Errors that can occur while creating a checkout session.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("invalid checkout: {0}")]
    Validation(String),

    /// The idempotency key was first used with a different cart.
    #[error("idempotency key already used for a different cart")]
    CartMismatch,

    /// The idempotency key belongs to an order that can no longer be paid.
    #[error("checkout for this idempotency key has expired")]
    CheckoutExpired,

    #[error("variant {0} not found")]
    UnknownVariant(VariantId),

    #[error(
        "insufficient stock for variant {variant_id}: requested {requested}, available {available}"
    )]
    OutOfStock {
        variant_id: VariantId,
        requested: i32,
        available: i32,
    },

    #[error(transparent)]
    Provider(#[from] PaymentError),

    #[error(transparent)]
    AccessToken(#[from] AccessTokenError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<sqlx::Error> for CheckoutError {
    fn from(err: sqlx::Error) -> Self {
        Self::Repository(err.into())
    }
}

/// A checkout request after transport decoding.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub items: Vec<LineItem>,
    pub idempotency_key: String,
    pub fulfillment: FulfillmentMode,
    pub owner: OrderOwner,
}

/// What the buyer's browser needs to confirm payment.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub client_secret: String,
    pub currency: CurrencyCode,
    pub subtotal_cents: i64,
    pub shipping_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub fulfillment: FulfillmentMode,
    pub expires_at: DateTime<Utc>,
    /// Guest access token; only present for guest checkouts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Whether this response replays an earlier request.
    pub replayed: bool,
}

/// Merge duplicate variants, validate quantities and return lines sorted by variant.
///
/// # Errors
///
/// Returns `CheckoutError::Validation` for an empty or oversized cart, a
/// quantity outside `1..=99`, or one variant listed under two products.
pub fn normalize_items(items: &[LineItem]) -> Result<Vec<LineItem>, CheckoutError> {
    if items.is_empty() {
        return Err(CheckoutError::Validation("cart is empty".to_owned()));
    }
    if items.len() > MAX_LINE_ITEMS {
        return Err(CheckoutError::Validation(format!(
            "at most {MAX_LINE_ITEMS} line items allowed"
        )));
    }

    let mut merged: BTreeMap<VariantId, (ProductId, i32)> = BTreeMap::new();
    for item in items {
        if !(1..=MAX_QUANTITY).contains(&item.quantity) {
            return Err(CheckoutError::Validation(format!(
                "quantity for variant {} must be between 1 and {MAX_QUANTITY}",
                item.variant_id
            )));
        }
        let entry = merged
            .entry(item.variant_id)
            .or_insert((item.product_id, 0));
        if entry.0 != item.product_id {
            return Err(CheckoutError::Validation(format!(
                "variant {} listed under two products",
                item.variant_id
            )));
        }
        entry.1 += item.quantity;
        if entry.1 > MAX_QUANTITY {
            return Err(CheckoutError::Validation(format!(
                "quantity for variant {} must be between 1 and {MAX_QUANTITY}",
                item.variant_id
            )));
        }
    }

    Ok(merged
        .into_iter()
        .map(|(variant_id, (product_id, quantity))| LineItem {
            product_id,
            variant_id,
            quantity,
        })
        .collect())
}

/// Validate a client-supplied idempotency key.
///
/// # Errors
///
/// Returns `CheckoutError::Validation` if the key is too short, too long or
/// contains whitespace or control characters.
pub fn validate_idempotency_key(key: &str) -> Result<(), CheckoutError> {
    let len = key.chars().count();
    if !(MIN_IDEMPOTENCY_KEY_LEN..=MAX_IDEMPOTENCY_KEY_LEN).contains(&len) {
        return Err(CheckoutError::Validation(format!(
            "idempotency key must be {MIN_IDEMPOTENCY_KEY_LEN} to {MAX_IDEMPOTENCY_KEY_LEN} characters"
        )));
    }
    if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(CheckoutError::Validation(
            "idempotency key must not contain whitespace".to_owned(),
        ));
    }
    Ok(())
}

/// Fingerprint of a normalized cart and fulfillment mode.
#[must_use]
pub fn cart_hash(items: &[LineItem], fulfillment: FulfillmentMode) -> String {
    let mut hasher = Sha256::new();
    for item in items {
        hasher.update(format!("{}:{};", item.variant_id, item.quantity).as_bytes());
    }
    hasher.update(fulfillment.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

/// Priced order lines and totals computed from catalog snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedCart {
    pub tenant_id: TenantId,
    pub items: Vec<orders::NewOrderItem>,
    pub subtotal_cents: i64,
    pub shipping_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
}

/// Price normalized lines against current catalog rows.
///
/// # Errors
///
/// Returns `CheckoutError::UnknownVariant` for a missing variant,
/// `CheckoutError::OutOfStock` if stock is already short, and
/// `CheckoutError::Validation` for mixed tenants, a zero total or overflow.
pub fn price_cart(
    items: &[LineItem],
    variants: &[VariantSnapshot],
    fulfillment: FulfillmentMode,
    flat_shipping_cents: i64,
) -> Result<PricedCart, CheckoutError> {
    let overflow = || CheckoutError::Validation("order total out of range".to_owned());

    let mut tenant_id = None;
    let mut priced = Vec::with_capacity(items.len());
    let mut subtotal_cents: i64 = 0;

    for item in items {
        let variant = variants
            .iter()
            .find(|v| v.id == item.variant_id && v.product_id == item.product_id)
            .ok_or(CheckoutError::UnknownVariant(item.variant_id))?;

        match tenant_id {
            None => tenant_id = Some(variant.tenant_id),
            Some(tenant) if tenant != variant.tenant_id => {
                return Err(CheckoutError::Validation(
                    "all items must come from the same store".to_owned(),
                ));
            }
            Some(_) => {}
        }

        if variant.stock < item.quantity {
            return Err(CheckoutError::OutOfStock {
                variant_id: item.variant_id,
                requested: item.quantity,
                available: variant.stock,
            });
        }

        let line_total_cents = variant
            .price_cents
            .checked_mul(i64::from(item.quantity))
            .ok_or_else(overflow)?;
        subtotal_cents = subtotal_cents
            .checked_add(line_total_cents)
            .ok_or_else(overflow)?;

        priced.push(orders::NewOrderItem {
            product_id: item.product_id,
            variant_id: item.variant_id,
            quantity: item.quantity,
            unit_price_cents: variant.price_cents,
            unit_cost_cents: variant.cost_cents,
            line_total_cents,
        });
    }

    let shipping_cents = match fulfillment {
        FulfillmentMode::Ship => flat_shipping_cents,
        FulfillmentMode::Pickup => 0,
    };
    // Tax is computed by the external tax service; nothing is collected here.
    let tax_cents = 0;
    let total_cents = subtotal_cents
        .checked_add(shipping_cents)
        .and_then(|t| t.checked_add(tax_cents))
        .ok_or_else(overflow)?;
    if total_cents <= 0 {
        return Err(CheckoutError::Validation(
            "order total must be positive".to_owned(),
        ));
    }

    Ok(PricedCart {
        tenant_id: tenant_id
            .ok_or_else(|| CheckoutError::Validation("cart is empty".to_owned()))?,
        items: priced,
        subtotal_cents,
        shipping_cents,
        tax_cents,
        total_cents,
    })
}

/// Creates pending orders and their payment intents.
#[derive(Debug, Clone)]
pub struct CheckoutService<G> {
    pool: PgPool,
    gateway: G,
    tokens: AccessTokenService,
    config: CheckoutConfig,
}

impl<G: PaymentGateway> CheckoutService<G> {
    #[must_use]
    pub const fn new(
        pool: PgPool,
        gateway: G,
        tokens: AccessTokenService,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            pool,
            gateway,
            tokens,
            config,
        }
    }

    /// Create (or replay) a checkout session.
    ///
    /// # Errors
    ///
    /// See [`CheckoutError`]; `CartMismatch` and `CheckoutExpired` are only
    /// returned for a reused idempotency key.
    #[instrument(skip(self, request), fields(idempotency_key = %request.idempotency_key))]
    pub async fn create_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, CheckoutError> {
        validate_idempotency_key(&request.idempotency_key)?;
        let items = normalize_items(&request.items)?;
        let hash = cart_hash(&items, request.fulfillment);

        if let Some(existing) =
            orders::get_by_idempotency_key(&self.pool, &request.idempotency_key).await?
        {
            return self.replay(existing, &hash, &request.owner).await;
        }

        let variant_ids: Vec<VariantId> = items.iter().map(|item| item.variant_id).collect();
        let variants = catalog::variants_by_ids(&self.pool, &variant_ids).await?;
        let cart = price_cart(
            &items,
            &variants,
            request.fulfillment,
            self.config.flat_shipping_cents,
        )?;

        let new_order = orders::NewOrder {
            tenant_id: cart.tenant_id,
            currency: self.config.currency,
            subtotal_cents: cart.subtotal_cents,
            shipping_cents: cart.shipping_cents,
            tax_cents: cart.tax_cents,
            total_cents: cart.total_cents,
            fulfillment: request.fulfillment,
            owner: request.owner.clone(),
            idempotency_key: request.idempotency_key.clone(),
            cart_hash: hash.clone(),
            expires_at: Utc::now() + self.config.order_ttl,
        };

        let order = match self.insert_order(&new_order, &cart.items).await {
            Ok(order) => order,
            Err(CheckoutError::Repository(RepositoryError::Conflict(_))) => {
                // Lost an insert race on the idempotency key; replay the winner.
                let existing =
                    orders::get_by_idempotency_key(&self.pool, &request.idempotency_key)
                        .await?
                        .ok_or(RepositoryError::NotFound)?;
                return self.replay(existing, &hash, &request.owner).await;
            }
            Err(err) => return Err(err),
        };

        info!(
            order_id = %order.id,
            total_cents = order.total_cents,
            items = cart.items.len(),
            "Pending order created"
        );

        self.session_for(order, false).await
    }

    async fn insert_order(
        &self,
        new_order: &orders::NewOrder,
        items: &[orders::NewOrderItem],
    ) -> Result<Order, CheckoutError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::insert(&mut *tx, new_order).await?;
        for item in items {
            orders::insert_item(&mut *tx, order.id, item).await?;
        }
        order_events::append(
            &mut *tx,
            order.id,
            OrderEventKind::Created,
            &format!(
                "Order created: {} line(s), total {}",
                items.len(),
                order.total()
            ),
            CHECKOUT_ACTOR,
        )
        .await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn replay(
        &self,
        existing: Order,
        hash: &str,
        owner: &OrderOwner,
    ) -> Result<CheckoutSession, CheckoutError> {
        if existing.cart_hash != hash || &existing.owner != owner {
            warn!(order_id = %existing.id, "Idempotency key reused for a different cart");
            return Err(CheckoutError::CartMismatch);
        }
        if existing.status == OrderStatus::Canceled || existing.is_expired(Utc::now()) {
            info!(order_id = %existing.id, status = %existing.status, "Replay of expired checkout");
            return Err(CheckoutError::CheckoutExpired);
        }

        info!(order_id = %existing.id, "Checkout replayed");
        self.session_for(existing, true).await
    }

    /// Attach (or re-read) the payment intent and build the response.
    async fn session_for(
        &self,
        order: Order,
        replayed: bool,
    ) -> Result<CheckoutSession, CheckoutError> {
        let account = catalog::payment_account(&self.pool, order.tenant_id).await?;
        let intent = self.ensure_payment_intent(&order, account.as_deref()).await?;
        let client_secret = intent.client_secret.ok_or_else(|| {
            PaymentError::Response(format!("payment intent {} has no client secret", intent.id))
        })?;

        let access_token = match &order.owner {
            OrderOwner::Guest(_) => {
                let IssuedToken { token, .. } =
                    self.tokens.issue(order.id, CHECKOUT_ACTOR).await?;
                Some(token)
            }
            OrderOwner::User(_) => None,
        };

        Ok(CheckoutSession {
            order_id: order.id,
            status: order.status,
            client_secret,
            currency: order.currency,
            subtotal_cents: order.subtotal_cents,
            shipping_cents: order.shipping_cents,
            tax_cents: order.tax_cents,
            total_cents: order.total_cents,
            fulfillment: order.fulfillment,
            expires_at: order.expires_at,
            access_token,
            replayed,
        })
    }

    async fn ensure_payment_intent(
        &self,
        order: &Order,
        account: Option<&str>,
    ) -> Result<PaymentIntent, CheckoutError> {
        if let Some(payment_intent_id) = &order.payment_intent_id {
            return Ok(self
                .gateway
                .retrieve_payment_intent(account, payment_intent_id)
                .await?);
        }

        let intent = self
            .gateway
            .create_payment_intent(&CreatePaymentIntent {
                account,
                amount_cents: order.total_cents,
                currency: order.currency,
                order_id: order.id,
                idempotency_key: format!("pi:{}", order.id),
            })
            .await?;

        if !orders::set_payment_intent(&self.pool, order.id, &intent.id).await? {
            return Err(RepositoryError::Conflict(format!(
                "order {} already has a different payment intent",
                order.id
            ))
            .into());
        }
        Ok(intent)
    }
}
