//! Order domain types.

use chrono::{DateTime, Utc};
use solehaus_core::{
    CurrencyCode, Email, FulfillmentMode, Money, OrderEventKind, OrderId, OrderItemId,
    OrderStatus, ProductId, TenantId, UserId, VariantId,
};

/// Who placed an order: a signed-in user or a guest identified by email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderOwner {
    User(UserId),
    Guest(Email),
}

impl OrderOwner {
    /// The signed-in user, if any.
    #[must_use]
    pub const fn user_id(&self) -> Option<UserId> {
        match self {
            Self::User(id) => Some(*id),
            Self::Guest(_) => None,
        }
    }

    /// The guest email, if any.
    #[must_use]
    pub const fn guest_email(&self) -> Option<&Email> {
        match self {
            Self::User(_) => None,
            Self::Guest(email) => Some(email),
        }
    }

    /// Whether this is a guest checkout.
    #[must_use]
    pub const fn is_guest(&self) -> bool {
        matches!(self, Self::Guest(_))
    }
}

/// An order header (domain type).
#[derive(Debug, Clone)]
pub struct Order {
    pub id: OrderId,
    pub tenant_id: TenantId,
    pub status: OrderStatus,
    pub currency: CurrencyCode,
    pub subtotal_cents: i64,
    pub shipping_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub fulfillment: FulfillmentMode,
    pub owner: OrderOwner,
    /// Provider payment intent, set once checkout has talked to the provider.
    pub payment_intent_id: Option<String>,
    /// Cumulative refunded amount; never exceeds `total_cents`.
    pub refund_amount_cents: i64,
    /// Client-supplied checkout idempotency key.
    pub idempotency_key: String,
    /// Fingerprint of the cart the key was first used with.
    pub cart_hash: String,
    /// Unpaid orders past this instant are no longer payable.
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub shipping_carrier: Option<String>,
    pub tracking_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Order total as [`Money`].
    #[must_use]
    pub const fn total(&self) -> Money {
        Money::from_cents(self.total_cents, self.currency)
    }

    /// Amount that can still be refunded.
    #[must_use]
    pub const fn refundable_cents(&self) -> i64 {
        self.total_cents.saturating_sub(self.refund_amount_cents)
    }

    /// Whether a pending order has outlived its checkout window.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::Pending && self.expires_at <= now
    }
}

/// One priced line of an order, captured at checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub unit_cost_cents: i64,
    pub line_total_cents: i64,
}

impl OrderItem {
    /// The stock movement this line requires at settlement.
    #[must_use]
    pub const fn line_item(&self) -> LineItem {
        LineItem {
            product_id: self.product_id,
            variant_id: self.variant_id,
            quantity: self.quantity,
        }
    }
}

/// A `(product, variant, quantity)` triple handed to settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineItem {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub quantity: i32,
}

/// One entry of an order's audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderEvent {
    pub id: i64,
    pub order_id: OrderId,
    pub kind: OrderEventKind,
    pub message: String,
    /// Who caused the event (`checkout`, `webhook:<event id>`, `admin`, ...).
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    /// A pending guest order for unit tests.
    pub(crate) fn pending_order(total_cents: i64) -> Order {
        let now = Utc::now();
        Order {
            id: OrderId::generate(),
            tenant_id: TenantId::generate(),
            status: OrderStatus::Pending,
            currency: CurrencyCode::Usd,
            subtotal_cents: total_cents,
            shipping_cents: 0,
            tax_cents: 0,
            total_cents,
            fulfillment: FulfillmentMode::Ship,
            owner: OrderOwner::Guest(Email::parse("guest@example.com").unwrap()),
            payment_intent_id: None,
            refund_amount_cents: 0,
            idempotency_key: "test-key-0001".to_owned(),
            cart_hash: String::new(),
            expires_at: now + chrono::Duration::minutes(60),
            paid_at: None,
            refunded_at: None,
            shipping_carrier: None,
            tracking_number: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_refundable_cents() {
        let mut order = pending_order(5000);
        order.refund_amount_cents = 1200;
        assert_eq!(order.refundable_cents(), 3800);
        assert_eq!(order.total().to_string(), "$50.00");
    }

    #[test]
    fn test_is_expired_only_for_pending() {
        let mut order = pending_order(100);
        let later = order.expires_at + chrono::Duration::seconds(1);
        assert!(order.is_expired(later));
        order.status = OrderStatus::Paid;
        assert!(!order.is_expired(later));
    }

    #[test]
    fn test_owner_accessors() {
        let user = OrderOwner::User(UserId::generate());
        assert!(user.user_id().is_some());
        assert!(!user.is_guest());
        let order = pending_order(1);
        assert_eq!(
            order.owner.guest_email().map(Email::as_str),
            Some("guest@example.com")
        );
    }
}
