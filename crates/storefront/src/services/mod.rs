//! Business logic services for the storefront.
//!
//! # Services
//!
//! - `settlement` - Atomic `pending → paid` transition with stock decrement
//! - `webhook` - Provider webhook verification, deduplication and dispatch
//! - `refund` - Provider refunds bounded by the order total
//! - `access_token` - Hashed guest access tokens
//! - `checkout` - Pending order creation with idempotent replay
//! - `confirmation` - Client-driven settlement after the browser confirms payment
//! - `fulfillment` - Ship / pickup / deliver / cancel transitions
//! - `notifications` - Once-per-order downstream notifications
//!
//! Services own a `PgPool` clone and call the repository functions in
//! [`crate::db`]; anything that needs atomicity opens its own transaction.

pub mod access_token;
pub mod checkout;
pub mod confirmation;
pub mod fulfillment;
pub mod notifications;
pub mod refund;
pub mod settlement;
pub mod webhook;

pub use access_token::{AccessTokenError, AccessTokenService, IssuedToken};
pub use checkout::{CheckoutError, CheckoutRequest, CheckoutService, CheckoutSession};
pub use confirmation::{ConfirmError, Confirmation, ConfirmationService};
pub use fulfillment::{FulfillmentError, FulfillmentService, Shipment, TransitionOutcome};
pub use notifications::{Notifier, NotifyError, OrderNotification};
pub use refund::{RefundApplied, RefundError, RefundReceipt, RefundService};
pub use settlement::{SettlementError, SettlementOutcome, SettlementService};
pub use webhook::{WebhookAck, WebhookError, WebhookService};
