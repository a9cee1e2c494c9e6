//! Payment provider integration.
//!
//! [`PaymentGateway`] is the seam between the settlement services and the
//! provider: checkout creates payment intents through it and refunds are
//! issued through it. [`StripeClient`] is the production implementation;
//! tests substitute their own.
//!
//! Inbound webhooks are authenticated with [`signature::verify`] and decoded
//! with the types in [`types`].

pub mod client;
pub mod error;
pub mod signature;
pub mod types;

use std::future::Future;

pub use client::StripeClient;
pub use error::PaymentError;
pub use types::{CreatePaymentIntent, CreateRefund, PaymentIntent, Refund};

/// Operations the settlement services need from the payment provider.
///
/// Every mutating call carries an idempotency key so a retried call never
/// charges or refunds twice.
pub trait PaymentGateway: Send + Sync {
    /// Create a payment intent for an order.
    fn create_payment_intent(
        &self,
        request: &CreatePaymentIntent<'_>,
    ) -> impl Future<Output = Result<PaymentIntent, PaymentError>> + Send;

    /// Fetch an existing payment intent (used to re-read the client secret on replay).
    fn retrieve_payment_intent(
        &self,
        account: Option<&str>,
        payment_intent_id: &str,
    ) -> impl Future<Output = Result<PaymentIntent, PaymentError>> + Send;

    /// Refund part or all of a captured payment.
    fn create_refund(
        &self,
        request: &CreateRefund<'_>,
    ) -> impl Future<Output = Result<Refund, PaymentError>> + Send;
}
