//! Client-driven payment confirmation.
//!
//! After the browser confirms a payment it asks the storefront to settle the
//! order instead of waiting for the webhook. Both paths end in
//! [`SettlementService::mark_paid_transactionally`], so whichever arrives
//! second finds the order already paid.
//!
//! The intent is always re-read from the provider; nothing the client sends
//! about the payment is trusted beyond the intent id. Conflicts found here
//! are reported to the caller only: the webhook for the same payment flags
//! them for reconciliation.

use sqlx::PgPool;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use solehaus_core::{OrderId, OrderStatus};

use super::notifications::Notifier;
use super::settlement::{SettlementError, SettlementOutcome, SettlementService};
use crate::db::{RepositoryError, catalog, orders};
use crate::models::{Order, OrderItem};
use crate::payments::types::{
    INTENT_PROCESSING, INTENT_SUCCEEDED, currency_matches, metadata_order_id,
};
use crate::payments::{PaymentError, PaymentGateway};

/// Errors that can occur while confirming a payment.
#[derive(Debug, Error)]
pub enum ConfirmError {
    #[error("payment intent id is required")]
    MissingIntent,

    /// The intent belongs to another order, or the order expects another intent.
    #[error("payment intent {0} does not belong to this order")]
    IntentMismatch(String),

    /// The captured amount or currency differs from the order.
    #[error("payment of {paid} {currency} does not match the order")]
    AmountMismatch { paid: i64, currency: String },

    #[error("payment not completed (intent status {0})")]
    NotSucceeded(String),

    /// The order was canceled before the payment could settle it.
    #[error("order can no longer be paid while {0}")]
    NotPayable(OrderStatus),

    #[error(transparent)]
    Settlement(SettlementError),

    #[error(transparent)]
    Provider(#[from] PaymentError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Result of a confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The provider is still confirming funds; the webhook will settle.
    Processing,
    /// This call settled the order.
    Settled,
    /// The order had already been settled (typically by the webhook).
    AlreadySettled { status: OrderStatus },
}

/// Settles orders on behalf of the paying client.
#[derive(Debug, Clone)]
pub struct ConfirmationService<G> {
    pool: PgPool,
    gateway: G,
    settlement: SettlementService,
    notifier: Notifier,
}

impl<G: PaymentGateway> ConfirmationService<G> {
    #[must_use]
    pub const fn new(
        pool: PgPool,
        gateway: G,
        settlement: SettlementService,
        notifier: Notifier,
    ) -> Self {
        Self {
            pool,
            gateway,
            settlement,
            notifier,
        }
    }

    /// Verify `payment_intent_id` with the provider and settle `order`.
    ///
    /// The caller must already have authorized access to the order.
    ///
    /// # Errors
    ///
    /// - `ConfirmError::IntentMismatch` / `AmountMismatch` if the intent does
    ///   not pay for this order
    /// - `ConfirmError::NotSucceeded` if the payment failed or needs action
    /// - `ConfirmError::NotPayable` if the order was canceled meanwhile
    /// - `ConfirmError::Settlement` for insufficient stock or storage failures
    /// - `ConfirmError::Provider` if the intent cannot be fetched
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn confirm(
        &self,
        order: &Order,
        payment_intent_id: &str,
    ) -> Result<Confirmation, ConfirmError> {
        let payment_intent_id = payment_intent_id.trim();
        if payment_intent_id.is_empty() {
            return Err(ConfirmError::MissingIntent);
        }
        if order
            .payment_intent_id
            .as_deref()
            .is_some_and(|recorded| recorded != payment_intent_id)
        {
            warn!(order_id = %order.id, payment_intent_id, "Confirmation for a foreign intent");
            return Err(ConfirmError::IntentMismatch(payment_intent_id.to_owned()));
        }

        let account = catalog::payment_account(&self.pool, order.tenant_id).await?;
        let intent = self
            .gateway
            .retrieve_payment_intent(account.as_deref(), payment_intent_id)
            .await?;

        if metadata_order_id(&intent.metadata).is_some_and(|id| id != order.id) {
            warn!(order_id = %order.id, payment_intent_id, "Intent metadata names another order");
            return Err(ConfirmError::IntentMismatch(intent.id));
        }
        if intent.status == INTENT_PROCESSING {
            info!(order_id = %order.id, "Payment still processing");
            return Ok(Confirmation::Processing);
        }
        if intent.status != INTENT_SUCCEEDED {
            return Err(ConfirmError::NotSucceeded(intent.status));
        }
        if intent.amount != order.total_cents || !currency_matches(&intent.currency, order.currency)
        {
            error!(
                order_id = %order.id,
                payment_intent_id = %intent.id,
                paid = intent.amount,
                paid_currency = %intent.currency,
                expected = order.total_cents,
                "Confirmed payment does not match the order"
            );
            return Err(ConfirmError::AmountMismatch {
                paid: intent.amount,
                currency: intent.currency,
            });
        }

        if order.payment_intent_id.is_none()
            && !orders::set_payment_intent(&self.pool, order.id, &intent.id).await?
        {
            return Err(ConfirmError::IntentMismatch(intent.id));
        }

        self.settle(order.id, &intent.id).await
    }

    async fn settle(
        &self,
        order_id: OrderId,
        payment_intent_id: &str,
    ) -> Result<Confirmation, ConfirmError> {
        let line_items: Vec<_> = orders::items(&self.pool, order_id)
            .await?
            .iter()
            .map(OrderItem::line_item)
            .collect();

        let outcome = self
            .settlement
            .mark_paid_transactionally(order_id, payment_intent_id, &line_items)
            .await
            .map_err(|err| {
                if matches!(err, SettlementError::InsufficientStock { .. }) {
                    error!(
                        %order_id,
                        payment_intent_id,
                        error = %err,
                        "Confirmed payment but stock could not be reserved"
                    );
                }
                ConfirmError::Settlement(err)
            })?;

        match outcome {
            SettlementOutcome::Settled => {
                self.notifier.notify_paid(&self.pool, order_id).await;
                Ok(Confirmation::Settled)
            }
            SettlementOutcome::AlreadySettled { status } => {
                Ok(Confirmation::AlreadySettled { status })
            }
            SettlementOutcome::NotPayable { status } => Err(ConfirmError::NotPayable(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettlementConfig;
    use crate::models::order::tests::pending_order;
    use crate::payments::{CreatePaymentIntent, CreateRefund, PaymentIntent, Refund};
    use sqlx::postgres::PgPoolOptions;

    /// Gateway that must never be reached.
    struct Unreachable;

    impl PaymentGateway for Unreachable {
        async fn create_payment_intent(
            &self,
            _request: &CreatePaymentIntent<'_>,
        ) -> Result<PaymentIntent, PaymentError> {
            panic!("unexpected provider call")
        }

        async fn retrieve_payment_intent(
            &self,
            _account: Option<&str>,
            _payment_intent_id: &str,
        ) -> Result<PaymentIntent, PaymentError> {
            panic!("unexpected provider call")
        }

        async fn create_refund(&self, _request: &CreateRefund<'_>) -> Result<Refund, PaymentError> {
            panic!("unexpected provider call")
        }
    }

    fn service() -> ConfirmationService<Unreachable> {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://solehaus@127.0.0.1:9/unused")
            .unwrap_or_else(|e| panic!("lazy pool: {e}"));
        ConfirmationService::new(
            pool.clone(),
            Unreachable,
            SettlementService::new(pool, SettlementConfig::default()),
            Notifier::new(None).unwrap_or_else(|e| panic!("notifier: {e}")),
        )
    }

    #[tokio::test]
    async fn test_blank_intent_is_rejected() {
        let order = pending_order(1000);
        let result = service().confirm(&order, "  ").await;
        assert!(matches!(result, Err(ConfirmError::MissingIntent)));
    }

    #[tokio::test]
    async fn test_foreign_intent_is_rejected_before_provider_call() {
        let mut order = pending_order(1000);
        order.payment_intent_id = Some("pi_own".to_string());
        let result = service().confirm(&order, "pi_other").await;
        assert!(matches!(result, Err(ConfirmError::IntentMismatch(id)) if id == "pi_other"));
    }
}
