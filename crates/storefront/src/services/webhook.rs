//! Payment provider webhook ingress.
//!
//! Processing order for each delivery:
//!
//! 1. verify the signature over the raw body (failure → 400, provider retries)
//! 2. skip events already in the payment event ledger
//! 3. dispatch by type (`payment_intent.succeeded` → settlement,
//!    `charge.refunded` → refund bookkeeping, anything else → ignored)
//! 4. record the event in the ledger; its unique constraint decides which of
//!    two racing deliveries is the recorder
//!
//! Business outcomes (stock conflict, unknown order, a payment that does not
//! match its order) are acknowledged with a 2xx so the provider does not
//! retry them blindly; they are logged at ERROR and flagged on the order for
//! reconciliation. A signed body that cannot be decoded is acknowledged too,
//! since redelivering the same bytes cannot help. Only storage failures are
//! returned as errors, which the provider retries.

use std::time::Duration;

use chrono::Utc;
use secrecy::SecretString;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use solehaus_core::{OrderEventKind, OrderId};

use super::notifications::Notifier;
use super::refund::{RefundApplied, apply_refund_total};
use super::settlement::{SettlementError, SettlementOutcome, SettlementService};
use crate::db::payment_events::{self, NewPaymentEvent, RecordOutcome};
use crate::db::{RepositoryError, order_events, orders};
use crate::models::{Order, OrderItem};
use crate::payments::signature::{self, SignatureError};
use crate::payments::types::{
    ChargeObject, EventPayload, PAYMENT_INTENT_FAILED, PaymentIntentObject, WebhookEvent,
    currency_matches, metadata_order_id,
};

/// Errors that make a delivery fail (non-2xx).
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook signature rejected: {0}")]
    Signature(#[from] SignatureError),

    #[error("settlement failed: {0}")]
    Settlement(SettlementError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// How a verified delivery was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAck {
    /// The event id was already processed; nothing was done.
    Duplicate { event_id: String },
    /// The event was processed and recorded with this outcome.
    Processed {
        event_id: String,
        outcome: &'static str,
    },
    /// Authentic but not a readable event envelope; nothing to record.
    Malformed { reason: String },
}

/// Verifies, deduplicates and dispatches provider events.
#[derive(Debug, Clone)]
pub struct WebhookService {
    pool: PgPool,
    settlement: SettlementService,
    notifier: Notifier,
    secret: SecretString,
    tolerance: Duration,
}

impl WebhookService {
    #[must_use]
    pub const fn new(
        pool: PgPool,
        settlement: SettlementService,
        notifier: Notifier,
        secret: SecretString,
        tolerance: Duration,
    ) -> Self {
        Self {
            pool,
            settlement,
            notifier,
            secret,
            tolerance,
        }
    }

    /// Handle one delivery given its signature header and raw body.
    ///
    /// # Errors
    ///
    /// - `WebhookError::Signature` if the delivery is not authentic
    /// - `WebhookError::Repository` / `WebhookError::Settlement` on storage failures
    pub async fn handle(
        &self,
        signature_header: Option<&str>,
        payload: &[u8],
    ) -> Result<WebhookAck, WebhookError> {
        signature::verify(
            &self.secret,
            signature_header,
            payload,
            self.tolerance,
            Utc::now().timestamp(),
        )
        .inspect_err(|err| warn!(error = %err, "Webhook signature verification failed"))?;

        let event: WebhookEvent = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(err) => {
                error!(error = %err, "Signed webhook body is not an event envelope");
                return Ok(WebhookAck::Malformed {
                    reason: err.to_string(),
                });
            }
        };

        self.process(&event, payload).await
    }

    #[instrument(
        skip(self, event, payload),
        fields(event_id = %event.id, event_type = %event.event_type)
    )]
    async fn process(
        &self,
        event: &WebhookEvent,
        payload: &[u8],
    ) -> Result<WebhookAck, WebhookError> {
        if payment_events::exists(&self.pool, &event.id).await? {
            info!(event_id = %event.id, "Duplicate webhook event, skipping");
            return Ok(WebhookAck::Duplicate {
                event_id: event.id.clone(),
            });
        }

        let (order_id, outcome) = match event.payload() {
            Ok(EventPayload::PaymentSucceeded(intent)) => {
                self.payment_succeeded(event, &intent).await?
            }
            Ok(EventPayload::ChargeRefunded(charge)) => {
                self.charge_refunded(event, &charge).await?
            }
            Ok(EventPayload::Unhandled) => {
                if event.event_type == PAYMENT_INTENT_FAILED {
                    info!(event_id = %event.id, "Payment attempt failed; order stays pending");
                } else {
                    info!(event_id = %event.id, "Unhandled webhook event type");
                }
                (None, "ignored")
            }
            Err(err) => {
                error!(event_id = %event.id, error = %err, "Event object could not be decoded");
                (None, "malformed")
            }
        };

        let digest = hex::encode(Sha256::digest(payload));
        let recorded = payment_events::record(
            &self.pool,
            &NewPaymentEvent {
                provider_event_id: &event.id,
                event_type: &event.event_type,
                provider_created: event.created,
                payload_sha256: &digest,
                order_id,
                outcome,
            },
        )
        .await?;

        if recorded == RecordOutcome::AlreadyExists {
            info!(event_id = %event.id, "Concurrent delivery recorded this event first");
            return Ok(WebhookAck::Duplicate {
                event_id: event.id.clone(),
            });
        }

        info!(event_id = %event.id, order_id = ?order_id, outcome, "Webhook event processed");
        Ok(WebhookAck::Processed {
            event_id: event.id.clone(),
            outcome,
        })
    }

    async fn payment_succeeded(
        &self,
        event: &WebhookEvent,
        intent: &PaymentIntentObject,
    ) -> Result<(Option<OrderId>, &'static str), WebhookError> {
        let Some(order) = self
            .resolve_order(metadata_order_id(&intent.metadata), Some(&intent.id))
            .await?
        else {
            error!(
                event_id = %event.id,
                payment_intent_id = %intent.id,
                "Payment succeeded for an unknown order"
            );
            return Ok((None, "order_not_found"));
        };

        if order
            .payment_intent_id
            .as_deref()
            .is_some_and(|recorded| recorded != intent.id)
        {
            error!(
                event_id = %event.id,
                order_id = %order.id,
                payment_intent_id = %intent.id,
                "Payment intent does not match the order"
            );
            let message = format!(
                "Payment {} captured but the order expects {}",
                intent.id,
                order.payment_intent_id.as_deref().unwrap_or_default()
            );
            self.flag_payment_conflict(event, order.id, &message).await?;
            return Ok((Some(order.id), "payment_intent_mismatch"));
        }
        if intent.amount != order.total_cents {
            error!(
                event_id = %event.id,
                order_id = %order.id,
                paid = intent.amount,
                expected = order.total_cents,
                "Paid amount does not match the order total"
            );
            let message = format!(
                "Payment {} captured {} but the order total is {}",
                intent.id, intent.amount, order.total_cents
            );
            self.flag_payment_conflict(event, order.id, &message).await?;
            return Ok((Some(order.id), "amount_mismatch"));
        }
        if !currency_matches(&intent.currency, order.currency) {
            error!(
                event_id = %event.id,
                order_id = %order.id,
                paid_currency = %intent.currency,
                expected = %order.currency,
                "Paid currency does not match the order"
            );
            let message = format!(
                "Payment {} captured in {} but the order is in {}",
                intent.id, intent.currency, order.currency
            );
            self.flag_payment_conflict(event, order.id, &message).await?;
            return Ok((Some(order.id), "currency_mismatch"));
        }

        let line_items: Vec<_> = orders::items(&self.pool, order.id)
            .await?
            .iter()
            .map(OrderItem::line_item)
            .collect();
        let actor = format!("webhook:{}", event.id);

        let outcome = match self
            .settlement
            .mark_paid_transactionally(order.id, &intent.id, &line_items)
            .await
        {
            Ok(outcome) => outcome,
            Err(
                err @ (SettlementError::InsufficientStock { .. }
                | SettlementError::UnknownVariant(_)),
            ) => {
                error!(
                    event_id = %event.id,
                    order_id = %order.id,
                    error = %err,
                    "Payment captured but stock could not be reserved; needs reconciliation"
                );
                order_events::append(
                    &self.pool,
                    order.id,
                    OrderEventKind::StockConflict,
                    &format!("Payment {} captured but not settled: {err}", intent.id),
                    &actor,
                )
                .await?;
                return Ok((Some(order.id), "insufficient_stock"));
            }
            Err(SettlementError::OrderNotFound(order_id)) => {
                return Ok((Some(order_id), "order_not_found"));
            }
            Err(err @ SettlementError::InvalidLineItems(_)) => {
                error!(
                    event_id = %event.id,
                    order_id = %order.id,
                    error = %err,
                    "Order has no settleable items"
                );
                return Ok((Some(order.id), "invalid_line_items"));
            }
            Err(err) => return Err(WebhookError::Settlement(err)),
        };

        match outcome {
            SettlementOutcome::Settled => {
                self.notifier.notify_paid(&self.pool, order.id).await;
            }
            SettlementOutcome::NotPayable { status } => {
                let message = format!(
                    "Payment {} captured for an order that is already {status}",
                    intent.id
                );
                self.flag_payment_conflict(event, order.id, &message).await?;
            }
            SettlementOutcome::AlreadySettled { .. } => {}
        }
        Ok((Some(order.id), outcome.as_str()))
    }

    async fn charge_refunded(
        &self,
        event: &WebhookEvent,
        charge: &ChargeObject,
    ) -> Result<(Option<OrderId>, &'static str), WebhookError> {
        let Some(order) = self
            .resolve_order(
                metadata_order_id(&charge.metadata),
                charge.payment_intent.as_deref(),
            )
            .await?
        else {
            warn!(event_id = %event.id, charge_id = %charge.id, "Refund for an unknown order");
            return Ok((None, "order_not_found"));
        };

        let actor = format!("webhook:{}", event.id);
        let message = format!(
            "Provider reported {} refunded on charge {}",
            charge.amount_refunded, charge.id
        );
        let outcome =
            match apply_refund_total(&self.pool, order.id, charge.amount_refunded, &actor, &message)
                .await
            {
                Ok(RefundApplied::Updated { .. }) => "refund_recorded",
                Ok(RefundApplied::Unchanged { .. }) => "refund_already_recorded",
                Ok(RefundApplied::Rejected { current }) => {
                    error!(
                        event_id = %event.id,
                        order_id = %order.id,
                        %current,
                        "Refund reported for an order that cannot be refunded"
                    );
                    // Audit only: the money went back, the totals stay as they are.
                    order_events::append(
                        &self.pool,
                        order.id,
                        OrderEventKind::Refund,
                        &format!("{message} while the order is {current}; totals unchanged"),
                        &actor,
                    )
                    .await?;
                    "refund_state_conflict"
                }
                Err(RepositoryError::NotFound) => "order_not_found",
                Err(err) => return Err(err.into()),
            };

        Ok((Some(order.id), outcome))
    }

    /// Find the order an event refers to: metadata first, then the intent id.
    async fn resolve_order(
        &self,
        from_metadata: Option<OrderId>,
        payment_intent_id: Option<&str>,
    ) -> Result<Option<Order>, RepositoryError> {
        if let Some(order_id) = from_metadata
            && let Some(order) = orders::get(&self.pool, order_id).await?
        {
            return Ok(Some(order));
        }
        match payment_intent_id {
            Some(id) => orders::get_by_payment_intent(&self.pool, id).await,
            None => Ok(None),
        }
    }

    /// Flag captured money that did not settle its order for an operator.
    async fn flag_payment_conflict(
        &self,
        event: &WebhookEvent,
        order_id: OrderId,
        message: &str,
    ) -> Result<(), WebhookError> {
        order_events::append(
            &self.pool,
            order_id,
            OrderEventKind::PaymentConflict,
            message,
            &format!("webhook:{}", event.id),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettlementConfig;
    use sqlx::postgres::PgPoolOptions;

    fn service() -> WebhookService {
        // Never connects: every case below is rejected before storage.
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://solehaus@127.0.0.1:9/unused")
            .unwrap_or_else(|e| panic!("lazy pool: {e}"));
        WebhookService::new(
            pool.clone(),
            SettlementService::new(pool, SettlementConfig::default()),
            Notifier::new(None).unwrap_or_else(|e| panic!("notifier: {e}")),
            SecretString::from("whsec_test_9Xk2LmQ8pR4tV7wZ1bN5"),
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn test_missing_signature_is_rejected() {
        let result = service().handle(None, br#"{"id":"evt_1"}"#).await;
        assert!(matches!(
            result,
            Err(WebhookError::Signature(SignatureError::Missing))
        ));
    }

    #[tokio::test]
    async fn test_forged_signature_is_rejected() {
        let body = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;
        let forged = signature::sign(
            &SecretString::from("whsec_attacker_key_0000000000"),
            Utc::now().timestamp(),
            body,
        );
        let result = service().handle(Some(&forged), body).await;
        assert!(matches!(
            result,
            Err(WebhookError::Signature(SignatureError::Mismatch))
        ));
    }

    #[tokio::test]
    async fn test_signed_garbage_is_acknowledged_without_storage() {
        let svc = service();
        let body = b"not json";
        let header = signature::sign(&svc.secret, Utc::now().timestamp(), body);
        let result = svc.handle(Some(&header), body).await;
        assert!(matches!(result, Ok(WebhookAck::Malformed { .. })));
    }
}
