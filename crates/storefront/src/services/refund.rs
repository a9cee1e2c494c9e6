//! Refunds against the payment provider.
//!
//! A refund is two steps that cannot share a transaction: the provider call,
//! then the local bookkeeping. The provider call holds no row locks. Refunds
//! of the same order are serialized by a transaction-scoped advisory lock
//! taken before the order is read, so each one starts from the total the
//! previous one committed. The local step writes a *cumulative* total
//! (`max(current, target)` capped at the order total), so a `charge.refunded`
//! webhook landing in between is never counted twice and no replay can push
//! `refund_amount_cents` past what was actually refunded or past the total.
//!
//! If the provider accepted a refund but the local write fails, a
//! `refund_reconciliation` event is recorded and the error is logged for an
//! operator to resolve.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use solehaus_core::{OrderEventKind, OrderId, OrderStatus, Transition};

use crate::db::{RepositoryError, catalog, order_events, orders};
use crate::models::Order;
use crate::payments::{CreateRefund, PaymentError, PaymentGateway};

/// Errors that can occur while refunding an order.
#[derive(Debug, Error)]
pub enum RefundError {
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("invalid refund amount: {0}")]
    InvalidAmount(String),

    /// The order is not in a refundable status (e.g. still pending).
    #[error("order cannot be refunded while {current}")]
    StateConflict { current: OrderStatus },

    #[error("order {0} has no captured payment")]
    MissingPayment(OrderId),

    #[error(transparent)]
    Provider(#[from] PaymentError),

    /// The provider refunded but the local total could not be written.
    #[error("refund {refund_id} issued but not recorded for order {order_id}: {source}")]
    Reconciliation {
        order_id: OrderId,
        refund_id: String,
        #[source]
        source: RepositoryError,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<sqlx::Error> for RefundError {
    fn from(err: sqlx::Error) -> Self {
        Self::Repository(err.into())
    }
}

/// Refund state of an order after a refund call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundReceipt {
    pub order_id: OrderId,
    /// Amount refunded by this call (0 when nothing was left to refund).
    pub refunded_now_cents: i64,
    /// Cumulative refunded amount.
    pub refund_amount_cents: i64,
    pub total_cents: i64,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_refund_id: Option<String>,
}

/// Result of writing a cumulative refund total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundApplied {
    /// The stored total grew.
    Updated {
        refund_amount_cents: i64,
        status: OrderStatus,
    },
    /// The stored total already covered the reported amount.
    Unchanged {
        refund_amount_cents: i64,
        status: OrderStatus,
    },
    /// The order's status does not allow refunds.
    Rejected { current: OrderStatus },
}

/// Clamp a reported cumulative refund against the stored one and the total.
///
/// Never decreases, never exceeds `total_cents`.
#[must_use]
pub fn next_refund_total(current_cents: i64, reported_cents: i64, total_cents: i64) -> i64 {
    current_cents.max(reported_cents).min(total_cents)
}

/// Raise an order's cumulative refund total to `cumulative_cents`.
///
/// Shared by admin refunds (after the provider call) and `charge.refunded`
/// webhooks. Idempotent: replaying the same total is a no-op.
///
/// # Errors
///
/// Returns `RepositoryError::NotFound` if the order does not exist.
#[instrument(skip(pool, message), fields(order_id = %order_id))]
pub async fn apply_refund_total(
    pool: &PgPool,
    order_id: OrderId,
    cumulative_cents: i64,
    actor: &str,
    message: &str,
) -> Result<RefundApplied, RepositoryError> {
    let mut tx = pool.begin().await?;
    let order = orders::get_for_update(&mut *tx, order_id)
        .await?
        .ok_or(RepositoryError::NotFound)?;

    let current = order.refund_amount_cents;
    let next = next_refund_total(current, cumulative_cents, order.total_cents);
    if next == current {
        tx.rollback().await?;
        return Ok(RefundApplied::Unchanged {
            refund_amount_cents: current,
            status: order.status,
        });
    }

    let status = if next == order.total_cents {
        match order
            .status
            .check_transition(OrderStatus::Refunded, order.fulfillment)
        {
            Transition::Apply | Transition::AlreadyApplied => OrderStatus::Refunded,
            Transition::Rejected { current } => {
                tx.rollback().await?;
                return Ok(RefundApplied::Rejected { current });
            }
        }
    } else if order.status.is_refundable() {
        order.status
    } else {
        tx.rollback().await?;
        return Ok(RefundApplied::Rejected {
            current: order.status,
        });
    };

    orders::set_refund_amount(&mut *tx, order_id, next, status, Some(Utc::now())).await?;
    order_events::append(
        &mut *tx,
        order_id,
        OrderEventKind::Refund,
        &format!("{message}; refunded total {next} of {}", order.total_cents),
        actor,
    )
    .await?;
    tx.commit().await?;

    info!(%order_id, refund_amount_cents = next, %status, "Refund recorded");
    Ok(RefundApplied::Updated {
        refund_amount_cents: next,
        status,
    })
}

/// Issues refunds through the provider and records them locally.
#[derive(Debug, Clone)]
pub struct RefundService<G> {
    pool: PgPool,
    gateway: G,
    max_retries: usize,
}

impl<G: PaymentGateway> RefundService<G> {
    #[must_use]
    pub const fn new(pool: PgPool, gateway: G, max_retries: usize) -> Self {
        Self {
            pool,
            gateway,
            max_retries,
        }
    }

    /// Refund `requested_cents` (or everything still refundable) of an order.
    ///
    /// The amount is capped at the remaining balance; an order with nothing
    /// left to refund returns its current totals without calling the
    /// provider, so repeating a refund never doubles it.
    ///
    /// # Errors
    ///
    /// - `RefundError::StateConflict` if the order is pending or canceled
    /// - `RefundError::InvalidAmount` for a non-positive amount
    /// - `RefundError::Provider` if the provider rejects the refund or stays
    ///   unreachable after retries
    /// - `RefundError::Reconciliation` if the provider refunded but the local
    ///   write failed
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn refund(
        &self,
        order_id: OrderId,
        requested_cents: Option<i64>,
        actor: &str,
    ) -> Result<RefundReceipt, RefundError> {
        if let Some(amount) = requested_cents
            && amount <= 0
        {
            return Err(RefundError::InvalidAmount(format!(
                "{amount} is not a positive amount"
            )));
        }

        // Held until this refund is recorded; released on every return path.
        let mut guard = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("refund:{order_id}"))
            .execute(&mut *guard)
            .await?;

        let result = self.refund_locked(&mut *guard, order_id, requested_cents, actor).await;
        // The guard wrote nothing; a failed commit only drops the connection.
        if let Err(err) = guard.commit().await {
            warn!(%order_id, error = %err, "Failed to release refund lock");
        }
        result
    }

    async fn refund_locked(
        &self,
        guard: &mut sqlx::PgConnection,
        order_id: OrderId,
        requested_cents: Option<i64>,
        actor: &str,
    ) -> Result<RefundReceipt, RefundError> {
        let order = orders::get(&mut *guard, order_id)
            .await?
            .ok_or(RefundError::OrderNotFound(order_id))?;

        if !order.status.is_post_payment() {
            return Err(RefundError::StateConflict {
                current: order.status,
            });
        }

        let remaining = order.refundable_cents();
        if remaining == 0 {
            info!(%order_id, "Nothing left to refund");
            return Ok(receipt(&order, 0, None));
        }

        let amount = requested_cents.map_or(remaining, |requested| requested.min(remaining));
        let payment_intent_id = order
            .payment_intent_id
            .as_deref()
            .ok_or(RefundError::MissingPayment(order_id))?;
        let account = catalog::payment_account(&self.pool, order.tenant_id).await?;

        let request = CreateRefund {
            account: account.as_deref(),
            payment_intent_id,
            amount_cents: amount,
            order_id,
            idempotency_key: format!(
                "refund:{order_id}:{}:{amount}",
                order.refund_amount_cents
            ),
        };

        let refund = (|| self.gateway.create_refund(&request))
            .retry(self.backoff())
            .when(PaymentError::is_retryable)
            .notify(|err: &PaymentError, delay: Duration| {
                warn!(%order_id, error = %err, ?delay, "Refund call failed, retrying");
            })
            .await
            .inspect_err(|err| {
                error!(%order_id, amount, error = %err, "Refund rejected by payment provider");
            })?;

        let target = order.refund_amount_cents + refund.amount.min(amount);
        let message = format!("Refund {} of {} issued", refund.id, refund.amount);
        match apply_refund_total(&self.pool, order_id, target, actor, &message).await {
            Ok(
                RefundApplied::Updated {
                    refund_amount_cents,
                    status,
                }
                | RefundApplied::Unchanged {
                    refund_amount_cents,
                    status,
                },
            ) => Ok(RefundReceipt {
                order_id,
                refunded_now_cents: refund.amount,
                refund_amount_cents,
                total_cents: order.total_cents,
                status,
                provider_refund_id: Some(refund.id),
            }),
            Ok(RefundApplied::Rejected { current }) => {
                let source = RepositoryError::Conflict(format!("order moved to {current}"));
                Err(self.flag_reconciliation(order_id, refund.id, refund.amount, source).await)
            }
            Err(source) => {
                Err(self.flag_reconciliation(order_id, refund.id, refund.amount, source).await)
            }
        }
    }

    /// Record that a provider refund is missing from the local total.
    async fn flag_reconciliation(
        &self,
        order_id: OrderId,
        refund_id: String,
        amount_cents: i64,
        source: RepositoryError,
    ) -> RefundError {
        error!(
            %order_id,
            refund_id = %refund_id,
            amount_cents,
            error = %source,
            "Refund issued at provider but not recorded; needs reconciliation"
        );

        let message = format!(
            "Provider refund {refund_id} of {amount_cents} not recorded locally: {source}"
        );
        if let Err(err) = order_events::append(
            &self.pool,
            order_id,
            OrderEventKind::RefundReconciliation,
            &message,
            "refund",
        )
        .await
        {
            error!(%order_id, error = %err, "Failed to record refund reconciliation event");
        }

        RefundError::Reconciliation {
            order_id,
            refund_id,
            source,
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(5))
            .with_max_times(self.max_retries)
            .with_jitter()
    }
}

fn receipt(order: &Order, refunded_now_cents: i64, refund_id: Option<String>) -> RefundReceipt {
    RefundReceipt {
        order_id: order.id,
        refunded_now_cents,
        refund_amount_cents: order.refund_amount_cents,
        total_cents: order.total_cents,
        status: order.status,
        provider_refund_id: refund_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::tests::pending_order;

    #[test]
    fn test_refund_total_never_exceeds_order_total() {
        assert_eq!(next_refund_total(0, 2500, 5000), 2500);
        assert_eq!(next_refund_total(2500, 9000, 5000), 5000);
        assert_eq!(next_refund_total(5000, 5000, 5000), 5000);
    }

    #[test]
    fn test_refund_total_never_decreases() {
        // An older, smaller cumulative figure arriving late changes nothing.
        assert_eq!(next_refund_total(3000, 1000, 5000), 3000);
    }

    #[test]
    fn test_receipt_reflects_order() {
        let mut order = pending_order(4200);
        order.status = OrderStatus::Refunded;
        order.refund_amount_cents = 4200;
        let receipt = receipt(&order, 0, None);
        assert_eq!(receipt.refund_amount_cents, 4200);
        assert_eq!(receipt.refunded_now_cents, 0);
        assert_eq!(receipt.status, OrderStatus::Refunded);
    }

    #[test]
    fn test_receipt_serialization_omits_missing_refund_id() {
        let receipt = receipt(&pending_order(100), 0, None);
        let json = serde_json::to_value(&receipt).unwrap_or_default();
        assert!(json.get("provider_refund_id").is_none());
        assert_eq!(json["status"], "pending");
    }
}
