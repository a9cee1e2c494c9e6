//! Post-payment fulfillment transitions and cancellation.
//!
//! Every transition locks the order row, checks the state machine and writes
//! the new status together with its audit event. A transition that was
//! already applied is a successful no-op; the once-per-order index on the
//! event table backs this up if two callers race.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, instrument, warn};

use solehaus_core::{OrderEventKind, OrderId, OrderStatus, Transition};

use crate::db::{RepositoryError, order_events, orders};

/// Errors that can occur during a fulfillment transition.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("cannot move order from {current} to {target}")]
    StateConflict {
        current: OrderStatus,
        target: OrderStatus,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<sqlx::Error> for FulfillmentError {
    fn from(err: sqlx::Error) -> Self {
        Self::Repository(err.into())
    }
}

/// Carrier and tracking number recorded when an order ships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shipment {
    pub carrier: String,
    pub tracking_number: String,
}

/// Result of a transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransitionOutcome {
    pub order_id: OrderId,
    pub status: OrderStatus,
    /// `false` when the order had already reached the target.
    pub applied: bool,
}

/// Admin-triggered order transitions.
#[derive(Debug, Clone)]
pub struct FulfillmentService {
    pool: PgPool,
}

impl FulfillmentService {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Mark a ship-mode order shipped.
    ///
    /// # Errors
    ///
    /// Returns `FulfillmentError::StateConflict` unless the order is paid and
    /// ships (or has already shipped).
    pub async fn ship(
        &self,
        order_id: OrderId,
        shipment: Option<Shipment>,
        actor: &str,
    ) -> Result<TransitionOutcome, FulfillmentError> {
        let message = shipment.as_ref().map_or_else(
            || "Order shipped".to_owned(),
            |s| format!("Order shipped via {} ({})", s.carrier, s.tracking_number),
        );
        let shipment = shipment
            .as_ref()
            .map(|s| (s.carrier.as_str(), s.tracking_number.as_str()));
        self.transition(order_id, OrderStatus::Shipped, shipment, &message, actor)
            .await
    }

    /// Mark a pickup-mode order collected.
    ///
    /// # Errors
    ///
    /// Returns `FulfillmentError::StateConflict` unless the order is paid for pickup.
    pub async fn pickup(
        &self,
        order_id: OrderId,
        actor: &str,
    ) -> Result<TransitionOutcome, FulfillmentError> {
        self.transition(order_id, OrderStatus::PickedUp, None, "Order picked up", actor)
            .await
    }

    /// Mark a shipped or picked-up order delivered.
    ///
    /// # Errors
    ///
    /// Returns `FulfillmentError::StateConflict` if the order has not left the store.
    pub async fn deliver(
        &self,
        order_id: OrderId,
        actor: &str,
    ) -> Result<TransitionOutcome, FulfillmentError> {
        self.transition(order_id, OrderStatus::Delivered, None, "Order delivered", actor)
            .await
    }

    /// Cancel an unpaid order.
    ///
    /// # Errors
    ///
    /// Returns `FulfillmentError::StateConflict` once the order is paid.
    pub async fn cancel(
        &self,
        order_id: OrderId,
        reason: &str,
        actor: &str,
    ) -> Result<TransitionOutcome, FulfillmentError> {
        let message = format!("Order canceled: {reason}");
        self.transition(order_id, OrderStatus::Canceled, None, &message, actor)
            .await
    }

    /// Cancel pending orders whose checkout window closed before `now`.
    ///
    /// Orders paid in the meantime are skipped. Returns the ids canceled by
    /// this call.
    ///
    /// # Errors
    ///
    /// Returns `FulfillmentError::Repository` if listing or updating fails.
    #[instrument(skip(self))]
    pub async fn cancel_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OrderId>, FulfillmentError> {
        let expired = orders::list_expired_pending(&self.pool, now, limit).await?;
        let mut canceled = Vec::with_capacity(expired.len());

        for order in expired {
            match self
                .cancel(order.id, "checkout window expired", "expiry")
                .await
            {
                Ok(outcome) if outcome.applied => canceled.push(order.id),
                Ok(_) => {}
                Err(FulfillmentError::StateConflict { current, .. }) => {
                    info!(order_id = %order.id, %current, "Order settled before expiry, skipping");
                }
                Err(err) => return Err(err),
            }
        }

        info!(count = canceled.len(), "Expired pending orders canceled");
        Ok(canceled)
    }

    #[instrument(skip(self, shipment, message), fields(order_id = %order_id, target = %target))]
    async fn transition(
        &self,
        order_id: OrderId,
        target: OrderStatus,
        shipment: Option<(&str, &str)>,
        message: &str,
        actor: &str,
    ) -> Result<TransitionOutcome, FulfillmentError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::get_for_update(&mut *tx, order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))?;

        match order.status.check_transition(target, order.fulfillment) {
            Transition::Apply => {}
            Transition::AlreadyApplied => {
                tx.rollback().await?;
                info!(%order_id, status = %order.status, "Transition already applied");
                return Ok(TransitionOutcome {
                    order_id,
                    status: order.status,
                    applied: false,
                });
            }
            Transition::Rejected { current } => {
                tx.rollback().await?;
                warn!(%order_id, %current, %target, "Transition rejected");
                return Err(FulfillmentError::StateConflict { current, target });
            }
        }

        orders::update_status(&mut *tx, order_id, target, shipment).await?;
        if let Some(kind) = OrderEventKind::for_status(target) {
            order_events::append(&mut *tx, order_id, kind, message, actor).await?;
        }
        tx.commit().await?;

        info!(%order_id, from = %order.status, to = %target, "Order transitioned");
        Ok(TransitionOutcome {
            order_id,
            status: target,
            applied: true,
        })
    }
}

/// Build a [`Shipment`] from optional admin input; both fields or neither.
///
/// # Errors
///
/// Returns `FulfillmentError::InvalidInput` if only one field is present or
/// a present field is blank.
pub fn shipment_from_parts(
    carrier: Option<String>,
    tracking_number: Option<String>,
) -> Result<Option<Shipment>, FulfillmentError> {
    match (carrier, tracking_number) {
        (None, None) => Ok(None),
        (Some(carrier), Some(tracking_number))
            if !carrier.trim().is_empty() && !tracking_number.trim().is_empty() =>
        {
            Ok(Some(Shipment {
                carrier: carrier.trim().to_owned(),
                tracking_number: tracking_number.trim().to_owned(),
            }))
        }
        _ => Err(FulfillmentError::InvalidInput(
            "carrier and tracking_number must be given together".to_owned(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shipment_both_or_neither() {
        assert_eq!(shipment_from_parts(None, None).ok(), Some(None));

        let shipment = shipment_from_parts(Some(" UPS ".into()), Some("1Z999".into()))
            .ok()
            .flatten();
        assert_eq!(
            shipment,
            Some(Shipment {
                carrier: "UPS".into(),
                tracking_number: "1Z999".into(),
            })
        );

        assert!(matches!(
            shipment_from_parts(Some("UPS".into()), None),
            Err(FulfillmentError::InvalidInput(_))
        ));
        assert!(matches!(
            shipment_from_parts(Some("UPS".into()), Some("  ".into())),
            Err(FulfillmentError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_outcome_serializes_status() {
        let outcome = TransitionOutcome {
            order_id: OrderId::generate(),
            status: OrderStatus::PickedUp,
            applied: false,
        };
        let json = serde_json::to_value(outcome).unwrap_or_default();
        assert_eq!(json["status"], "picked_up");
        assert_eq!(json["applied"], false);
    }
}
