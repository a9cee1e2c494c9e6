//! Settlement: the `pending → paid` transition.
//!
//! This is the only code path that decrements stock. Each attempt runs in a
//! single transaction:
//!
//! 1. lock the order row and re-check its status
//! 2. lock every variant row in ascending id order and check stock
//! 3. decrement stock, mark the order paid, append the `paid` event
//! 4. commit
//!
//! Lock ordering (order row first, then variants sorted by id) is the same
//! for every caller, so two settlements over overlapping variants queue
//! behind each other instead of deadlocking. Lock and serialization
//! conflicts are retried with backoff; business failures are not.

use std::collections::BTreeMap;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use solehaus_core::{OrderEventKind, OrderId, OrderStatus, Transition, VariantId};

use crate::config::SettlementConfig;
use crate::db::{RepositoryError, inventory, order_events, orders};
use crate::models::LineItem;

const SETTLEMENT_ACTOR: &str = "settlement";

/// What a settlement call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// The order moved to `paid` and stock was decremented.
    Settled,
    /// The order had already been paid; nothing changed.
    AlreadySettled { status: OrderStatus },
    /// The order was canceled before payment arrived; nothing changed.
    NotPayable { status: OrderStatus },
}

impl SettlementOutcome {
    /// Short label recorded in the payment event ledger.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Settled => "settled",
            Self::AlreadySettled { .. } => "already_settled",
            Self::NotPayable { .. } => "order_not_payable",
        }
    }
}

/// Errors that can occur while settling an order.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("invalid line items: {0}")]
    InvalidLineItems(String),

    #[error("variant {0} not found")]
    UnknownVariant(VariantId),

    /// Stock ran out between checkout and payment. The order stays pending.
    #[error(
        "insufficient stock for variant {variant_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        variant_id: VariantId,
        requested: i32,
        available: i32,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<sqlx::Error> for SettlementError {
    fn from(err: sqlx::Error) -> Self {
        Self::Repository(err.into())
    }
}

impl SettlementError {
    /// Whether the whole transaction should be attempted again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Repository(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Merge line items per variant and sort them into lock order.
///
/// # Errors
///
/// Returns `SettlementError::InvalidLineItems` for an empty list, a
/// non-positive quantity or a quantity overflow.
pub fn lock_plan(line_items: &[LineItem]) -> Result<Vec<(VariantId, i32)>, SettlementError> {
    if line_items.is_empty() {
        return Err(SettlementError::InvalidLineItems("no line items".to_owned()));
    }

    let mut merged: BTreeMap<VariantId, i32> = BTreeMap::new();
    for item in line_items {
        if item.quantity <= 0 {
            return Err(SettlementError::InvalidLineItems(format!(
                "quantity {} for variant {}",
                item.quantity, item.variant_id
            )));
        }
        let entry = merged.entry(item.variant_id).or_insert(0);
        *entry = entry.checked_add(item.quantity).ok_or_else(|| {
            SettlementError::InvalidLineItems(format!("quantity overflow for {}", item.variant_id))
        })?;
    }

    Ok(merged.into_iter().collect())
}

/// Performs the atomic `pending → paid` transition.
#[derive(Debug, Clone)]
pub struct SettlementService {
    pool: PgPool,
    config: SettlementConfig,
}

impl SettlementService {
    #[must_use]
    pub const fn new(pool: PgPool, config: SettlementConfig) -> Self {
        Self { pool, config }
    }

    /// Mark an order paid and decrement stock for every line item, all or
    /// nothing.
    ///
    /// Calling this for an order that is already paid (or further along) is
    /// a no-op returning [`SettlementOutcome::AlreadySettled`]; concurrent
    /// calls for the same order serialize on the order row lock so exactly
    /// one of them settles.
    ///
    /// # Errors
    ///
    /// Returns `SettlementError::InsufficientStock` if any variant cannot
    /// cover its quantity (the order stays pending and no stock moves).
    /// Returns `SettlementError::Repository` once lock conflicts outlast the
    /// retry budget.
    #[instrument(skip(self, line_items), fields(order_id = %order_id))]
    pub async fn mark_paid_transactionally(
        &self,
        order_id: OrderId,
        payment_reference: &str,
        line_items: &[LineItem],
    ) -> Result<SettlementOutcome, SettlementError> {
        let plan = lock_plan(line_items)?;

        let result = (|| self.attempt(order_id, payment_reference, &plan))
            .retry(self.backoff())
            .when(SettlementError::is_retryable)
            .notify(|err: &SettlementError, delay: Duration| {
                warn!(%order_id, error = %err, ?delay, "Settlement conflict, retrying");
            })
            .await;

        match &result {
            Ok(SettlementOutcome::Settled) => {
                info!(%order_id, payment_reference, "Order settled");
            }
            Ok(SettlementOutcome::AlreadySettled { status }) => {
                info!(%order_id, %status, "Order already settled, skipping");
            }
            Ok(SettlementOutcome::NotPayable { status }) => {
                error!(
                    %order_id,
                    %status,
                    payment_reference,
                    "Payment received for an order that can no longer be paid"
                );
            }
            Err(SettlementError::InsufficientStock { .. }) => {
                // Logged by the caller together with the provider event id.
            }
            Err(err) => {
                error!(%order_id, error = %err, "Settlement failed");
            }
        }

        result
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(20))
            .with_max_delay(Duration::from_millis(500))
            .with_max_times(self.config.max_retries)
            .with_jitter()
    }

    async fn attempt(
        &self,
        order_id: OrderId,
        payment_reference: &str,
        plan: &[(VariantId, i32)],
    ) -> Result<SettlementOutcome, SettlementError> {
        let mut tx = self.pool.begin().await?;

        let timeout = format!("{}ms", self.config.statement_timeout.as_millis());
        sqlx::query(
            r"
            SELECT set_config('statement_timeout', $1, true),
                   set_config('lock_timeout', $1, true)
            ",
        )
        .bind(&timeout)
        .execute(&mut *tx)
        .await?;

        let order = orders::get_for_update(&mut *tx, order_id)
            .await?
            .ok_or(SettlementError::OrderNotFound(order_id))?;

        match order.status.check_transition(OrderStatus::Paid, order.fulfillment) {
            Transition::Apply => {}
            Transition::AlreadyApplied => {
                tx.rollback().await?;
                return Ok(SettlementOutcome::AlreadySettled {
                    status: order.status,
                });
            }
            Transition::Rejected { current } => {
                tx.rollback().await?;
                return Ok(SettlementOutcome::NotPayable { status: current });
            }
        }

        for &(variant_id, requested) in plan {
            let available = inventory::lock_stock(&mut *tx, variant_id)
                .await?
                .ok_or(SettlementError::UnknownVariant(variant_id))?;

            if available < requested {
                tx.rollback().await?;
                return Err(SettlementError::InsufficientStock {
                    variant_id,
                    requested,
                    available,
                });
            }
        }

        for &(variant_id, quantity) in plan {
            inventory::decrement(&mut *tx, variant_id, quantity).await?;
        }

        if !orders::mark_paid(&mut *tx, order_id, payment_reference, Utc::now()).await? {
            return Err(RepositoryError::Conflict(format!(
                "order {order_id} left pending while locked"
            ))
            .into());
        }

        let units: i32 = plan.iter().map(|&(_, quantity)| quantity).sum();
        order_events::append(
            &mut *tx,
            order_id,
            OrderEventKind::Paid,
            &format!(
                "Payment {payment_reference} captured; {units} unit(s) across {} variant(s)",
                plan.len()
            ),
            SETTLEMENT_ACTOR,
        )
        .await?;

        tx.commit().await?;
        Ok(SettlementOutcome::Settled)
    }
}
