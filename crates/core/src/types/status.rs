//! Order status, fulfillment mode and the order state machine.
//!
//! ```text
//! pending ──► paid ──► shipped ───┐
//!    │          │                 ├──► delivered
//!    │          └───► picked_up ──┘
//!    ▼
//! canceled        paid | shipped | picked_up | delivered ──► refunded
//! ```
//!
//! Every guarded transition first compares the current status with the
//! target. Reaching a state that was already reached is a no-op
//! ([`Transition::AlreadyApplied`]), so duplicate triggers are harmless.
//! The only edge that may touch inventory is `pending → paid`.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created by checkout, awaiting payment.
    #[default]
    Pending,
    /// Payment settled and stock decremented.
    Paid,
    /// Handed to a carrier (ship mode).
    Shipped,
    /// Collected in store (pickup mode).
    PickedUp,
    /// Received by the buyer.
    Delivered,
    /// Cumulative refunds reached the order total.
    Refunded,
    /// Abandoned before payment.
    Canceled,
}

/// How the buyer receives the goods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentMode {
    #[default]
    Ship,
    Pickup,
}

/// Result of checking a requested transition against the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The transition is legal and should be written.
    Apply,
    /// The order is already at (or past) the target; nothing to do.
    AlreadyApplied,
    /// The current status does not allow the transition.
    Rejected {
        /// Status the order was found in.
        current: OrderStatus,
    },
}

impl OrderStatus {
    /// Snake-case name as stored in the database.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Shipped => "shipped",
            Self::PickedUp => "picked_up",
            Self::Delivered => "delivered",
            Self::Refunded => "refunded",
            Self::Canceled => "canceled",
        }
    }

    /// Whether payment has been captured for this order.
    #[must_use]
    pub const fn is_post_payment(&self) -> bool {
        matches!(
            self,
            Self::Paid | Self::Shipped | Self::PickedUp | Self::Delivered | Self::Refunded
        )
    }

    /// Whether a (further) refund may be issued.
    #[must_use]
    pub const fn is_refundable(&self) -> bool {
        matches!(
            self,
            Self::Paid | Self::Shipped | Self::PickedUp | Self::Delivered
        )
    }

    /// Whether no further transition can leave this status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Refunded | Self::Canceled)
    }

    /// Check whether the order may move from `self` to `target`.
    ///
    /// `mode` decides which fulfillment edge (`shipped` or `picked_up`) is
    /// legal for a paid order.
    #[must_use]
    pub const fn check_transition(self, target: Self, mode: FulfillmentMode) -> Transition {
        let reject = Transition::Rejected { current: self };
        match target {
            Self::Pending => match self {
                Self::Pending => Transition::AlreadyApplied,
                _ => reject,
            },
            Self::Paid => match self {
                Self::Pending => Transition::Apply,
                Self::Canceled => reject,
                _ => Transition::AlreadyApplied,
            },
            Self::Shipped => match (self, mode) {
                (Self::Paid, FulfillmentMode::Ship) => Transition::Apply,
                (Self::Shipped | Self::Delivered, FulfillmentMode::Ship) => {
                    Transition::AlreadyApplied
                }
                _ => reject,
            },
            Self::PickedUp => match (self, mode) {
                (Self::Paid, FulfillmentMode::Pickup) => Transition::Apply,
                (Self::PickedUp | Self::Delivered, FulfillmentMode::Pickup) => {
                    Transition::AlreadyApplied
                }
                _ => reject,
            },
            Self::Delivered => match self {
                Self::Shipped | Self::PickedUp => Transition::Apply,
                Self::Delivered => Transition::AlreadyApplied,
                _ => reject,
            },
            Self::Refunded => match self {
                Self::Paid | Self::Shipped | Self::PickedUp | Self::Delivered => Transition::Apply,
                Self::Refunded => Transition::AlreadyApplied,
                _ => reject,
            },
            Self::Canceled => match self {
                Self::Pending => Transition::Apply,
                Self::Canceled => Transition::AlreadyApplied,
                _ => reject,
            },
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "shipped" => Ok(Self::Shipped),
            "picked_up" => Ok(Self::PickedUp),
            "delivered" => Ok(Self::Delivered),
            "refunded" => Ok(Self::Refunded),
            "canceled" => Ok(Self::Canceled),
            _ => Err(format!("invalid order status: {s}")),
        }
    }
}

impl FulfillmentMode {
    /// Snake-case name as stored in the database.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ship => "ship",
            Self::Pickup => "pickup",
        }
    }
}

impl std::fmt::Display for FulfillmentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FulfillmentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ship" => Ok(Self::Ship),
            "pickup" => Ok(Self::Pickup),
            _ => Err(format!("invalid fulfillment mode: {s}")),
        }
    }
}

/// Kind of an entry in an order's append-only audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEventKind {
    Created,
    Paid,
    StockConflict,
    /// Money captured that could not settle the order (wrong amount,
    /// currency or intent, or the order was no longer payable).
    PaymentConflict,
    Shipped,
    PickedUp,
    Delivered,
    Canceled,
    Refund,
    RefundReconciliation,
    NotificationSent,
    TokenIssued,
    TokensRevoked,
}

impl OrderEventKind {
    /// Snake-case name as stored in the database.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Paid => "paid",
            Self::StockConflict => "stock_conflict",
            Self::PaymentConflict => "payment_conflict",
            Self::Shipped => "shipped",
            Self::PickedUp => "picked_up",
            Self::Delivered => "delivered",
            Self::Canceled => "canceled",
            Self::Refund => "refund",
            Self::RefundReconciliation => "refund_reconciliation",
            Self::NotificationSent => "notification_sent",
            Self::TokenIssued => "token_issued",
            Self::TokensRevoked => "tokens_revoked",
        }
    }

    /// Kinds recorded at most once per order (enforced by a partial unique index).
    #[must_use]
    pub const fn is_once_per_order(&self) -> bool {
        matches!(
            self,
            Self::Created
                | Self::Paid
                | Self::Shipped
                | Self::PickedUp
                | Self::Delivered
                | Self::Canceled
                | Self::NotificationSent
        )
    }

    /// The audit kind written when an order enters `status`.
    #[must_use]
    pub const fn for_status(status: OrderStatus) -> Option<Self> {
        match status {
            OrderStatus::Pending => None,
            OrderStatus::Paid => Some(Self::Paid),
            OrderStatus::Shipped => Some(Self::Shipped),
            OrderStatus::PickedUp => Some(Self::PickedUp),
            OrderStatus::Delivered => Some(Self::Delivered),
            OrderStatus::Refunded => Some(Self::Refund),
            OrderStatus::Canceled => Some(Self::Canceled),
        }
    }
}

impl std::fmt::Display for OrderEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "paid" => Ok(Self::Paid),
            "stock_conflict" => Ok(Self::StockConflict),
            "payment_conflict" => Ok(Self::PaymentConflict),
            "shipped" => Ok(Self::Shipped),
            "picked_up" => Ok(Self::PickedUp),
            "delivered" => Ok(Self::Delivered),
            "canceled" => Ok(Self::Canceled),
            "refund" => Ok(Self::Refund),
            "refund_reconciliation" => Ok(Self::RefundReconciliation),
            "notification_sent" => Ok(Self::NotificationSent),
            "token_issued" => Ok(Self::TokenIssued),
            "tokens_revoked" => Ok(Self::TokensRevoked),
            _ => Err(format!("invalid order event kind: {s}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Shipped,
        OrderStatus::PickedUp,
        OrderStatus::Delivered,
        OrderStatus::Refunded,
        OrderStatus::Canceled,
    ];

    #[test]
    fn test_only_pending_can_be_paid() {
        for status in ALL {
            let result = status.check_transition(OrderStatus::Paid, FulfillmentMode::Ship);
            match status {
                OrderStatus::Pending => assert_eq!(result, Transition::Apply),
                OrderStatus::Canceled => assert!(matches!(result, Transition::Rejected { .. })),
                _ => assert_eq!(result, Transition::AlreadyApplied),
            }
        }
    }

    #[test]
    fn test_ship_requires_ship_mode() {
        assert_eq!(
            OrderStatus::Paid.check_transition(OrderStatus::Shipped, FulfillmentMode::Ship),
            Transition::Apply
        );
        assert_eq!(
            OrderStatus::Paid.check_transition(OrderStatus::Shipped, FulfillmentMode::Pickup),
            Transition::Rejected {
                current: OrderStatus::Paid
            }
        );
        assert_eq!(
            OrderStatus::Paid.check_transition(OrderStatus::PickedUp, FulfillmentMode::Pickup),
            Transition::Apply
        );
    }

    #[test]
    fn test_fulfillment_is_idempotent() {
        assert_eq!(
            OrderStatus::Shipped.check_transition(OrderStatus::Shipped, FulfillmentMode::Ship),
            Transition::AlreadyApplied
        );
        assert_eq!(
            OrderStatus::Delivered.check_transition(OrderStatus::Delivered, FulfillmentMode::Ship),
            Transition::AlreadyApplied
        );
    }

    #[test]
    fn test_pending_cannot_ship_or_refund() {
        assert!(matches!(
            OrderStatus::Pending.check_transition(OrderStatus::Shipped, FulfillmentMode::Ship),
            Transition::Rejected { .. }
        ));
        assert!(matches!(
            OrderStatus::Pending.check_transition(OrderStatus::Refunded, FulfillmentMode::Ship),
            Transition::Rejected { .. }
        ));
    }

    #[test]
    fn test_cancel_only_before_payment() {
        assert_eq!(
            OrderStatus::Pending.check_transition(OrderStatus::Canceled, FulfillmentMode::Ship),
            Transition::Apply
        );
        for status in [OrderStatus::Paid, OrderStatus::Shipped, OrderStatus::Refunded] {
            assert!(matches!(
                status.check_transition(OrderStatus::Canceled, FulfillmentMode::Ship),
                Transition::Rejected { .. }
            ));
        }
    }

    #[test]
    fn test_no_edge_leads_back_to_pending() {
        for status in ALL {
            if status == OrderStatus::Pending {
                continue;
            }
            assert!(matches!(
                status.check_transition(OrderStatus::Pending, FulfillmentMode::Ship),
                Transition::Rejected { .. }
            ));
        }
    }

    #[test]
    fn test_terminal_states_reject_forward_moves() {
        for status in [OrderStatus::Refunded, OrderStatus::Canceled] {
            assert!(status.is_terminal());
            assert!(matches!(
                status.check_transition(OrderStatus::Delivered, FulfillmentMode::Ship),
                Transition::Rejected { .. }
            ));
        }
    }

    #[test]
    fn test_refundable_states() {
        let refundable: Vec<_> = ALL.into_iter().filter(OrderStatus::is_refundable).collect();
        assert_eq!(
            refundable,
            vec![
                OrderStatus::Paid,
                OrderStatus::Shipped,
                OrderStatus::PickedUp,
                OrderStatus::Delivered
            ]
        );
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::Value::String(status.as_str().to_owned())
            );
        }
    }

    #[test]
    fn test_event_kind_string_roundtrip() {
        assert_eq!(
            "refund_reconciliation".parse::<OrderEventKind>().unwrap(),
            OrderEventKind::RefundReconciliation
        );
        assert_eq!(OrderEventKind::StockConflict.to_string(), "stock_conflict");
        assert_eq!(
            "payment_conflict".parse::<OrderEventKind>().unwrap(),
            OrderEventKind::PaymentConflict
        );
        assert_eq!("pickup".parse::<FulfillmentMode>().unwrap(), FulfillmentMode::Pickup);
        assert!("drone".parse::<FulfillmentMode>().is_err());
    }

    #[test]
    fn test_once_per_order_kinds() {
        assert!(OrderEventKind::Paid.is_once_per_order());
        assert!(OrderEventKind::NotificationSent.is_once_per_order());
        assert!(!OrderEventKind::Refund.is_once_per_order());
        assert!(!OrderEventKind::StockConflict.is_once_per_order());
        assert!(!OrderEventKind::PaymentConflict.is_once_per_order());
    }
}
