//! Order notifications to the downstream messaging service.
//!
//! Email rendering and chat delivery live elsewhere; this service only posts
//! a small JSON payload to `NOTIFY_WEBHOOK_URL`. Without a URL it logs the
//! notification instead.

use std::time::Duration;

use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, instrument, warn};
use url::Url;

use solehaus_core::{CurrencyCode, OrderEventKind, OrderId, OrderStatus};

use crate::db::{RepositoryError, order_events, orders};
use crate::models::Order;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur when sending a notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification endpoint returned {0}")]
    Status(u16),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Payload posted for an order event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderNotification {
    pub event: &'static str,
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub total_cents: i64,
    pub currency: CurrencyCode,
    pub guest: bool,
}

impl OrderNotification {
    /// Notification announcing a paid order.
    #[must_use]
    pub fn order_paid(order: &Order) -> Self {
        Self {
            event: "order.paid",
            order_id: order.id,
            status: order.status,
            total_cents: order.total_cents,
            currency: order.currency,
            guest: order.owner.is_guest(),
        }
    }
}

/// Posts order notifications.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: reqwest::Client,
    url: Option<Url>,
}

impl Notifier {
    /// Create a notifier; `url = None` only logs.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::Http` if the HTTP client fails to build.
    pub fn new(url: Option<Url>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(NOTIFY_TIMEOUT).build()?;
        Ok(Self { client, url })
    }

    /// Send a notification once per order.
    ///
    /// The `notification_sent` event is appended before sending; if another
    /// caller already appended it, nothing is sent. Returns whether this call
    /// sent it. Delivery is at most once: a failed post is logged, not retried.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::Repository` if the guard event cannot be written.
    #[instrument(skip(self, pool, notification), fields(order_id = %notification.order_id))]
    pub async fn notify_once(
        &self,
        pool: &PgPool,
        notification: &OrderNotification,
    ) -> Result<bool, NotifyError> {
        let first = order_events::append(
            pool,
            notification.order_id,
            OrderEventKind::NotificationSent,
            &format!("Notification {} dispatched", notification.event),
            "notifier",
        )
        .await?;
        if !first {
            info!(order_id = %notification.order_id, "Notification already sent, skipping");
            return Ok(false);
        }

        if let Err(err) = self.send(notification).await {
            warn!(
                order_id = %notification.order_id,
                event = notification.event,
                error = %err,
                "Order notification failed"
            );
        }
        Ok(true)
    }

    /// Post the paid notification for an order once, outside any transaction.
    ///
    /// Failures are logged; a missed notification never fails settlement.
    pub async fn notify_paid(&self, pool: &PgPool, order_id: OrderId) {
        let order = match orders::get(pool, order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => return,
            Err(err) => {
                warn!(%order_id, error = %err, "Could not load order for notification");
                return;
            }
        };

        if let Err(err) = self
            .notify_once(pool, &OrderNotification::order_paid(&order))
            .await
        {
            warn!(%order_id, error = %err, "Paid notification not sent");
        }
    }

    async fn send(&self, notification: &OrderNotification) -> Result<(), NotifyError> {
        let Some(url) = &self.url else {
            info!(
                order_id = %notification.order_id,
                event = notification.event,
                "No notification endpoint configured, logging only"
            );
            return Ok(());
        };

        let response = self.client.post(url.clone()).json(notification).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::tests::pending_order;

    #[test]
    fn test_order_paid_payload() {
        let mut order = pending_order(9900);
        order.status = OrderStatus::Paid;
        let json = serde_json::to_value(OrderNotification::order_paid(&order)).unwrap_or_default();
        assert_eq!(json["event"], "order.paid");
        assert_eq!(json["status"], "paid");
        assert_eq!(json["total_cents"], 9900);
        assert_eq!(json["guest"], true);
    }

    #[tokio::test]
    async fn test_send_without_url_only_logs() {
        let notifier = Notifier::new(None).unwrap_or_else(|e| panic!("client: {e}"));
        let notification = OrderNotification::order_paid(&pending_order(1));
        assert!(notifier.send(&notification).await.is_ok());
    }
}
