//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::StorefrontConfig;
use crate::payments::{PaymentError, StripeClient};
use crate::services::{
    AccessTokenService, CheckoutService, ConfirmationService, FulfillmentService, Notifier,
    NotifyError, RefundService, SettlementService, WebhookService,
};

/// Error building the application state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("payment client: {0}")]
    Payment(#[from] PaymentError),
    #[error("notifier: {0}")]
    Notifier(#[from] NotifyError),
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like database connections, configuration and services.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: PgPool,
    checkout: CheckoutService<StripeClient>,
    confirmations: ConfirmationService<StripeClient>,
    webhooks: WebhookService,
    refunds: RefundService<StripeClient>,
    fulfillment: FulfillmentService,
    tokens: AccessTokenService,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Arguments
    ///
    /// * `config` - Storefront configuration
    /// * `pool` - `PostgreSQL` connection pool
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn new(config: StorefrontConfig, pool: PgPool) -> Result<Self, StateError> {
        let stripe = StripeClient::new(&config.stripe)?;
        let notifier = Notifier::new(config.notify_webhook_url.clone())?;
        let tokens = AccessTokenService::new(pool.clone(), config.checkout.token_ttl);
        let settlement = SettlementService::new(pool.clone(), config.settlement.clone());

        let checkout = CheckoutService::new(
            pool.clone(),
            stripe.clone(),
            tokens.clone(),
            config.checkout.clone(),
        );
        let confirmations = ConfirmationService::new(
            pool.clone(),
            stripe.clone(),
            settlement.clone(),
            notifier.clone(),
        );
        let webhooks = WebhookService::new(
            pool.clone(),
            settlement,
            notifier,
            config.stripe.webhook_secret.clone(),
            config.stripe.webhook_tolerance,
        );
        let refunds =
            RefundService::new(pool.clone(), stripe, config.settlement.refund_max_retries);
        let fulfillment = FulfillmentService::new(pool.clone());

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                checkout,
                confirmations,
                webhooks,
                refunds,
                fulfillment,
                tokens,
            }),
        })
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    #[must_use]
    pub fn checkout(&self) -> &CheckoutService<StripeClient> {
        &self.inner.checkout
    }

    #[must_use]
    pub fn confirmations(&self) -> &ConfirmationService<StripeClient> {
        &self.inner.confirmations
    }

    #[must_use]
    pub fn webhooks(&self) -> &WebhookService {
        &self.inner.webhooks
    }

    #[must_use]
    pub fn refunds(&self) -> &RefundService<StripeClient> {
        &self.inner.refunds
    }

    #[must_use]
    pub fn fulfillment(&self) -> &FulfillmentService {
        &self.inner.fulfillment
    }

    #[must_use]
    pub fn tokens(&self) -> &AccessTokenService {
        &self.inner.tokens
    }
}
