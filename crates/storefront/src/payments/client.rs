//! Stripe REST API client.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use url::Url;

use super::PaymentGateway;
use super::error::PaymentError;
use super::types::{
    ApiErrorBody, CreatePaymentIntent, CreateRefund, ORDER_ID_METADATA_KEY, PaymentIntent, Refund,
};
use crate::config::StripeConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Stripe API client scoped to one platform secret key.
///
/// Requests on behalf of a tenant carry the `Stripe-Account` header so the
/// charge or refund lands on the tenant's connected account.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    api_base: Url,
    secret_key: SecretString,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.api_base.as_str())
            .field("secret_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl StripeClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::Request` if the HTTP client cannot be built.
    pub fn new(config: &StripeConfig) -> Result<Self, PaymentError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PaymentError::Request(e.to_string()))?;

        Ok(Self {
            client,
            api_base: config.api_base.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, PaymentError> {
        self.api_base
            .join(path)
            .map_err(|e| PaymentError::Request(format!("invalid endpoint {path}: {e}")))
    }

    fn authorized(&self, builder: RequestBuilder, account: Option<&str>) -> RequestBuilder {
        let builder = builder.bearer_auth(self.secret_key.expose_secret());
        match account {
            Some(account) => builder.header("Stripe-Account", account),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, PaymentError> {
        let response = builder
            .send()
            .await
            .map_err(|e| PaymentError::Request(e.to_string()))?;

        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, PaymentError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| PaymentError::Response(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(parsed) => (
                parsed.error.code,
                parsed.error.message.unwrap_or_else(|| status.to_string()),
            ),
            Err(_) => (None, status.to_string()),
        };

        warn!(status = status.as_u16(), code = ?code, message = %message, "Stripe API error");
        Err(PaymentError::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }
}

impl PaymentGateway for StripeClient {
    #[instrument(
        skip(self, request),
        fields(order_id = %request.order_id, amount = request.amount_cents)
    )]
    async fn create_payment_intent(
        &self,
        request: &CreatePaymentIntent<'_>,
    ) -> Result<PaymentIntent, PaymentError> {
        let url = self.endpoint("/v1/payment_intents")?;
        let metadata_key = format!("metadata[{ORDER_ID_METADATA_KEY}]");
        let form = [
            ("amount", request.amount_cents.to_string()),
            ("currency", request.currency.as_str().to_string()),
            (metadata_key.as_str(), request.order_id.to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];

        let builder = self
            .authorized(self.client.post(url), request.account)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form);

        let intent: PaymentIntent = Self::send(builder).await?;
        debug!(payment_intent_id = %intent.id, "Payment intent created");
        Ok(intent)
    }

    #[instrument(skip(self))]
    async fn retrieve_payment_intent(
        &self,
        account: Option<&str>,
        payment_intent_id: &str,
    ) -> Result<PaymentIntent, PaymentError> {
        let url = self.endpoint(&format!("/v1/payment_intents/{payment_intent_id}"))?;
        let builder = self.authorized(self.client.get(url), account);
        Self::send(builder).await
    }

    #[instrument(
        skip(self, request),
        fields(order_id = %request.order_id, amount = request.amount_cents)
    )]
    async fn create_refund(&self, request: &CreateRefund<'_>) -> Result<Refund, PaymentError> {
        let url = self.endpoint("/v1/refunds")?;
        let metadata_key = format!("metadata[{ORDER_ID_METADATA_KEY}]");
        let form = [
            ("payment_intent", request.payment_intent_id.to_string()),
            ("amount", request.amount_cents.to_string()),
            (metadata_key.as_str(), request.order_id.to_string()),
        ];

        let builder = self
            .authorized(self.client.post(url), request.account)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form);

        let refund: Refund = Self::send(builder).await?;
        debug!(refund_id = %refund.id, "Refund created");
        Ok(refund)
    }
}
