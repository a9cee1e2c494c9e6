//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers return `Result<T, AppError>`.
//! Responses are JSON: `{"error": "<message>", "code": "<CODE>"}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::services::{
    AccessTokenError, CheckoutError, ConfirmError, FulfillmentError, RefundError,
    SettlementError, WebhookError,
};

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed input, rejected before touching storage.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing order, or an order the caller may not see. Both render the
    /// same body.
    #[error("Not found")]
    NotFound,

    /// Missing or wrong admin credentials.
    #[error("Unauthorized")]
    Unauthorized,

    /// Stock cannot cover the request.
    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    /// The order's status does not allow the operation.
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// Idempotency key reused for a different cart.
    #[error("Idempotency key already used for a different cart")]
    CartMismatch,

    /// Idempotency key of an order that can no longer be paid.
    #[error("Checkout expired")]
    CheckoutExpired,

    /// A payment does not pay for the order it was presented with.
    #[error("Payment mismatch: {0}")]
    PaymentMismatch(String),

    /// The payment has not (yet) succeeded at the provider.
    #[error("Payment not completed: {0}")]
    PaymentNotSucceeded(String),

    /// Webhook signature did not verify.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// The payment provider failed or rejected the call.
    #[error("Payment provider error: {0}")]
    PaymentProvider(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidSignature(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InsufficientStock(_)
            | Self::StateConflict(_)
            | Self::CartMismatch
            | Self::CheckoutExpired
            | Self::PaymentMismatch(_)
            | Self::PaymentNotSucceeded(_) => StatusCode::CONFLICT,
            Self::PaymentProvider(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::InsufficientStock(_) => "INSUFFICIENT_STOCK",
            Self::StateConflict(_) => "STATE_CONFLICT",
            Self::CartMismatch => "CART_MISMATCH",
            Self::CheckoutExpired => "CHECKOUT_EXPIRED",
            Self::PaymentMismatch(_) => "PAYMENT_MISMATCH",
            Self::PaymentNotSucceeded(_) => "PAYMENT_NOT_SUCCEEDED",
            Self::InvalidSignature(_) => "INVALID_SIGNATURE",
            Self::PaymentProvider(_) => "PAYMENT_PROVIDER_ERROR",
            Self::Database(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        // Don't expose internal error details to clients
        let message = match &self {
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::PaymentProvider(_) => "Payment provider error".to_string(),
            _ => self.to_string(),
        };

        let body = json!({ "error": message, "code": self.code() });
        (status, Json(body)).into_response()
    }
}

impl From<CheckoutError> for AppError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::Validation(msg) => Self::Validation(msg),
            CheckoutError::CartMismatch => Self::CartMismatch,
            CheckoutError::CheckoutExpired => Self::CheckoutExpired,
            CheckoutError::UnknownVariant(id) => Self::Validation(format!("unknown variant {id}")),
            err @ CheckoutError::OutOfStock { .. } => Self::InsufficientStock(err.to_string()),
            CheckoutError::Provider(err) => Self::PaymentProvider(err.to_string()),
            CheckoutError::AccessToken(err) => err.into(),
            CheckoutError::Repository(err) => err.into(),
        }
    }
}

impl From<RefundError> for AppError {
    fn from(err: RefundError) -> Self {
        match err {
            RefundError::OrderNotFound(_) => Self::NotFound,
            RefundError::InvalidAmount(msg) => Self::Validation(msg),
            err @ (RefundError::StateConflict { .. } | RefundError::MissingPayment(_)) => {
                Self::StateConflict(err.to_string())
            }
            RefundError::Provider(err) => Self::PaymentProvider(err.to_string()),
            err @ RefundError::Reconciliation { .. } => Self::Internal(err.to_string()),
            RefundError::Repository(err) => err.into(),
        }
    }
}

impl From<FulfillmentError> for AppError {
    fn from(err: FulfillmentError) -> Self {
        match err {
            FulfillmentError::OrderNotFound(_) => Self::NotFound,
            err @ FulfillmentError::StateConflict { .. } => Self::StateConflict(err.to_string()),
            FulfillmentError::InvalidInput(msg) => Self::Validation(msg),
            FulfillmentError::Repository(err) => err.into(),
        }
    }
}

impl From<AccessTokenError> for AppError {
    fn from(err: AccessTokenError) -> Self {
        match err {
            AccessTokenError::Unauthorized => Self::NotFound,
            AccessTokenError::Repository(err) => err.into(),
        }
    }
}

impl From<WebhookError> for AppError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::Signature(err) => Self::InvalidSignature(err.to_string()),
            err @ WebhookError::Settlement(_) => Self::Internal(err.to_string()),
            WebhookError::Repository(err) => err.into(),
        }
    }
}

impl From<ConfirmError> for AppError {
    fn from(err: ConfirmError) -> Self {
        match err {
            err @ ConfirmError::MissingIntent => Self::Validation(err.to_string()),
            err @ (ConfirmError::IntentMismatch(_) | ConfirmError::AmountMismatch { .. }) => {
                Self::PaymentMismatch(err.to_string())
            }
            ConfirmError::NotSucceeded(status) => Self::PaymentNotSucceeded(status),
            err @ ConfirmError::NotPayable(_) => Self::StateConflict(err.to_string()),
            ConfirmError::Settlement(err @ SettlementError::InsufficientStock { .. }) => {
                Self::InsufficientStock(err.to_string())
            }
            ConfirmError::Settlement(SettlementError::Repository(err))
            | ConfirmError::Repository(err) => err.into(),
            ConfirmError::Settlement(err) => Self::Internal(err.to_string()),
            ConfirmError::Provider(err) => Self::PaymentProvider(err.to_string()),
        }
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after the upstream identity header is accepted to associate
/// errors with users.
pub fn set_sentry_user(user_id: &impl ToString) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            ..Default::default()
        }));
    });
}

/// Add a breadcrumb for a processing step.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of steps
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("webhook", "Event verified", Some(&[("event_id", "evt_123")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::signature::SignatureError;
    use solehaus_core::{OrderId, OrderStatus};

    fn status_of(err: impl Into<AppError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::Validation("cart is empty".to_string());
        assert_eq!(err.to_string(), "Validation error: cart is empty");
        assert_eq!(AppError::NotFound.to_string(), "Not found");
    }

    #[test]
    fn test_taxonomy_status_codes() {
        assert_eq!(status_of(CheckoutError::CartMismatch), StatusCode::CONFLICT);
        assert_eq!(
            status_of(CheckoutError::Validation("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(RefundError::StateConflict {
                current: OrderStatus::Pending
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(RefundError::OrderNotFound(OrderId::generate())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(WebhookError::Signature(SignatureError::Mismatch)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ConfirmError::NotSucceeded("requires_payment_method".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ConfirmError::AmountMismatch {
                paid: 5000,
                currency: "jpy".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(AppError::PaymentProvider("timeout".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(RepositoryError::NotFound),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_unrecorded_refund_is_internal() {
        let err = AppError::from(RefundError::Reconciliation {
            order_id: OrderId::generate(),
            refund_id: "re_123".into(),
            source: RepositoryError::Conflict("order moved to canceled".into()),
        });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), AppError::Internal(String::new()).code());
    }

    #[test]
    fn test_denied_token_looks_like_missing_order() {
        let denied = AppError::from(AccessTokenError::Unauthorized);
        assert_eq!(denied.status(), StatusCode::NOT_FOUND);
        assert_eq!(denied.code(), AppError::NotFound.code());
        assert_eq!(denied.to_string(), AppError::NotFound.to_string());
    }

    #[tokio::test]
    async fn test_body_is_json_with_code() {
        let response = AppError::CartMismatch.into_response();
        let bytes = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap_or_default();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap_or_default();
        assert_eq!(body["code"], "CART_MISMATCH");
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let response = AppError::Internal("pool exhausted on db-2".into()).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap_or_default();
        let text = String::from_utf8_lossy(&bytes);
        assert!(!text.contains("db-2"));
    }
}
