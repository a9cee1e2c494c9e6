//! Payment provider errors.

use thiserror::Error;

/// Errors that can occur when calling the payment provider.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// HTTP request failed before a response arrived.
    #[error("payment provider request failed: {0}")]
    Request(String),

    /// Response could not be decoded.
    #[error("payment provider response error: {0}")]
    Response(String),

    /// Provider answered with an error status.
    #[error("payment provider error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Provider error code, e.g. `charge_already_refunded`.
        code: Option<String>,
        /// Human-readable message.
        message: String,
    },
}

impl PaymentError {
    /// Whether the same call may succeed if retried.
    ///
    /// Network failures, rate limiting and provider-side 5xx are transient;
    /// everything else is a real rejection.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Response(_) => false,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> PaymentError {
        PaymentError::Api {
            status,
            code: None,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(PaymentError::Request("connection reset".to_string()).is_retryable());
        assert!(api(429).is_retryable());
        assert!(api(503).is_retryable());
        assert!(!api(400).is_retryable());
        assert!(!api(402).is_retryable());
        assert!(!PaymentError::Response("bad json".to_string()).is_retryable());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            api(402).to_string(),
            "payment provider error (402): boom"
        );
    }
}
