//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `STOREFRONT_BASE_URL` - Public URL for the storefront
//! - `STRIPE_SECRET_KEY` - Payment provider API key (high entropy)
//! - `STRIPE_WEBHOOK_SECRET` - Webhook signing secret (high entropy)
//! - `ADMIN_API_KEY` - Bearer key for `/admin` routes (min 32 chars, high entropy)
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `STRIPE_API_BASE` - Provider API base URL (default: <https://api.stripe.com>)
//! - `STRIPE_WEBHOOK_TOLERANCE_SECS` - Accepted signature age (default: 300)
//! - `CHECKOUT_CURRENCY` - ISO currency for new orders (default: usd)
//! - `CHECKOUT_FLAT_SHIPPING_CENTS` - Shipping charged on ship-mode orders (default: 0)
//! - `CHECKOUT_ORDER_TTL_MINUTES` - Lifetime of an unpaid order (default: 60)
//! - `ORDER_TOKEN_TTL_DAYS` - Guest access token lifetime (default: 30)
//! - `SETTLEMENT_MAX_RETRIES` - Retries on lock/serialization conflicts (default: 3)
//! - `SETTLEMENT_STATEMENT_TIMEOUT_MS` - Statement/lock timeout inside settlement (default: 5000)
//! - `REFUND_MAX_RETRIES` - Retries on retryable provider failures (default: 3)
//! - `AUTH_USER_HEADER` - Header carrying the upstream-authenticated user id
//!   (default: x-authenticated-user)
//! - `NOTIFY_WEBHOOK_URL` - Where order notifications are posted
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment tag

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use solehaus_core::CurrencyCode;
use thiserror::Error;
use url::Url;

const MIN_ADMIN_KEY_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront
    pub base_url: String,
    /// Bearer key guarding the admin routes
    pub admin_api_key: SecretString,
    /// Header set by the upstream auth proxy with the signed-in user's id
    pub auth_user_header: String,
    /// Payment provider configuration
    pub stripe: StripeConfig,
    /// Checkout pricing and lifetime settings
    pub checkout: CheckoutConfig,
    /// Settlement and refund retry settings
    pub settlement: SettlementConfig,
    /// Order notification endpoint
    pub notify_webhook_url: Option<Url>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment tag
    pub sentry_environment: Option<String>,
}

/// Payment provider configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct StripeConfig {
    /// API base URL (overridable for tests and mocks)
    pub api_base: Url,
    /// Secret API key
    pub secret_key: SecretString,
    /// Webhook signing secret
    pub webhook_secret: SecretString,
    /// Maximum accepted age of a webhook signature timestamp
    pub webhook_tolerance: Duration,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("api_base", &self.api_base.as_str())
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("webhook_tolerance", &self.webhook_tolerance)
            .finish()
    }
}

/// Checkout pricing and lifetime settings.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Currency every new order is priced in
    pub currency: CurrencyCode,
    /// Flat shipping charge for ship-mode orders, in minor units
    pub flat_shipping_cents: i64,
    /// How long an unpaid order stays payable
    pub order_ttl: chrono::Duration,
    /// Lifetime of guest access tokens
    pub token_ttl: chrono::Duration,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            currency: CurrencyCode::Usd,
            flat_shipping_cents: 0,
            order_ttl: chrono::Duration::minutes(60),
            token_ttl: chrono::Duration::days(30),
        }
    }
}

/// Settlement and refund retry settings.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Retries after a lock timeout, deadlock or serialization failure
    pub max_retries: usize,
    /// `statement_timeout` and `lock_timeout` applied to settlement transactions
    pub statement_timeout: Duration,
    /// Retries for retryable refund failures at the provider
    pub refund_max_retries: usize,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            statement_timeout: Duration::from_millis(5000),
            refund_max_retries: 3,
        }
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("STOREFRONT_DATABASE_URL")?;
        let host = get_parsed_env::<IpAddr>("STOREFRONT_HOST", "127.0.0.1")?;
        let port = get_parsed_env::<u16>("STOREFRONT_PORT", "3000")?;
        let base_url = get_required_env("STOREFRONT_BASE_URL")?;
        let admin_api_key = get_validated_secret("ADMIN_API_KEY")?;
        validate_min_length(&admin_api_key, "ADMIN_API_KEY", MIN_ADMIN_KEY_LENGTH)?;

        let notify_webhook_url = get_optional_env("NOTIFY_WEBHOOK_URL")
            .map(|raw| {
                Url::parse(&raw).map_err(|e| {
                    ConfigError::InvalidEnvVar("NOTIFY_WEBHOOK_URL".to_string(), e.to_string())
                })
            })
            .transpose()?;

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            admin_api_key,
            auth_user_header: get_env_or_default("AUTH_USER_HEADER", "x-authenticated-user")
                .to_ascii_lowercase(),
            stripe: StripeConfig::from_env()?,
            checkout: CheckoutConfig::from_env()?,
            settlement: SettlementConfig::from_env()?,
            notify_webhook_url,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl StripeConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let api_base = get_parsed_env::<Url>("STRIPE_API_BASE", "https://api.stripe.com")?;
        let tolerance_secs = get_parsed_env::<u64>("STRIPE_WEBHOOK_TOLERANCE_SECS", "300")?;

        Ok(Self {
            api_base,
            secret_key: get_validated_secret("STRIPE_SECRET_KEY")?,
            webhook_secret: get_validated_secret("STRIPE_WEBHOOK_SECRET")?,
            webhook_tolerance: Duration::from_secs(tolerance_secs),
        })
    }
}

impl CheckoutConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let flat_shipping_cents = get_parsed_env::<i64>("CHECKOUT_FLAT_SHIPPING_CENTS", "0")?;
        if flat_shipping_cents < 0 {
            return Err(ConfigError::InvalidEnvVar(
                "CHECKOUT_FLAT_SHIPPING_CENTS".to_string(),
                "must not be negative".to_string(),
            ));
        }

        Ok(Self {
            currency: get_parsed_env::<CurrencyCode>("CHECKOUT_CURRENCY", "usd")?,
            flat_shipping_cents,
            order_ttl: chrono::Duration::minutes(get_parsed_env::<i64>(
                "CHECKOUT_ORDER_TTL_MINUTES",
                "60",
            )?),
            token_ttl: chrono::Duration::days(get_parsed_env::<i64>("ORDER_TOKEN_TTL_DAYS", "30")?),
        })
    }
}

impl SettlementConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            max_retries: get_parsed_env::<usize>("SETTLEMENT_MAX_RETRIES", "3")?,
            statement_timeout: Duration::from_millis(get_parsed_env::<u64>(
                "SETTLEMENT_STATEMENT_TIMEOUT_MS",
                "5000",
            )?),
            refund_max_retries: get_parsed_env::<usize>("REFUND_MAX_RETRIES", "3")?,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL` (used by Fly.io postgres attach).
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get an environment variable parsed into `T`, falling back to `default`.
fn get_parsed_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Validate that a secret meets a minimum length requirement.
fn validate_min_length(
    secret: &SecretString,
    var_name: &str,
    min_length: usize,
) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < min_length {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                min_length,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= \
                 {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    /// A complete configuration for handler and service tests.
    pub(crate) fn test_config() -> StorefrontConfig {
        StorefrontConfig {
            database_url: SecretString::from("postgres://localhost/solehaus_test"),
            host: "127.0.0.1".parse().unwrap(),
            port: 3000,
            base_url: "http://localhost:3000".to_string(),
            admin_api_key: SecretString::from("Zk3v9QpL2mX7rT4wY8nB1cF6hJ0sD5gA"),
            auth_user_header: "x-authenticated-user".to_string(),
            stripe: StripeConfig {
                api_base: Url::parse("http://127.0.0.1:9").unwrap(),
                secret_key: SecretString::from("sk_test_4eC39HqLyjWDarjtT1zdp7dc"),
                webhook_secret: SecretString::from("whsec_test_9Xk2LmQ8pR4tV7wZ1bN5"),
                webhook_tolerance: Duration::from_secs(300),
            },
            checkout: CheckoutConfig::default(),
            settlement: SettlementConfig::default(),
            notify_webhook_url: None,
            sentry_dsn: None,
            sentry_environment: None,
        }
    }

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_two_chars() {
        // "ab" has entropy of 1 bit per char (50% a, 50% b)
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let result = validate_secret_strength("your-api-key-here", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_provider_keys() {
        assert!(
            validate_secret_strength("sk_test_4eC39HqLyjWDarjtT1zdp7dc", "STRIPE_SECRET_KEY")
                .is_ok()
        );
        assert!(
            validate_secret_strength("whsec_test_9Xk2LmQ8pR4tV7wZ1bN5", "STRIPE_WEBHOOK_SECRET")
                .is_ok()
        );
    }

    #[test]
    fn test_validate_admin_key_too_short() {
        let secret = SecretString::from("short");
        assert!(validate_min_length(&secret, "ADMIN_API_KEY", MIN_ADMIN_KEY_LENGTH).is_err());
    }

    #[test]
    fn test_parsed_env_default() {
        let ttl: i64 = get_parsed_env("SOLEHAUS_TEST_UNSET_TTL", "45").unwrap();
        assert_eq!(ttl, 45);
        let bad = get_parsed_env::<u16>("SOLEHAUS_TEST_UNSET_PORT", "not-a-port");
        assert!(matches!(bad, Err(ConfigError::InvalidEnvVar(_, _))));
    }

    #[test]
    fn test_socket_addr() {
        let addr = test_config().socket_addr();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 3000);
    }

    #[test]
    fn test_stripe_config_debug_redacts_secrets() {
        let debug_output = format!("{:?}", test_config().stripe);

        assert!(debug_output.contains("127.0.0.1"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("sk_test_4eC39HqLyjWDarjtT1zdp7dc"));
        assert!(!debug_output.contains("whsec_test"));
    }
}
