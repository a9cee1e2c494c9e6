//! Guest order access tokens.
//!
//! A token is 32 random bytes, handed out once as unpadded base64url. Only
//! its SHA-256 digest is stored, so a database leak does not grant access to
//! any order. Validation compares digests in constant time.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, info, instrument};

use solehaus_core::{OrderEventKind, OrderId};

use crate::db::{RepositoryError, access_tokens, order_events};

const TOKEN_BYTES: usize = 32;

/// Errors that can occur when issuing or validating access tokens.
#[derive(Debug, Error)]
pub enum AccessTokenError {
    /// Unknown, expired or revoked token, or a token for another order.
    /// Rendered exactly like a missing order.
    #[error("access denied")]
    Unauthorized,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<sqlx::Error> for AccessTokenError {
    fn from(err: sqlx::Error) -> Self {
        Self::Repository(err.into())
    }
}

/// A freshly issued token. The plaintext exists only in this value.
#[derive(Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Generate a new random token in its transport form.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 digest of a token as presented by the client.
#[must_use]
pub fn hash_token(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

/// Compare two byte strings without short-circuiting on the first difference.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b) {
        result |= x ^ y;
    }

    result == 0
}

/// Issues, validates and revokes guest access tokens.
#[derive(Debug, Clone)]
pub struct AccessTokenService {
    pool: PgPool,
    ttl: chrono::Duration,
}

impl AccessTokenService {
    #[must_use]
    pub const fn new(pool: PgPool, ttl: chrono::Duration) -> Self {
        Self { pool, ttl }
    }

    /// Issue a new token for an order.
    ///
    /// Existing tokens stay valid; an order may have several.
    ///
    /// # Errors
    ///
    /// Returns `AccessTokenError::Repository` if the digest cannot be stored.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn issue(
        &self,
        order_id: OrderId,
        actor: &str,
    ) -> Result<IssuedToken, AccessTokenError> {
        let token = generate_token();
        let expires_at = Utc::now() + self.ttl;

        let mut tx = self.pool.begin().await?;
        access_tokens::insert(&mut *tx, order_id, &hash_token(&token), expires_at).await?;
        order_events::append(
            &mut *tx,
            order_id,
            OrderEventKind::TokenIssued,
            &format!("Access token issued, expires {}", expires_at.to_rfc3339()),
            actor,
        )
        .await?;
        tx.commit().await?;

        debug!(%order_id, %expires_at, "Access token issued");
        Ok(IssuedToken { token, expires_at })
    }

    /// Check a presented token against an order.
    ///
    /// On success the token's `last_used_at` is updated.
    ///
    /// # Errors
    ///
    /// Returns `AccessTokenError::Unauthorized` if no live token of `order_id`
    /// matches.
    #[instrument(skip(self, token), fields(order_id = %order_id))]
    pub async fn validate(&self, order_id: OrderId, token: &str) -> Result<(), AccessTokenError> {
        let presented = hash_token(token);
        let now = Utc::now();

        let candidates = access_tokens::live_for_order(&self.pool, order_id, now).await?;
        // Check every candidate so timing does not reveal which one matched.
        let matched = candidates.iter().fold(None, |found, candidate| {
            let equal = constant_time_eq(&candidate.token_hash, &presented);
            found.or(equal.then_some(candidate.id))
        });

        let Some(token_id) = matched else {
            debug!(%order_id, "Access token rejected");
            return Err(AccessTokenError::Unauthorized);
        };

        access_tokens::touch(&self.pool, token_id, now).await?;
        Ok(())
    }

    /// Revoke every token of an order. Returns how many were revoked.
    ///
    /// # Errors
    ///
    /// Returns `AccessTokenError::Repository` if the update fails.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn revoke_all(
        &self,
        order_id: OrderId,
        actor: &str,
    ) -> Result<u64, AccessTokenError> {
        let mut tx = self.pool.begin().await?;
        let revoked = access_tokens::revoke_all(&mut *tx, order_id, Utc::now()).await?;
        if revoked > 0 {
            order_events::append(
                &mut *tx,
                order_id,
                OrderEventKind::TokensRevoked,
                &format!("{revoked} access token(s) revoked"),
                actor,
            )
            .await?;
        }
        tx.commit().await?;

        info!(%order_id, revoked, "Access tokens revoked");
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_unique_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        // 32 bytes -> 43 unpadded base64 characters
        assert_eq!(a.len(), 43);
        assert!(
            a.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_hash_is_stable_and_distinct() {
        let token = generate_token();
        assert_eq!(hash_token(&token), hash_token(&token));
        assert_eq!(hash_token(&token).len(), 32);
        assert_ne!(hash_token(&token), hash_token(&generate_token()));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_issued_token_debug_redacts() {
        let issued = IssuedToken {
            token: "plaintext-token".to_owned(),
            expires_at: Utc::now(),
        };
        assert!(!format!("{issued:?}").contains("plaintext"));
    }
}
