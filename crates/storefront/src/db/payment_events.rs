//! Payment event ledger: one row per provider webhook event.
//!
//! The `UNIQUE (provider_event_id)` constraint is the deduplication
//! mechanism; two concurrent deliveries of the same event race on the insert
//! and exactly one wins.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use solehaus_core::OrderId;

use super::RepositoryError;

/// Result of attempting to record a payment event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First time this event id was seen.
    Inserted,
    /// Another delivery already recorded this event id.
    AlreadyExists,
}

/// A processed provider event.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PaymentEventRecord {
    pub provider_event_id: String,
    pub event_type: String,
    /// Provider-side creation time (unix seconds).
    pub provider_created: i64,
    /// Hex SHA-256 of the raw payload.
    pub payload_sha256: String,
    pub order_id: Option<OrderId>,
    /// What processing did (`settled`, `already_settled`, `ignored`, ...).
    pub outcome: String,
    pub processed_at: DateTime<Utc>,
}

/// Parameters for recording a processed event.
#[derive(Debug, Clone)]
pub struct NewPaymentEvent<'a> {
    pub provider_event_id: &'a str,
    pub event_type: &'a str,
    pub provider_created: i64,
    pub payload_sha256: &'a str,
    pub order_id: Option<OrderId>,
    pub outcome: &'a str,
}

/// Whether an event id has already been processed.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn exists(
    executor: impl PgExecutor<'_>,
    provider_event_id: &str,
) -> Result<bool, RepositoryError> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM commerce.payment_event WHERE provider_event_id = $1)",
    )
    .bind(provider_event_id)
    .fetch_one(executor)
    .await?;

    Ok(exists)
}

/// Record a processed event, losing gracefully to a concurrent recorder.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn record(
    executor: impl PgExecutor<'_>,
    event: &NewPaymentEvent<'_>,
) -> Result<RecordOutcome, RepositoryError> {
    let inserted = sqlx::query_scalar::<_, i64>(
        r"
        INSERT INTO commerce.payment_event (
            provider_event_id, event_type, provider_created, payload_sha256, order_id, outcome
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (provider_event_id) DO NOTHING
        RETURNING id
        ",
    )
    .bind(event.provider_event_id)
    .bind(event.event_type)
    .bind(event.provider_created)
    .bind(event.payload_sha256)
    .bind(event.order_id)
    .bind(event.outcome)
    .fetch_optional(executor)
    .await?;

    Ok(if inserted.is_some() {
        RecordOutcome::Inserted
    } else {
        RecordOutcome::AlreadyExists
    })
}

/// Look up a processed event by provider id.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn get(
    executor: impl PgExecutor<'_>,
    provider_event_id: &str,
) -> Result<Option<PaymentEventRecord>, RepositoryError> {
    let record = sqlx::query_as::<_, PaymentEventRecord>(
        r"
        SELECT provider_event_id, event_type, provider_created, payload_sha256,
               order_id, outcome, processed_at
        FROM commerce.payment_event
        WHERE provider_event_id = $1
        ",
    )
    .bind(provider_event_id)
    .fetch_optional(executor)
    .await?;

    Ok(record)
}
