//! Order maintenance commands.
//!
//! # Usage
//!
//! ```bash
//! # Cancel pending orders whose checkout window has closed
//! sole-cli orders expire --limit 500
//!
//! # List orders flagged for manual reconciliation
//! sole-cli orders reconcile
//! ```

use chrono::Utc;

use solehaus_storefront::db::orders;
use solehaus_storefront::services::FulfillmentService;

use super::{CommandError, connect};

/// Cancel expired pending orders, at most `limit` per run.
pub async fn expire(limit: i64) -> Result<(), CommandError> {
    let pool = connect().await?;
    let canceled = FulfillmentService::new(pool)
        .cancel_expired(Utc::now(), limit)
        .await?;

    tracing::info!(count = canceled.len(), "Expiry sweep complete");
    Ok(())
}

/// Print orders that need an operator's attention.
#[allow(clippy::print_stdout)]
pub async fn reconcile() -> Result<(), CommandError> {
    let pool = connect().await?;
    let cases = orders::list_needing_reconciliation(&pool).await?;

    if cases.is_empty() {
        tracing::info!("No orders need reconciliation");
        return Ok(());
    }

    for case in &cases {
        println!(
            "{}\t{}\t{}\t{}/{}\t{}\t{}",
            case.flagged_at.to_rfc3339(),
            case.order.id,
            case.order.status,
            case.order.refund_amount_cents,
            case.order.total_cents,
            case.kind,
            case.message,
        );
    }

    tracing::info!(count = cases.len(), "Orders needing reconciliation listed");
    Ok(())
}
