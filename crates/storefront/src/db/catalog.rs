//! Catalog reads used by checkout.

use sqlx::PgExecutor;
use uuid::Uuid;

use solehaus_core::{ProductId, TenantId, VariantId};

use super::RepositoryError;
use crate::models::VariantSnapshot;

#[derive(Debug, sqlx::FromRow)]
struct VariantRow {
    id: VariantId,
    product_id: ProductId,
    tenant_id: TenantId,
    sku: String,
    size_label: Option<String>,
    price_cents: i64,
    cost_cents: i64,
    stock: i32,
}

impl From<VariantRow> for VariantSnapshot {
    fn from(row: VariantRow) -> Self {
        Self {
            id: row.id,
            product_id: row.product_id,
            tenant_id: row.tenant_id,
            sku: row.sku,
            size_label: row.size_label,
            price_cents: row.price_cents,
            cost_cents: row.cost_cents,
            stock: row.stock,
        }
    }
}

/// Current price, cost and stock for a set of variants.
///
/// Variants that do not exist are simply absent from the result.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn variants_by_ids(
    executor: impl PgExecutor<'_>,
    ids: &[VariantId],
) -> Result<Vec<VariantSnapshot>, RepositoryError> {
    let ids: Vec<Uuid> = ids.iter().map(VariantId::as_uuid).collect();
    let rows = sqlx::query_as::<_, VariantRow>(
        r"
        SELECT v.id, v.product_id, p.tenant_id, v.sku, v.size_label,
               v.price_cents, v.cost_cents, v.stock
        FROM commerce.product_variant v
        JOIN commerce.product p ON p.id = v.product_id
        WHERE v.id = ANY($1)
        ORDER BY v.id
        ",
    )
    .bind(ids)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(VariantSnapshot::from).collect())
}

/// The provider sub-account a tenant is paid through.
///
/// `Ok(None)` means the tenant is paid through the platform account.
///
/// # Errors
///
/// Returns `RepositoryError::NotFound` if the tenant does not exist.
pub async fn payment_account(
    executor: impl PgExecutor<'_>,
    tenant_id: TenantId,
) -> Result<Option<String>, RepositoryError> {
    sqlx::query_scalar::<_, Option<String>>(
        "SELECT payment_account_id FROM commerce.tenant WHERE id = $1",
    )
    .bind(tenant_id)
    .fetch_optional(executor)
    .await?
    .ok_or(RepositoryError::NotFound)
}
