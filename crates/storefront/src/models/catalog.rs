//! Catalog domain types read at checkout.

use solehaus_core::{ProductId, TenantId, VariantId};

/// Price, cost and stock of a variant at the moment it was read.
///
/// Checkout copies `price_cents`/`cost_cents` into the order's line items so
/// later catalog edits never change a historical order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantSnapshot {
    pub id: VariantId,
    pub product_id: ProductId,
    /// Seller owning the product.
    pub tenant_id: TenantId,
    pub sku: String,
    pub size_label: Option<String>,
    pub price_cents: i64,
    pub cost_cents: i64,
    pub stock: i32,
}
