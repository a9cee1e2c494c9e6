//! Domain models for the settlement service.
//!
//! These types represent validated domain objects separate from database row
//! types, which live next to their queries in [`crate::db`].

pub mod catalog;
pub mod order;

pub use catalog::VariantSnapshot;
pub use order::{LineItem, Order, OrderEvent, OrderItem, OrderOwner};
