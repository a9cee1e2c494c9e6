//! Solehaus storefront library.
//!
//! Checkout, payment settlement, refunds and fulfillment for the Solehaus
//! storefront. The binary in `main.rs` wires these modules into an HTTP
//! server; the CLI and integration tests reuse them directly.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod routes;
pub mod services;
pub mod state;
