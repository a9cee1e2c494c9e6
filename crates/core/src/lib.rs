//! Solehaus Core - Shared types library.
//!
//! This crate provides common types used across all Solehaus components:
//! - `storefront` - Checkout, order status, payment webhooks and the admin API
//! - `cli` - Command-line tools for migrations and order maintenance
//!
//! # Architecture
//!
//! The core crate contains only types and pure logic - no I/O, no database
//! access, no HTTP clients. The order state machine lives here so every
//! caller agrees on which transitions are legal.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for ids, money, emails, and order statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
