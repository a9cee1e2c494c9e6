//! HTTP middleware for the storefront.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (hub per request, HTTP context)
//! 2. `TraceLayer` (request span with a `request_id` field)
//! 3. Request ID (fills the span field, Sentry tag and response header)
//! 4. Security headers
//! 5. Admin bearer gate (`/admin` routes only)

pub mod auth;
pub mod request_id;
pub mod security_headers;

pub use auth::{OptionalUser, require_admin};
pub use request_id::{RequestId, request_id_middleware};
pub use security_headers::security_headers_middleware;
