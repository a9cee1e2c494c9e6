//! Response headers for a JSON API that carries bearer-like secrets.
//!
//! Order status URLs embed access tokens in the query string and checkout
//! responses carry client secrets, so nothing may be cached or leaked through
//! the `Referer` header.

use axum::{
    extract::Request,
    http::{
        HeaderValue,
        header::{CACHE_CONTROL, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS},
    },
    middleware::Next,
    response::Response,
};

/// Add security headers to all responses.
///
/// - `Cache-Control: no-store`
/// - `Referrer-Policy: no-referrer`
/// - `X-Content-Type-Options: nosniff`
/// - `X-Frame-Options: DENY`
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));

    response
}
