//! HTTP route handlers for the storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health                              - Liveness check
//! GET    /health/ready                        - Readiness check (database)
//!
//! # Public API
//! POST   /api/checkout/session                - Create or replay a checkout session
//! POST   /api/checkout/confirm                - Settle after client-side confirmation
//! GET    /api/orders/{id}?token=              - Order status (owner or access token)
//! POST   /api/webhooks/stripe                 - Payment provider webhook
//!
//! # Admin (requires `Authorization: Bearer <ADMIN_API_KEY>`)
//! POST   /admin/orders/{id}/refund            - Refund (partial or remaining)
//! POST   /admin/orders/{id}/ship              - Mark shipped
//! POST   /admin/orders/{id}/pickup            - Mark picked up
//! POST   /admin/orders/{id}/deliver           - Mark delivered
//! POST   /admin/orders/{id}/cancel            - Cancel an unpaid order
//! POST   /admin/orders/{id}/access-tokens     - Issue an access token
//! DELETE /admin/orders/{id}/access-tokens     - Revoke all access tokens
//! GET    /admin/reconciliation                - Orders flagged for review
//! ```

pub mod admin;
pub mod checkout;
pub mod orders;
pub mod webhooks;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::middleware::{request_id_middleware, require_admin, security_headers_middleware};
use crate::state::AppState;

/// Create the public API routes router.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout/session", post(checkout::create_session))
        .route("/checkout/confirm", post(checkout::confirm))
        .route("/orders/{id}", get(orders::show))
        .route("/webhooks/stripe", post(webhooks::stripe))
}

/// Create the admin routes router (auth is layered on in [`router`]).
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/orders/{id}/refund", post(admin::refund))
        .route("/orders/{id}/ship", post(admin::ship))
        .route("/orders/{id}/pickup", post(admin::pickup))
        .route("/orders/{id}/deliver", post(admin::deliver))
        .route("/orders/{id}/cancel", post(admin::cancel))
        .route(
            "/orders/{id}/access-tokens",
            post(admin::issue_token).delete(admin::revoke_tokens),
        )
        .route("/reconciliation", get(admin::reconciliation))
}

/// Build the full application router with tracing and request ids.
pub fn router(state: AppState) -> Router {
    let admin = admin_routes().route_layer(from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .nest("/api", api_routes())
        .nest("/admin", admin)
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = tracing::field::Empty,
                )
            }),
        )
        .with_state(state)
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Returns 503 Service Unavailable if the database is not reachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    match sqlx::query("SELECT 1").fetch_one(state.pool()).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use axum::http::header;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    fn app() -> Router {
        let config = test_config();
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/solehaus_test")
            .unwrap();
        router(AppState::new(config, pool).unwrap())
    }

    async fn error_code(response: axum::response::Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        json["code"].as_str().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn test_health_echoes_request_id() {
        let response = app()
            .oneshot(
                Request::get("/health")
                    .header("x-request-id", "req-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-request-id"], "req-123");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    }

    #[tokio::test]
    async fn test_admin_requires_bearer_key() {
        let uri = format!("/admin/orders/{}/pickup", uuid::Uuid::new_v4());

        let missing = app()
            .oneshot(Request::post(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(missing).await, "UNAUTHORIZED");

        let wrong = app()
            .oneshot(
                Request::post(&uri)
                    .header(header::AUTHORIZATION, "Bearer not-the-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_webhook_without_signature_is_rejected() {
        let response = app()
            .oneshot(
                Request::post("/api/webhooks/stripe")
                    .body(Body::from(r#"{"id":"evt_1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "INVALID_SIGNATURE");
    }

    #[tokio::test]
    async fn test_order_status_without_credentials_is_not_found() {
        let uri = format!("/api/orders/{}", uuid::Uuid::new_v4());
        let response = app()
            .oneshot(Request::get(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_confirm_without_credentials_is_not_found() {
        let body = format!(
            r#"{{"order_id":"{}","payment_intent_id":"pi_123"}}"#,
            uuid::Uuid::new_v4()
        );
        let response = app()
            .oneshot(
                Request::post("/api/checkout/confirm")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_checkout_rejects_empty_cart_before_touching_storage() {
        let response = app()
            .oneshot(
                Request::post("/api/checkout/session")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        r#"{"items":[],"idempotency_key":"checkout-key-3","guest_email":"a@b.co"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "VALIDATION_ERROR");
    }
}
