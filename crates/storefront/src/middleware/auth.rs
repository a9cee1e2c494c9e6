//! Authentication gates and extractors.
//!
//! Identity is owned by an upstream proxy: a signed-in buyer arrives with
//! their user id in the configured header (`AUTH_USER_HEADER`), guests arrive
//! without it. Admin routes are guarded by a bearer key.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use secrecy::ExposeSecret;
use tracing::warn;

use solehaus_core::UserId;

use crate::error::{AppError, set_sentry_user};
use crate::services::access_token::constant_time_eq;
use crate::state::AppState;

/// Extractor for the signed-in user, if the upstream proxy supplied one.
///
/// A header that is present but not a valid user id is rejected rather than
/// treated as a guest.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(OptionalUser(user): OptionalUser) -> impl IntoResponse {
///     match user {
///         Some(id) => format!("user {id}"),
///         None => "guest".to_string(),
///     }
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct OptionalUser(pub Option<UserId>);

impl FromRequestParts<AppState> for OptionalUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts.headers.get(state.config().auth_user_header.as_str()) else {
            return Ok(Self(None));
        };

        let user_id = raw
            .to_str()
            .ok()
            .and_then(|value| value.trim().parse::<UserId>().ok())
            .ok_or_else(|| AppError::Validation("malformed user identity header".to_string()))?;

        set_sentry_user(&user_id);
        Ok(Self(Some(user_id)))
    }
}

/// Middleware requiring `Authorization: Bearer <ADMIN_API_KEY>`.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let expected = state.config().admin_api_key.expose_secret().as_bytes();
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|key| constant_time_eq(key.as_bytes(), expected));

    if authorized {
        next.run(request).await
    } else {
        warn!(path = %request.uri().path(), "Admin request rejected");
        AppError::Unauthorized.into_response()
    }
}
