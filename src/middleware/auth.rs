//! Auth extractors: bearer access token to [`Identity`], plus the admin gate.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use tracing::debug;

use crate::auth::Identity;
use crate::error::AppError;
use crate::handlers::http::AppState;

/// Extractor: caller identity from a valid `Authorization: Bearer` access token.
#[derive(Clone, Debug)]
pub struct AuthUser(pub Identity);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    AppError::Unauthenticated("Missing or invalid Authorization header".to_string())
                })?;
        let identity = state.codec().identity(bearer.token()).map_err(|_| {
            AppError::Unauthenticated("Invalid or expired access token".to_string())
        })?;
        Ok(AuthUser(identity))
    }
}

/// Extractor: like [`AuthUser`] but requires the `ADMIN` role.
#[derive(Clone, Debug)]
pub struct AdminUser(pub Identity);

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser(identity) = AuthUser::from_request_parts(parts, state).await?;
        if !identity.is_admin() {
            debug!(username = %identity.username, "rejected non-admin caller");
            return Err(AppError::Forbidden("requires admin role".to_string()));
        }
        Ok(AdminUser(identity))
    }
}
