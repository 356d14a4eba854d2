//! Auth HTTP handlers under `/api/auth`.

use axum::{
    extract::{Path, Query, State},
    http::{header::LOCATION, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::service::Registration;
use crate::error::AppError;
use crate::handlers::http::AppState;
use crate::middleware::AuthUser;
use crate::models::{TokenResponse, UserResponse};

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 64))]
    pub username: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(length(min = 1))]
    pub username_or_email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshParams {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailParams {
    pub token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordResetRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, max = 128))]
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

fn validate<T: Validate>(body: &T) -> Result<(), AppError> {
    body.validate().map_err(|e| AppError::Validation(e.to_string()))
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<UserResponse>, AppError> {
    validate(&body)?;
    let user = state
        .auth()
        .register(Registration {
            username: body.username,
            email: body.email,
            password: body.password,
        })
        .await?;
    Ok(Json(user.into()))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    validate(&body)?;
    let tokens = state
        .auth()
        .login(&body.username_or_email, &body.password)
        .await?;
    Ok(Json(tokens))
}

/// POST /api/auth/refresh?refreshToken=
pub async fn refresh(
    State(state): State<AppState>,
    Query(params): Query<RefreshParams>,
) -> Result<Json<TokenResponse>, AppError> {
    Ok(Json(state.auth().refresh(&params.refresh_token).await?))
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<AppState>,
    user: Option<AuthUser>,
) -> Result<Json<UserResponse>, AppError> {
    let identity = user.map(|AuthUser(identity)| identity);
    Ok(Json(state.auth().current_user(identity.as_ref()).await?))
}

/// POST /api/auth/reset-password-request
pub async fn reset_password_request(
    State(state): State<AppState>,
    Json(body): Json<PasswordResetRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    validate(&body)?;
    state.auth().request_password_reset(&body.email).await?;
    Ok(MessageResponse::new("Password reset link sent to email."))
}

/// POST /api/auth/reset-password/:token
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(body): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    validate(&body)?;
    if body.new_password != body.confirm_password {
        return Err(AppError::Validation("Passwords do not match".to_string()));
    }
    state.auth().reset_password(&token, &body.new_password).await?;
    Ok(MessageResponse::new("Password reset successfully."))
}

/// GET /api/auth/verify-email?token=, redirects (302) to the frontend login page.
pub async fn verify_email(
    State(state): State<AppState>,
    Query(params): Query<VerifyEmailParams>,
) -> Result<Response, AppError> {
    let target = state.auth().verify_email(&params.token).await?;
    Ok((StatusCode::FOUND, [(LOCATION, target)]).into_response())
}
