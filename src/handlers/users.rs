//! Admin user-management handlers under `/api/users`. All require the ADMIN role.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::collections::BTreeSet;
use validator::Validate;

use crate::error::AppError;
use crate::handlers::http::AppState;
use crate::middleware::AdminUser;
use crate::models::{Role, UserChanges, UserPage, UserQuery, UserResponse};
use crate::services::users::CreateUser;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 64))]
    pub username: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
    #[serde(default)]
    pub roles: Option<BTreeSet<Role>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 64))]
    pub username: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub roles: Option<BTreeSet<Role>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUsersParams {
    pub username: Option<String>,
    pub role: Option<String>,
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub size: u32,
    #[serde(default = "default_sort")]
    pub sort_by: String,
    #[serde(default = "default_direction")]
    pub direction: String,
}

fn default_page_size() -> u32 {
    10
}

fn default_sort() -> String {
    "id".to_string()
}

fn default_direction() -> String {
    "asc".to_string()
}

impl TryFrom<ListUsersParams> for UserQuery {
    type Error = AppError;

    fn try_from(params: ListUsersParams) -> Result<Self, Self::Error> {
        let role = params
            .role
            .filter(|r| !r.trim().is_empty())
            .map(|r| r.parse::<Role>())
            .transpose()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        Ok(UserQuery {
            username: params.username,
            role,
            page: params.page,
            size: params.size,
            sort: params.sort_by.parse().map_err(AppError::Validation)?,
            direction: params.direction.parse().map_err(AppError::Validation)?,
        })
    }
}

/// POST /api/users
pub async fn create_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(body): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    body.validate().map_err(|e| AppError::Validation(e.to_string()))?;
    let user = state
        .users()
        .create(CreateUser {
            username: body.username,
            email: body.email,
            password: body.password,
            roles: body.roles,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /api/users/:id
pub async fn get_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
) -> Result<Json<UserResponse>, AppError> {
    Ok(Json(state.users().get(id).await?))
}

/// GET /api/users?username=&role=&page=&size=&sortBy=&direction=
pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(params): Query<ListUsersParams>,
) -> Result<Json<UserPage>, AppError> {
    let query = UserQuery::try_from(params)?;
    Ok(Json(state.users().list(query).await?))
}

/// PUT /api/users/:id
pub async fn update_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, AppError> {
    body.validate().map_err(|e| AppError::Validation(e.to_string()))?;
    let changes = UserChanges {
        username: body.username,
        email: body.email,
        roles: body.roles,
    };
    Ok(Json(state.users().update(id, changes).await?))
}

/// DELETE /api/users/:id
pub async fn delete_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.users().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
