//! Shared application state and the health probe.

use axum::{http::StatusCode, Json};
use serde_json::json;

use crate::auth::{AuthService, TokenCodec};
use crate::services::UserAdminService;

/// Shared application state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub users: UserAdminService,
}

impl AppState {
    pub fn new(auth: AuthService, users: UserAdminService) -> Self {
        Self { auth, users }
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }
    pub fn users(&self) -> &UserAdminService {
        &self.users
    }
    pub fn codec(&self) -> &TokenCodec {
        self.auth.codec()
    }
}

/// GET /health: liveness probe.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "auth-service" })),
    )
}
