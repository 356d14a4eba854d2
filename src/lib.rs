//! Authentication and account-management service.
//!
//! Registration with email verification, JWT access/refresh token pairs,
//! single-use password reset tokens, and admin-only user management.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod services;

pub use config::Config;
pub use error::AppError;
pub use handlers::http::AppState;

use axum::routing::{get, post};
use handlers::http;

/// Build the API router (auth, user admin, health). Used by main and by integration tests.
pub fn create_app(state: AppState) -> axum::Router {
    let auth_routes = axum::Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/me", get(auth::me))
        .route("/verify-email", get(auth::verify_email))
        .route("/reset-password-request", post(auth::reset_password_request))
        .route("/reset-password/:token", post(auth::reset_password));

    let user_routes = axum::Router::new()
        .route("/", get(handlers::list_users).post(handlers::create_user))
        .route(
            "/:id",
            get(handlers::get_user)
                .put(handlers::update_user)
                .delete(handlers::delete_user),
        );

    axum::Router::new()
        .route("/health", get(http::health))
        .nest("/api/auth", auth_routes)
        .nest("/api/users", user_routes)
        .with_state(state)
}
