//! User administration: CRUD and filtered listing over the credential store.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::auth::password::{hash_password, validate_email, validate_password, validate_username};
use crate::error::{AppError, AppResult};
use crate::models::{
    default_roles, NewUser, Role, User, UserChanges, UserPage, UserQuery, UserResponse,
};
use crate::repositories::UserRepository;

pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct CreateUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub roles: Option<BTreeSet<Role>>,
}

#[derive(Clone)]
pub struct UserAdminService {
    users: Arc<dyn UserRepository>,
}

impl UserAdminService {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    /// Administrator-created accounts skip email verification.
    #[instrument(skip_all, fields(username = %input.username))]
    pub async fn create(&self, input: CreateUser) -> AppResult<UserResponse> {
        validate_username(&input.username)?;
        validate_email(&input.email)?;
        validate_password(&input.password)?;
        let roles = match input.roles {
            Some(roles) if !roles.is_empty() => roles,
            _ => default_roles(),
        };
        let user = self
            .users
            .insert(NewUser {
                username: input.username,
                email: input.email,
                password_hash: hash_password(&input.password)?,
                roles,
                email_verified: true,
            })
            .await?;
        info!(user_id = user.id, "user created by admin");
        Ok(user.into())
    }

    pub async fn get(&self, id: i64) -> AppResult<UserResponse> {
        Ok(self.find(id).await?.into())
    }

    async fn find(&self, id: i64) -> AppResult<User> {
        self.users
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User not found with id: {}", id)))
    }

    /// Partial update. Changed username/email must stay unique.
    #[instrument(skip(self, changes))]
    pub async fn update(&self, id: i64, changes: UserChanges) -> AppResult<UserResponse> {
        if let Some(username) = &changes.username {
            validate_username(username)?;
        }
        if let Some(email) = &changes.email {
            validate_email(email)?;
        }
        if matches!(&changes.roles, Some(roles) if roles.is_empty()) {
            return Err(AppError::Validation("Roles must not be empty".to_string()));
        }

        let current = self.find(id).await?;
        if let Some(username) = changes.username.as_deref().filter(|u| *u != current.username) {
            if self.users.find_by_username(username).await?.is_some() {
                return Err(AppError::AlreadyExists("Username is already taken".to_string()));
            }
        }
        if let Some(email) = changes.email.as_deref().filter(|e| *e != current.email) {
            if self.users.find_by_email(email).await?.is_some() {
                return Err(AppError::AlreadyExists("Email is already in use".to_string()));
            }
        }

        let user = self
            .users
            .update(id, changes)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User not found with id: {}", id)))?;
        info!(user_id = id, "user updated");
        Ok(user.into())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> AppResult<()> {
        if !self.users.delete(id).await? {
            return Err(AppError::NotFound(format!("User not found with id: {}", id)));
        }
        info!(user_id = id, "user deleted");
        Ok(())
    }

    pub async fn list(&self, mut query: UserQuery) -> AppResult<UserPage> {
        if query.size == 0 || query.size > MAX_PAGE_SIZE {
            return Err(AppError::Validation(format!(
                "Page size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        query.username = query.username.filter(|u| !u.trim().is_empty());
        let (users, total) = self.users.list(&query).await?;
        Ok(UserPage::new(
            users.into_iter().map(UserResponse::from).collect(),
            &query,
            total,
        ))
    }

    /// Creates the configured administrator unless the username is taken.
    pub async fn ensure_admin(&self, username: &str, email: &str, password: &str) -> AppResult<bool> {
        if self.users.find_by_username(username).await?.is_some() {
            return Ok(false);
        }
        self.create(CreateUser {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            roles: Some(BTreeSet::from([Role::User, Role::Admin])),
        })
        .await?;
        info!(username, "bootstrap admin created");
        Ok(true)
    }
}
