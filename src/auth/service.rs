//! Authentication core: registration, login, token refresh, email
//! verification, password reset, and current-user resolution.
//!
//! An account is `Unverified` until an EMAIL_VERIFICATION token issued for
//! it is consumed. Login never checks the password of an unverified account.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::jwt::{Identity, TokenClass, TokenCodec};
use super::password::{
    hash_password, validate_email, validate_password, validate_username, verify_password,
};
use crate::error::{AppError, AppResult};
use crate::models::{default_roles, NewUser, TokenResponse, TokenType, User, UserResponse};
use crate::repositories::UserRepository;
use crate::services::ledger::TokenLedger;
use crate::services::notifier::NotificationSender;

#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    ledger: TokenLedger,
    codec: TokenCodec,
    notifier: Arc<dyn NotificationSender>,
    frontend_url: String,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        ledger: TokenLedger,
        codec: TokenCodec,
        notifier: Arc<dyn NotificationSender>,
        frontend_url: String,
    ) -> Self {
        Self {
            users,
            ledger,
            codec,
            notifier,
            frontend_url,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Creates an unverified `USER` account and emails a verification token.
    #[instrument(skip_all, fields(username = %input.username))]
    pub async fn register(&self, input: Registration) -> AppResult<User> {
        validate_username(&input.username)?;
        validate_email(&input.email)?;
        validate_password(&input.password)?;

        if self.users.find_by_username(&input.username).await?.is_some() {
            return Err(AppError::AlreadyExists("Username is already taken".to_string()));
        }
        if self.users.find_by_email(&input.email).await?.is_some() {
            return Err(AppError::AlreadyExists("Email is already in use".to_string()));
        }

        let user = self
            .users
            .insert(NewUser {
                username: input.username,
                email: input.email,
                password_hash: hash_password(&input.password)?,
                roles: default_roles(),
                email_verified: false,
            })
            .await?;

        let token = self.ledger.issue(user.id, TokenType::EmailVerification).await?;
        self.notifier.send_verification(&user.email, &token);

        info!(user_id = user.id, "user registered");
        Ok(user)
    }

    async fn find_login_subject(&self, username_or_email: &str) -> AppResult<Option<User>> {
        match self.users.find_by_username(username_or_email).await? {
            Some(user) => Ok(Some(user)),
            None => self.users.find_by_email(username_or_email).await,
        }
    }

    /// Unverified accounts get a fresh verification email and `AccountUnverified`.
    #[instrument(skip_all)]
    pub async fn login(&self, username_or_email: &str, password: &str) -> AppResult<TokenResponse> {
        let user = self.find_login_subject(username_or_email).await?;

        if let Some(user) = user.as_ref().filter(|u| !u.email_verified) {
            let token = self.ledger.issue(user.id, TokenType::EmailVerification).await?;
            self.notifier.send_verification(&user.email, &token);
            info!(user_id = user.id, "login blocked, verification email resent");
            return Err(AppError::AccountUnverified(
                "Email not verified. A new verification email has been sent.".to_string(),
            ));
        }

        let user = match user {
            Some(user) if verify_password(password, &user.password_hash)? => user,
            _ => {
                warn!("login failed");
                return Err(AppError::InvalidCredentials);
            }
        };

        let access_token = self.codec.issue_access_token(&user.username, &user.roles)?;
        let refresh_token = self.codec.issue_refresh_token(user.id, &user.username)?;
        info!(user_id = user.id, "user logged in");
        Ok(TokenResponse::bearer(access_token, refresh_token))
    }

    /// Mints a new access token; the refresh token is returned unchanged.
    ///
    /// Refresh tokens carry no roles, so roles are read from the user record.
    /// A subject that no longer resolves to the account the token was issued
    /// for (deleted, or renamed and the name reused) is an invalid token.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<TokenResponse> {
        let invalid = || AppError::InvalidToken("Invalid or expired refresh token".to_string());

        let claims = self
            .codec
            .decode(refresh_token, TokenClass::Refresh)
            .map_err(|_| invalid())?;
        let user = self
            .users
            .find_by_username(&claims.sub)
            .await?
            .filter(|user| claims.uid == Some(user.id))
            .ok_or_else(invalid)?;

        let access_token = self.codec.issue_access_token(&user.username, &user.roles)?;
        Ok(TokenResponse::bearer(access_token, refresh_token.to_string()))
    }

    /// Consumes an EMAIL_VERIFICATION token and returns the redirect target.
    #[instrument(skip_all)]
    pub async fn verify_email(&self, token: &str) -> AppResult<String> {
        let consumed = self.ledger.consume(token).await?;
        if consumed.token_type != TokenType::EmailVerification {
            warn!(user_id = consumed.user_id, "non-verification token presented to verify-email");
            return Err(AppError::InvalidToken("Invalid verification token".to_string()));
        }

        if !self.users.mark_email_verified(consumed.user_id).await? {
            return Err(AppError::InvalidToken("Invalid verification token".to_string()));
        }

        info!(user_id = consumed.user_id, "email verified");
        Ok(format!("{}/login?verified=true", self.frontend_url))
    }

    /// Replaces any pending reset token and emails a new one.
    ///
    /// Reports `NotFound` for unknown addresses, which reveals whether an
    /// account exists.
    #[instrument(skip_all)]
    pub async fn request_password_reset(&self, email: &str) -> AppResult<()> {
        let user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No user found with email: {}", email)))?;

        let token = self.ledger.issue(user.id, TokenType::PasswordReset).await?;
        self.notifier.send_password_reset(&user.email, &token);
        info!(user_id = user.id, "password reset requested");
        Ok(())
    }

    /// The token is gone once looked up, whatever the outcome.
    #[instrument(skip_all)]
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AppResult<()> {
        validate_password(new_password)?;
        let invalid = || AppError::InvalidToken("Token is invalid or has expired".to_string());

        let consumed = self.ledger.consume(token).await.map_err(|e| match AppError::from(e) {
            AppError::InvalidToken(_) => invalid(),
            other => other,
        })?;
        if consumed.token_type != TokenType::PasswordReset {
            return Err(invalid());
        }

        let password_hash = hash_password(new_password)?;
        if !self
            .users
            .set_password_hash(consumed.user_id, &password_hash)
            .await?
        {
            return Err(invalid());
        }
        info!(user_id = consumed.user_id, "password reset");
        Ok(())
    }

    /// Resolves the caller from an explicit identity.
    pub async fn current_user(&self, identity: Option<&Identity>) -> AppResult<UserResponse> {
        let identity = identity
            .ok_or_else(|| AppError::Unauthenticated("Authentication required".to_string()))?;
        let user = self
            .users
            .find_by_username(&identity.username)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        Ok(user.into())
    }
}
