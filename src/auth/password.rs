//! Password hashing (Argon2id, salted) and account field checks.

use crate::error::{AppError, AppResult};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use validator::ValidateEmail;

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("hash: {}", e)))?
        .to_string();
    Ok(hash)
}

/// `Ok(false)` on mismatch; `Err` only when the stored hash is unreadable.
pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("parse hash: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

pub fn validate_email(email: &str) -> AppResult<()> {
    if !email.validate_email() {
        return Err(AppError::Validation("Invalid email".to_string()));
    }
    Ok(())
}

/// Usernames share the login identifier space with emails, so they may not contain `@`.
pub fn validate_username(username: &str) -> AppResult<()> {
    if username.trim().is_empty() {
        return Err(AppError::Validation("Username must not be blank".to_string()));
    }
    if username.contains('@') {
        return Err(AppError::Validation("Username must not contain '@'".to_string()));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> AppResult<()> {
    if password.trim().is_empty() {
        return Err(AppError::Validation("Password must not be blank".to_string()));
    }
    Ok(())
}
