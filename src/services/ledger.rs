//! Token ledger: single-use, typed, expiring tokens for email verification
//! and password reset.
//!
//! Only the SHA-256 digest of a token is stored; the plaintext is returned
//! once from [`TokenLedger::issue`] and travels to the user by email.

use argon2::password_hash::rand_core::{OsRng, RngCore};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::AppError;
use crate::models::{TokenType, VerificationToken};
use crate::repositories::TokenRepository;

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("token not found")]
    NotFound,
    #[error("token has expired")]
    Expired,
    #[error(transparent)]
    Store(#[from] AppError),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound => AppError::InvalidToken("Invalid token".to_string()),
            LedgerError::Expired => AppError::InvalidToken("Token has expired".to_string()),
            LedgerError::Store(e) => e,
        }
    }
}

/// Owner and kind of a consumed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumedToken {
    pub user_id: i64,
    pub token_type: TokenType,
}

pub fn fingerprint(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Clone)]
pub struct TokenLedger {
    repo: Arc<dyn TokenRepository>,
}

impl TokenLedger {
    pub fn new(repo: Arc<dyn TokenRepository>) -> Self {
        Self { repo }
    }

    /// Replaces any live token for `(user_id, token_type)` and returns the new plaintext.
    pub async fn issue(&self, user_id: i64, token_type: TokenType) -> Result<String, AppError> {
        self.issue_at(user_id, token_type, token_type.ttl(), Utc::now())
            .await
    }

    pub async fn issue_at(
        &self,
        user_id: i64,
        token_type: TokenType,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, AppError> {
        let token = generate_token();
        self.repo
            .replace(VerificationToken {
                token_hash: fingerprint(&token),
                user_id,
                token_type,
                expires_at: now + ttl,
            })
            .await?;
        info!(user_id, token_type = %token_type, "verification token issued");
        Ok(token)
    }

    /// Looks up and deletes in one step. Expired rows are deleted too.
    pub async fn consume(&self, token: &str) -> Result<ConsumedToken, LedgerError> {
        self.consume_at(token, Utc::now()).await
    }

    pub async fn consume_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ConsumedToken, LedgerError> {
        let row = self
            .repo
            .take(&fingerprint(token))
            .await?
            .ok_or(LedgerError::NotFound)?;
        if row.is_expired_at(now) {
            debug!(user_id = row.user_id, token_type = %row.token_type, "expired token discarded");
            return Err(LedgerError::Expired);
        }
        Ok(ConsumedToken {
            user_id: row.user_id,
            token_type: row.token_type,
        })
    }

    pub async fn purge_expired(&self) -> Result<u64, AppError> {
        let removed = self.repo.purge_expired(Utc::now()).await?;
        if removed > 0 {
            info!(removed, "purged expired verification tokens");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::MemoryStore;

    fn ledger() -> (TokenLedger, MemoryStore) {
        let store = MemoryStore::new();
        (TokenLedger::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn issued_token_is_single_use() {
        let (ledger, _) = ledger();
        let token = ledger.issue(7, TokenType::EmailVerification).await.unwrap();
        assert_eq!(token.len(), TOKEN_BYTES * 2);

        let consumed = ledger.consume(&token).await.unwrap();
        assert_eq!(
            consumed,
            ConsumedToken {
                user_id: 7,
                token_type: TokenType::EmailVerification
            }
        );
        assert!(matches!(
            ledger.consume(&token).await,
            Err(LedgerError::NotFound)
        ));
    }

    #[tokio::test]
    async fn reissue_invalidates_previous_token() {
        let (ledger, store) = ledger();
        let first = ledger.issue(1, TokenType::PasswordReset).await.unwrap();
        let second = ledger.issue(1, TokenType::PasswordReset).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(store.token_count().await, 1);

        assert!(matches!(
            ledger.consume(&first).await,
            Err(LedgerError::NotFound)
        ));
        assert!(ledger.consume(&second).await.is_ok());
    }

    #[tokio::test]
    async fn types_are_tracked_independently() {
        let (ledger, store) = ledger();
        let verify = ledger.issue(1, TokenType::EmailVerification).await.unwrap();
        let reset = ledger.issue(1, TokenType::PasswordReset).await.unwrap();
        assert_eq!(store.token_count().await, 2);
        assert_eq!(
            ledger.consume(&verify).await.unwrap().token_type,
            TokenType::EmailVerification
        );
        assert_eq!(
            ledger.consume(&reset).await.unwrap().token_type,
            TokenType::PasswordReset
        );
    }

    #[tokio::test]
    async fn ttl_boundary() {
        let (ledger, _) = ledger();
        let issued = Utc::now();
        let ttl = Duration::minutes(30);
        let eps = Duration::seconds(1);

        let live = ledger
            .issue_at(1, TokenType::PasswordReset, ttl, issued)
            .await
            .unwrap();
        assert!(ledger.consume_at(&live, issued + ttl - eps).await.is_ok());

        let stale = ledger
            .issue_at(1, TokenType::PasswordReset, ttl, issued)
            .await
            .unwrap();
        assert!(matches!(
            ledger.consume_at(&stale, issued + ttl + eps).await,
            Err(LedgerError::Expired)
        ));
    }

    #[tokio::test]
    async fn expired_token_is_deleted_on_detection() {
        let (ledger, store) = ledger();
        let issued = Utc::now() - Duration::hours(25);
        let token = ledger
            .issue_at(1, TokenType::EmailVerification, Duration::hours(24), issued)
            .await
            .unwrap();
        assert!(matches!(
            ledger.consume(&token).await,
            Err(LedgerError::Expired)
        ));
        assert_eq!(store.token_count().await, 0);
        assert!(matches!(
            ledger.consume(&token).await,
            Err(LedgerError::NotFound)
        ));
    }

    #[tokio::test]
    async fn concurrent_consume_succeeds_once() {
        let (ledger, _) = ledger();
        let token = ledger.issue(1, TokenType::EmailVerification).await.unwrap();
        let (a, b) = tokio::join!(ledger.consume(&token), ledger.consume(&token));
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        assert_eq!(fingerprint("abc"), fingerprint("abc"));
        assert_ne!(fingerprint("abc"), fingerprint("abd"));
        assert_eq!(fingerprint("abc").len(), 64);
    }

    #[test]
    fn ledger_errors_map_to_invalid_token() {
        assert!(matches!(
            AppError::from(LedgerError::Expired),
            AppError::InvalidToken(_)
        ));
        assert!(matches!(
            AppError::from(LedgerError::NotFound),
            AppError::InvalidToken(_)
        ));
    }
}
