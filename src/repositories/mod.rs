//! Storage ports for user records and verification tokens.
//!
//! Postgres ([`crate::db::PgStore`]) and in-memory ([`MemoryStore`]) backends
//! implement both traits.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppResult;
use crate::models::{NewUser, User, UserChanges, UserQuery, VerificationToken};

/// Credential store. Username and email are unique across all users; a
/// colliding write fails with `AppError::AlreadyExists`.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn insert(&self, user: NewUser) -> AppResult<User>;

    async fn find_by_id(&self, id: i64) -> AppResult<Option<User>>;

    async fn find_by_username(&self, username: &str) -> AppResult<Option<User>>;

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>>;

    /// Applies a partial update. `None` if no user has this id.
    async fn update(&self, id: i64, changes: UserChanges) -> AppResult<Option<User>>;

    async fn set_password_hash(&self, id: i64, password_hash: &str) -> AppResult<bool>;

    async fn mark_email_verified(&self, id: i64) -> AppResult<bool>;

    /// Removes the user and any tokens it owns.
    async fn delete(&self, id: i64) -> AppResult<bool>;

    /// One page of matching users plus the total number of matches.
    async fn list(&self, query: &UserQuery) -> AppResult<(Vec<User>, u64)>;
}

/// Token ledger persistence.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Deletes any token for `(user_id, token_type)` and stores `token`, atomically.
    async fn replace(&self, token: VerificationToken) -> AppResult<()>;

    /// Atomic find-and-delete by digest. Two concurrent calls never both get the row.
    async fn take(&self, token_hash: &str) -> AppResult<Option<VerificationToken>>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> AppResult<u64>;
}
