//! Repositories: users and verification tokens on PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Postgres, QueryBuilder};
use std::collections::BTreeSet;
use tracing::warn;

use super::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::{NewUser, Role, User, UserChanges, UserQuery, VerificationToken};
use crate::repositories::{TokenRepository, UserRepository};

const USER_COLUMNS: &str = "id, username, email, password_hash, roles, email_verified, created_at";

/// Postgres-backed credential store and token ledger.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

// ---- User ----

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    password_hash: String,
    roles: Vec<String>,
    email_verified: bool,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        let roles = row
            .roles
            .iter()
            .filter_map(|r| match r.parse::<Role>() {
                Ok(role) => Some(role),
                Err(e) => {
                    warn!(user_id = row.id, error = %e, "ignoring stored role");
                    None
                }
            })
            .collect();
        User {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            roles,
            email_verified: row.email_verified,
            created_at: row.created_at,
        }
    }
}

fn role_names(roles: &BTreeSet<Role>) -> Vec<String> {
    roles.iter().map(|r| r.as_str().to_string()).collect()
}

/// Maps unique-constraint violations on users to `AlreadyExists`.
fn map_conflict(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let message = match db.constraint() {
                Some("users_username_key") => "Username is already taken",
                Some("users_email_key") => "Email is already in use",
                _ => "Username or email already exists",
            };
            return AppError::AlreadyExists(message.to_string());
        }
    }
    AppError::Db(err)
}

fn like_pattern(raw: &str) -> String {
    let escaped = raw
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// One WHERE clause per filter combination.
fn push_filters<'a>(qb: &mut QueryBuilder<'a, Postgres>, query: &UserQuery) {
    match (&query.username, query.role) {
        (None, None) => {}
        (Some(name), None) => {
            qb.push(" WHERE username ILIKE ").push_bind(like_pattern(name));
        }
        (None, Some(role)) => {
            qb.push(" WHERE ").push_bind(role.as_str()).push(" = ANY(roles)");
        }
        (Some(name), Some(role)) => {
            qb.push(" WHERE username ILIKE ")
                .push_bind(like_pattern(name))
                .push(" AND ")
                .push_bind(role.as_str())
                .push(" = ANY(roles)");
        }
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn insert(&self, user: NewUser) -> AppResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (username, email, password_hash, roles, email_verified)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(role_names(&user.roles))
        .bind(user.email_verified)
        .fetch_one(&self.pool)
        .await
        .map_err(map_conflict)?;
        Ok(row.into())
    }

    async fn find_by_id(&self, id: i64) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn find_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn update(&self, id: i64, changes: UserChanges) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET username = COALESCE($2, username),
                email = COALESCE($3, email),
                roles = COALESCE($4, roles)
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.username)
        .bind(changes.email)
        .bind(changes.roles.as_ref().map(role_names))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_conflict)?;
        Ok(row.map(User::from))
    }

    async fn set_password_hash(&self, id: i64, password_hash: &str) -> AppResult<bool> {
        let r = sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
            .bind(password_hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() > 0)
    }

    async fn mark_email_verified(&self, id: i64) -> AppResult<bool> {
        let r = sqlx::query("UPDATE users SET email_verified = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() > 0)
    }

    async fn delete(&self, id: i64) -> AppResult<bool> {
        // verification_tokens rows go with it (ON DELETE CASCADE)
        let r = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() > 0)
    }

    async fn list(&self, query: &UserQuery) -> AppResult<(Vec<User>, u64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_filters(&mut count, query);
        let (total,) = count
            .build_query_as::<(i64,)>()
            .fetch_one(&self.pool)
            .await?;

        let mut page = QueryBuilder::<Postgres>::new(format!("SELECT {USER_COLUMNS} FROM users"));
        push_filters(&mut page, query);
        // column and keyword come from closed enums, never from the request text
        page.push(format!(
            " ORDER BY {} {}, id ASC LIMIT ",
            query.sort.column(),
            query.direction.keyword()
        ))
        .push_bind(i64::from(query.size))
        .push(" OFFSET ")
        .push_bind(query.offset() as i64);
        let rows = page
            .build_query_as::<UserRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok((rows.into_iter().map(User::from).collect(), total.max(0) as u64))
    }
}

// ---- Verification tokens ----

#[derive(Debug, FromRow)]
struct TokenRow {
    token_hash: String,
    user_id: i64,
    token_type: String,
    expires_at: DateTime<Utc>,
}

impl TryFrom<TokenRow> for VerificationToken {
    type Error = AppError;

    fn try_from(row: TokenRow) -> Result<Self, Self::Error> {
        let token_type = row
            .token_type
            .parse()
            .map_err(|e: String| AppError::Internal(anyhow::anyhow!(e)))?;
        Ok(VerificationToken {
            token_hash: row.token_hash,
            user_id: row.user_id,
            token_type,
            expires_at: row.expires_at,
        })
    }
}

#[async_trait]
impl TokenRepository for PgStore {
    async fn replace(&self, token: VerificationToken) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent issues for the same user.
        let owner: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(token.user_id)
            .fetch_optional(&mut *tx)
            .await?;
        if owner.is_none() {
            return Err(AppError::NotFound("User not found".to_string()));
        }

        sqlx::query("DELETE FROM verification_tokens WHERE user_id = $1 AND token_type = $2")
            .bind(token.user_id)
            .bind(token.token_type.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO verification_tokens (token_hash, user_id, token_type, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&token.token_hash)
        .bind(token.user_id)
        .bind(token.token_type.as_str())
        .bind(token.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn take(&self, token_hash: &str) -> AppResult<Option<VerificationToken>> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            DELETE FROM verification_tokens
            WHERE token_hash = $1
            RETURNING token_hash, user_id, token_type, expires_at
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.map(VerificationToken::try_from).transpose()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let r = sqlx::query("DELETE FROM verification_tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("al"), "%al%");
        assert_eq!(like_pattern("a_b%"), "%a\\_b\\%%");
    }

    #[test]
    fn filters_pick_distinct_query_paths() {
        let mut none = QueryBuilder::<Postgres>::new("SELECT 1 FROM users");
        push_filters(&mut none, &UserQuery::default());
        assert_eq!(none.sql(), "SELECT 1 FROM users");

        let mut both = QueryBuilder::<Postgres>::new("SELECT 1 FROM users");
        push_filters(
            &mut both,
            &UserQuery {
                username: Some("al".into()),
                role: Some(Role::Admin),
                ..Default::default()
            },
        );
        assert_eq!(
            both.sql(),
            "SELECT 1 FROM users WHERE username ILIKE $1 AND $2 = ANY(roles)"
        );
    }
}
