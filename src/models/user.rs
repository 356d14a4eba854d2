//! User accounts, roles, and the sanitized projections returned to clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Coarse authorization tag attached to a user and embedded in access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches("ROLE_").to_ascii_uppercase().as_str() {
            "USER" => Ok(Role::User),
            "ADMIN" => Ok(Role::Admin),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

pub fn default_roles() -> BTreeSet<Role> {
    BTreeSet::from([Role::User])
}

/// Stored user record. Not serializable: use [`UserResponse`] for output.
#[derive(Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub roles: BTreeSet<Role>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password_hash", &"<redacted>")
            .field("roles", &self.roles)
            .field("email_verified", &self.email_verified)
            .finish()
    }
}

/// Insert payload; the store assigns the id and creation time.
#[derive(Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub roles: BTreeSet<Role>,
    pub email_verified: bool,
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub roles: Option<BTreeSet<Role>>,
}

/// Sanitized user projection (never carries the password hash).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub roles: BTreeSet<Role>,
    pub email_verified: bool,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            roles: user.roles.clone(),
            email_verified: user.email_verified,
        }
    }
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            roles: user.roles,
            email_verified: user.email_verified,
        }
    }
}

// ---- Admin listing ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    Id,
    Username,
    Email,
    CreatedAt,
}

impl SortField {
    pub fn column(&self) -> &'static str {
        match self {
            SortField::Id => "id",
            SortField::Username => "username",
            SortField::Email => "email",
            SortField::CreatedAt => "created_at",
        }
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(SortField::Id),
            "username" => Ok(SortField::Username),
            "email" => Ok(SortField::Email),
            "createdAt" | "created_at" => Ok(SortField::CreatedAt),
            other => Err(format!("Unsupported sort field: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(format!("Unsupported sort direction: {}", other)),
        }
    }
}

/// Filtered, paginated listing request. `page` is 0-based.
#[derive(Debug, Clone)]
pub struct UserQuery {
    pub username: Option<String>,
    pub role: Option<Role>,
    pub page: u32,
    pub size: u32,
    pub sort: SortField,
    pub direction: SortDirection,
}

impl Default for UserQuery {
    fn default() -> Self {
        Self {
            username: None,
            role: None,
            page: 0,
            size: 10,
            sort: SortField::Id,
            direction: SortDirection::Asc,
        }
    }
}

impl UserQuery {
    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.size)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPage {
    pub users: Vec<UserResponse>,
    pub page: u32,
    pub size: u32,
    pub total_elements: u64,
    pub total_pages: u64,
}

impl UserPage {
    pub fn new(users: Vec<UserResponse>, query: &UserQuery, total_elements: u64) -> Self {
        let size = u64::from(query.size.max(1));
        Self {
            users,
            page: query.page,
            size: query.size,
            total_elements,
            total_pages: total_elements.div_ceil(size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_with_and_without_prefix() {
        assert_eq!("USER".parse::<Role>().unwrap(), Role::User);
        assert_eq!("ROLE_ADMIN".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert!("ROOT".parse::<Role>().is_err());
    }

    #[test]
    fn role_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"ADMIN\"");
    }

    #[test]
    fn debug_redacts_password_hash() {
        let user = User {
            id: 1,
            username: "alice".into(),
            email: "alice@x.com".into(),
            password_hash: "$argon2id$secret".into(),
            roles: default_roles(),
            email_verified: false,
            created_at: Utc::now(),
        };
        let out = format!("{:?}", user);
        assert!(!out.contains("argon2id"));
        assert!(out.contains("<redacted>"));
    }

    #[test]
    fn page_counts_round_up() {
        let query = UserQuery {
            size: 10,
            ..Default::default()
        };
        assert_eq!(UserPage::new(vec![], &query, 21).total_pages, 3);
        assert_eq!(UserPage::new(vec![], &query, 0).total_pages, 0);
    }
}
