//! In-memory store for tests and `STORAGE=memory`. One lock guards users and tokens.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{TokenRepository, UserRepository};
use crate::error::{AppError, AppResult};
use crate::models::{
    NewUser, SortDirection, SortField, User, UserChanges, UserQuery, VerificationToken,
};

#[derive(Default)]
struct State {
    next_id: i64,
    users: BTreeMap<i64, User>,
    /// token_hash -> token
    tokens: HashMap<String, VerificationToken>,
}

impl State {
    fn ensure_unique(&self, id: Option<i64>, username: &str, email: &str) -> AppResult<()> {
        for other in self.users.values().filter(|u| Some(u.id) != id) {
            if other.username == username {
                return Err(AppError::AlreadyExists("Username is already taken".to_string()));
            }
            if other.email == email {
                return Err(AppError::AlreadyExists("Email is already in use".to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live ledger rows.
    pub async fn token_count(&self) -> usize {
        self.state.read().await.tokens.len()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn insert(&self, user: NewUser) -> AppResult<User> {
        let mut state = self.state.write().await;
        state.ensure_unique(None, &user.username, &user.email)?;
        state.next_id += 1;
        let row = User {
            id: state.next_id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            roles: user.roles,
            email_verified: user.email_verified,
            created_at: Utc::now(),
        };
        state.users.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_by_id(&self, id: i64) -> AppResult<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.username == username).cloned())
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn update(&self, id: i64, changes: UserChanges) -> AppResult<Option<User>> {
        let mut state = self.state.write().await;
        let Some(current) = state.users.get(&id) else {
            return Ok(None);
        };
        let username = changes.username.unwrap_or_else(|| current.username.clone());
        let email = changes.email.unwrap_or_else(|| current.email.clone());
        state.ensure_unique(Some(id), &username, &email)?;

        let Some(user) = state.users.get_mut(&id) else {
            return Ok(None);
        };
        user.username = username;
        user.email = email;
        if let Some(roles) = changes.roles {
            user.roles = roles;
        }
        Ok(Some(user.clone()))
    }

    async fn set_password_hash(&self, id: i64, password_hash: &str) -> AppResult<bool> {
        let mut state = self.state.write().await;
        Ok(match state.users.get_mut(&id) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                true
            }
            None => false,
        })
    }

    async fn mark_email_verified(&self, id: i64) -> AppResult<bool> {
        let mut state = self.state.write().await;
        Ok(match state.users.get_mut(&id) {
            Some(user) => {
                user.email_verified = true;
                true
            }
            None => false,
        })
    }

    async fn delete(&self, id: i64) -> AppResult<bool> {
        let mut state = self.state.write().await;
        if state.users.remove(&id).is_none() {
            return Ok(false);
        }
        state.tokens.retain(|_, t| t.user_id != id);
        Ok(true)
    }

    async fn list(&self, query: &UserQuery) -> AppResult<(Vec<User>, u64)> {
        let state = self.state.read().await;
        let needle = query.username.as_ref().map(|u| u.to_lowercase());
        let mut matches: Vec<&User> = state
            .users
            .values()
            .filter(|u| match &needle {
                Some(n) => u.username.to_lowercase().contains(n.as_str()),
                None => true,
            })
            .filter(|u| match query.role {
                Some(role) => u.roles.contains(&role),
                None => true,
            })
            .collect();

        matches.sort_by(|a, b| {
            let ord = match query.sort {
                SortField::Id => a.id.cmp(&b.id),
                SortField::Username => a.username.cmp(&b.username),
                SortField::Email => a.email.cmp(&b.email),
                SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            };
            let ord = ord.then_with(|| a.id.cmp(&b.id));
            match query.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });

        let total = matches.len() as u64;
        let page = matches
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.size as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn replace(&self, token: VerificationToken) -> AppResult<()> {
        let mut state = self.state.write().await;
        state
            .tokens
            .retain(|_, t| !(t.user_id == token.user_id && t.token_type == token.token_type));
        state.tokens.insert(token.token_hash.clone(), token);
        Ok(())
    }

    async fn take(&self, token_hash: &str) -> AppResult<Option<VerificationToken>> {
        Ok(self.state.write().await.tokens.remove(token_hash))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut state = self.state.write().await;
        let before = state.tokens.len();
        state.tokens.retain(|_, t| !t.is_expired_at(now));
        Ok((before - state.tokens.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{default_roles, Role, TokenType};
    use chrono::Duration;
    use std::collections::BTreeSet;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            roles: default_roles(),
            email_verified: false,
        }
    }

    #[tokio::test]
    async fn insert_assigns_increasing_ids_and_rejects_duplicates() {
        let store = MemoryStore::new();
        let a = store.insert(new_user("alice", "alice@x.com")).await.unwrap();
        let b = store.insert(new_user("bob", "bob@x.com")).await.unwrap();
        assert!(b.id > a.id);

        let err = store.insert(new_user("alice", "other@x.com")).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists(_)));
        let err = store.insert(new_user("other", "bob@x.com")).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn update_allows_keeping_own_username() {
        let store = MemoryStore::new();
        let a = store.insert(new_user("alice", "alice@x.com")).await.unwrap();
        store.insert(new_user("bob", "bob@x.com")).await.unwrap();

        let same = store
            .update(
                a.id,
                UserChanges {
                    username: Some("alice".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(same.is_some());

        let err = store
            .update(
                a.id,
                UserChanges {
                    email: Some("bob@x.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists(_)));
        assert!(store.update(999, UserChanges::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_cascades_tokens() {
        let store = MemoryStore::new();
        let a = store.insert(new_user("alice", "alice@x.com")).await.unwrap();
        store
            .replace(VerificationToken {
                token_hash: "h".into(),
                user_id: a.id,
                token_type: TokenType::EmailVerification,
                expires_at: Utc::now() + Duration::hours(1),
            })
            .await
            .unwrap();
        assert_eq!(store.token_count().await, 1);
        assert!(store.delete(a.id).await.unwrap());
        assert_eq!(store.token_count().await, 0);
        assert!(!store.delete(a.id).await.unwrap());
    }

    #[tokio::test]
    async fn list_filters_by_role_and_username() {
        let store = MemoryStore::new();
        store.insert(new_user("alice", "alice@x.com")).await.unwrap();
        store.insert(new_user("malice", "malice@x.com")).await.unwrap();
        let mut admin = new_user("root", "root@x.com");
        admin.roles = BTreeSet::from([Role::Admin, Role::User]);
        store.insert(admin).await.unwrap();

        let (users, total) = store
            .list(&UserQuery {
                username: Some("ALI".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(users[0].username, "alice");

        let (users, total) = store
            .list(&UserQuery {
                role: Some(Role::Admin),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(users[0].username, "root");
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for (hash, offset) in [("old", -1), ("new", 1)] {
            store
                .replace(VerificationToken {
                    token_hash: hash.into(),
                    user_id: if offset < 0 { 1 } else { 2 },
                    token_type: TokenType::PasswordReset,
                    expires_at: now + Duration::minutes(offset),
                })
                .await
                .unwrap();
        }
        assert_eq!(store.purge_expired(now).await.unwrap(), 1);
        assert!(store.take("new").await.unwrap().is_some());
    }
}
