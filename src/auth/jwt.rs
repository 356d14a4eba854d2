//! JWT issue and validation for access and refresh tokens.
//!
//! Each token class has its own HMAC key, so a token signed for one class
//! never validates as the other. Expiry lives in the signed payload;
//! validation needs no stored state.

use crate::error::{AppError, AppResult};
use crate::models::Role;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // username
    /// Comma-joined role names; access tokens only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<String>,
    /// Account id; refresh tokens only. Survives renames, unlike `sub`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<i64>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl Claims {
    pub fn roles(&self) -> BTreeSet<Role> {
        self.roles
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter(|r| !r.trim().is_empty())
            .filter_map(|r| match r.parse::<Role>() {
                Ok(role) => Some(role),
                Err(e) => {
                    debug!(error = %e, "skipping unknown role claim");
                    None
                }
            })
            .collect()
    }
}

/// Authenticated caller, established from a validated access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub roles: BTreeSet<Role>,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenClass {
    Access,
    Refresh,
}

impl TokenClass {
    fn as_str(&self) -> &'static str {
        match self {
            TokenClass::Access => "access",
            TokenClass::Refresh => "refresh",
        }
    }

    /// Access tokens live 15 minutes, refresh tokens 7 days.
    pub fn ttl(&self) -> Duration {
        match self {
            TokenClass::Access => Duration::minutes(15),
            TokenClass::Refresh => Duration::days(7),
        }
    }
}

#[derive(Clone)]
struct SigningKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKey {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Creates and validates signed access/refresh tokens.
#[derive(Clone)]
pub struct TokenCodec {
    access: SigningKey,
    refresh: SigningKey,
    validation: Validation,
}

impl TokenCodec {
    pub fn new(access_secret: &str, refresh_secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        Self {
            access: SigningKey::from_secret(access_secret),
            refresh: SigningKey::from_secret(refresh_secret),
            validation,
        }
    }

    fn key(&self, class: TokenClass) -> &SigningKey {
        match class {
            TokenClass::Access => &self.access,
            TokenClass::Refresh => &self.refresh,
        }
    }

    /// 15-minute token carrying subject and roles.
    pub fn issue_access_token(&self, subject: &str, roles: &BTreeSet<Role>) -> AppResult<String> {
        let roles = roles
            .iter()
            .map(Role::as_str)
            .collect::<Vec<_>>()
            .join(",");
        self.sign(TokenClass::Access, subject, None, Some(roles), Utc::now())
    }

    /// 7-day token bound to the account id, no roles claim, signed with the refresh key.
    pub fn issue_refresh_token(&self, user_id: i64, subject: &str) -> AppResult<String> {
        self.sign(TokenClass::Refresh, subject, Some(user_id), None, Utc::now())
    }

    fn sign(
        &self,
        class: TokenClass,
        subject: &str,
        user_id: Option<i64>,
        roles: Option<String>,
        now: DateTime<Utc>,
    ) -> AppResult<String> {
        let claims = Claims {
            sub: subject.to_string(),
            roles,
            uid: user_id,
            iat: now.timestamp(),
            exp: (now + class.ttl()).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.key(class).encoding)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("sign {} token: {}", class.as_str(), e)))
    }

    /// Fails closed: bad signature, malformed input and past expiry all yield `false`.
    pub fn validate(&self, token: &str, class: TokenClass) -> bool {
        self.decode(token, class).is_ok()
    }

    pub fn decode(&self, token: &str, class: TokenClass) -> AppResult<Claims> {
        match decode::<Claims>(token, &self.key(class).decoding, &self.validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => {
                match e.kind() {
                    ErrorKind::ExpiredSignature => {
                        debug!(class = class.as_str(), "token expired")
                    }
                    ErrorKind::InvalidSignature => {
                        warn!(class = class.as_str(), "token signature mismatch")
                    }
                    _ => debug!(class = class.as_str(), error = %e, "malformed token"),
                }
                Err(AppError::InvalidToken(
                    "Invalid or expired token".to_string(),
                ))
            }
        }
    }

    pub fn subject_of(&self, token: &str, class: TokenClass) -> AppResult<String> {
        Ok(self.decode(token, class)?.sub)
    }

    pub fn roles_of(&self, token: &str, class: TokenClass) -> AppResult<BTreeSet<Role>> {
        Ok(self.decode(token, class)?.roles())
    }

    /// Caller identity from a bearer access token.
    pub fn identity(&self, access_token: &str) -> AppResult<Identity> {
        let claims = self.decode(access_token, TokenClass::Access)?;
        Ok(Identity {
            roles: claims.roles(),
            username: claims.sub,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new(
            "access-secret-access-secret-0123456789",
            "refresh-secret-refresh-secret-0123456789",
        )
    }

    fn admin_roles() -> BTreeSet<Role> {
        BTreeSet::from([Role::User, Role::Admin])
    }

    #[test]
    fn access_token_round_trips_subject_and_roles() {
        let codec = codec();
        let token = codec.issue_access_token("alice", &admin_roles()).unwrap();
        assert!(codec.validate(&token, TokenClass::Access));
        assert_eq!(codec.subject_of(&token, TokenClass::Access).unwrap(), "alice");
        assert_eq!(
            codec.roles_of(&token, TokenClass::Access).unwrap(),
            admin_roles()
        );
        let claims = codec.decode(&token, TokenClass::Access).unwrap();
        assert_eq!(claims.roles.as_deref(), Some("USER,ADMIN"));
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn refresh_token_has_no_roles_and_week_expiry() {
        let codec = codec();
        let token = codec.issue_refresh_token(42, "alice").unwrap();
        let claims = codec.decode(&token, TokenClass::Refresh).unwrap();
        assert_eq!(claims.uid, Some(42));
        assert!(claims.roles.is_none());
        assert!(claims.roles().is_empty());
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 60 * 60);
    }

    #[test]
    fn cross_key_tokens_are_rejected() {
        let codec = codec();
        let access = codec.issue_access_token("alice", &admin_roles()).unwrap();
        let refresh = codec.issue_refresh_token(1, "alice").unwrap();
        assert!(!codec.validate(&access, TokenClass::Refresh));
        assert!(!codec.validate(&refresh, TokenClass::Access));
    }

    #[test]
    fn expiry_boundary() {
        let codec = codec();
        let now = Utc::now();
        let fresh = codec
            .sign(
                TokenClass::Access,
                "alice",
                None,
                Some("USER".into()),
                now - TokenClass::Access.ttl() + Duration::seconds(30),
            )
            .unwrap();
        let stale = codec
            .sign(
                TokenClass::Access,
                "alice",
                None,
                Some("USER".into()),
                now - TokenClass::Access.ttl() - Duration::seconds(30),
            )
            .unwrap();
        assert!(codec.validate(&fresh, TokenClass::Access));
        assert!(!codec.validate(&stale, TokenClass::Access));
    }

    #[test]
    fn malformed_and_tampered_tokens_fail_closed() {
        let codec = codec();
        assert!(!codec.validate("", TokenClass::Access));
        assert!(!codec.validate("not.a.jwt", TokenClass::Access));

        let token = codec.issue_access_token("alice", &admin_roles()).unwrap();
        let forged = codec.issue_access_token("mallory", &admin_roles()).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        let forged_payload = forged.split('.').nth(1).unwrap();
        let tampered = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);
        assert!(!codec.validate(&tampered, TokenClass::Access));

        let other = TokenCodec::new(
            "another-access-secret-0123456789abcdef",
            "another-refresh-secret-0123456789abcdef",
        );
        assert!(!other.validate(&token, TokenClass::Access));
    }

    #[test]
    fn tokens_minted_together_are_distinct() {
        let codec = codec();
        let a = codec.issue_access_token("alice", &admin_roles()).unwrap();
        let b = codec.issue_access_token("alice", &admin_roles()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn identity_reads_access_claims() {
        let codec = codec();
        let token = codec.issue_access_token("root", &admin_roles()).unwrap();
        let identity = codec.identity(&token).unwrap();
        assert_eq!(identity.username, "root");
        assert!(identity.is_admin());
        assert!(matches!(
            codec.identity("garbage"),
            Err(AppError::InvalidToken(_))
        ));
    }
}
