//! Verification tokens (server-side, single use) and the bearer token response.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of single-use token stored in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenType {
    EmailVerification,
    PasswordReset,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::EmailVerification => "EMAIL_VERIFICATION",
            TokenType::PasswordReset => "PASSWORD_RESET",
        }
    }

    /// Lifetime of a freshly issued token. Reset is shorter: it grants account takeover.
    pub fn ttl(&self) -> Duration {
        match self {
            TokenType::EmailVerification => Duration::hours(24),
            TokenType::PasswordReset => Duration::minutes(30),
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EMAIL_VERIFICATION" => Ok(TokenType::EmailVerification),
            "PASSWORD_RESET" => Ok(TokenType::PasswordReset),
            other => Err(format!("unknown token type: {}", other)),
        }
    }
}

/// Stored ledger row. Only the SHA-256 digest of the token string is kept.
#[derive(Debug, Clone)]
pub struct VerificationToken {
    pub token_hash: String,
    pub user_id: i64,
    pub token_type: TokenType,
    pub expires_at: DateTime<Utc>,
}

impl VerificationToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Access/refresh pair returned by login and refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
}

impl TokenResponse {
    pub fn bearer(access_token: String, refresh_token: String) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_tokens_live_shorter_than_verification() {
        assert_eq!(TokenType::EmailVerification.ttl(), Duration::hours(24));
        assert_eq!(TokenType::PasswordReset.ttl(), Duration::minutes(30));
    }

    #[test]
    fn token_response_uses_camel_case() {
        let json = serde_json::to_value(TokenResponse::bearer("a".into(), "r".into())).unwrap();
        assert_eq!(json["accessToken"], "a");
        assert_eq!(json["refreshToken"], "r");
        assert_eq!(json["tokenType"], "Bearer");
    }

    #[test]
    fn expiry_is_strictly_after() {
        let now = Utc::now();
        let token = VerificationToken {
            token_hash: String::new(),
            user_id: 1,
            token_type: TokenType::PasswordReset,
            expires_at: now,
        };
        assert!(!token.is_expired_at(now));
        assert!(token.is_expired_at(now + Duration::milliseconds(1)));
    }
}
