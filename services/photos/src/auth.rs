//! Bearer token issuing and verification.

use crate::config::AuthConfig;
use crate::models::User;
use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token verification failures
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid token type. Expected {0} token")]
    WrongTokenType(TokenType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenType::Access => f.write_str("access"),
            TokenType::Refresh => f.write_str("refresh"),
        }
    }
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub email: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub iat: usize,
    pub exp: usize,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64, AuthError> {
        self.sub.parse().map_err(|_| AuthError::InvalidToken)
    }
}

/// Access and refresh tokens handed to a client
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub auth_token: String,
    pub refresh_token: String,
}

/// Signs and verifies HMAC JWTs
#[derive(Clone)]
pub struct TokenIssuer {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        if config.jwt_secret.is_empty() {
            bail!("JWT secret must not be empty");
        }

        let algorithm: Algorithm = config
            .jwt_algorithm
            .parse()
            .with_context(|| format!("Unknown JWT algorithm {}", config.jwt_algorithm))?;
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            bail!("Only HMAC JWT algorithms are supported, got {:?}", algorithm);
        }

        Ok(Self {
            algorithm,
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            access_ttl: Duration::minutes(config.access_token_expire_minutes),
            refresh_ttl: Duration::days(config.refresh_token_expire_days),
        })
    }

    /// Issue a fresh access and refresh token for `user`
    pub fn issue_pair(&self, user: &User) -> Result<TokenPair> {
        Ok(TokenPair {
            auth_token: self.issue(user, TokenType::Access)?,
            refresh_token: self.issue(user, TokenType::Refresh)?,
        })
    }

    pub fn issue(&self, user: &User, token_type: TokenType) -> Result<String> {
        let now = Utc::now();
        let ttl = match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };

        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            token_type,
            iat: now.timestamp().max(0) as usize,
            exp: (now + ttl).timestamp().max(0) as usize,
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .context("Failed to sign token")
    }

    /// Verify signature, expiry and token type
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, AuthError> {
        let validation = Validation::new(self.algorithm);

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            })?
            .claims;

        if claims.token_type != expected {
            return Err(AuthError::WrongTokenType(expected));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret-with-enough-entropy".to_string(),
            jwt_algorithm: "HS256".to_string(),
            access_token_expire_minutes: 30,
            refresh_token_expire_days: 7,
        }
    }

    fn user() -> User {
        User {
            id: 42,
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let issuer = TokenIssuer::new(&config()).unwrap();
        let pair = issuer.issue_pair(&user()).unwrap();

        let access = issuer.verify(&pair.auth_token, TokenType::Access).unwrap();
        assert_eq!(access.user_id().unwrap(), 42);
        assert_eq!(access.email, "alice@example.com");

        let refresh = issuer.verify(&pair.refresh_token, TokenType::Refresh).unwrap();
        assert!(refresh.exp > access.exp);
    }

    #[test]
    fn test_token_type_is_enforced() {
        let issuer = TokenIssuer::new(&config()).unwrap();
        let pair = issuer.issue_pair(&user()).unwrap();

        assert_eq!(
            issuer.verify(&pair.auth_token, TokenType::Refresh).unwrap_err(),
            AuthError::WrongTokenType(TokenType::Refresh)
        );
    }

    #[test]
    fn test_rejects_foreign_and_expired_tokens() {
        let issuer = TokenIssuer::new(&config()).unwrap();
        let mut other = config();
        other.jwt_secret = "a-different-secret".to_string();
        let foreign = TokenIssuer::new(&other)
            .unwrap()
            .issue(&user(), TokenType::Access)
            .unwrap();
        assert_eq!(
            issuer.verify(&foreign, TokenType::Access).unwrap_err(),
            AuthError::InvalidToken
        );

        let mut expired = config();
        expired.access_token_expire_minutes = -10;
        let token = TokenIssuer::new(&expired)
            .unwrap()
            .issue(&user(), TokenType::Access)
            .unwrap();
        assert_eq!(
            issuer.verify(&token, TokenType::Access).unwrap_err(),
            AuthError::TokenExpired
        );

        assert_eq!(
            issuer.verify("not-a-jwt", TokenType::Access).unwrap_err(),
            AuthError::InvalidToken
        );
    }

    #[test]
    fn test_rejects_unsupported_algorithm() {
        let mut cfg = config();
        cfg.jwt_algorithm = "RS256".to_string();
        assert!(TokenIssuer::new(&cfg).is_err());
    }
}
