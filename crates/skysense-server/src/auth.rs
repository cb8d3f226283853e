//! Session tokens and password hashing.
//!
//! Tokens are ed25519-signed claims (see `skysense_shared::token`); the
//! server holds the signing key and verifies every bearer token and chat
//! handshake locally.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::http::HeaderMap;
use chrono::Duration;
use ed25519_dalek::{SigningKey, VerifyingKey};
use tracing::{debug, warn};

use skysense_shared::constants::MAX_TOKEN_TTL_SECS;
use skysense_shared::token::{
    generate_signing_key, issue_token, signing_key_from_bytes, verify_token,
};
use skysense_shared::types::{AuthUser, Role};
use skysense_shared::TokenError;

use crate::config::ServerConfig;
use crate::error::ServerError;

pub struct Authenticator {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    ttl: Duration,
}

impl Authenticator {
    pub fn new(signing_key: SigningKey, ttl: Duration) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
            ttl,
        }
    }

    /// Use the configured secret, or a fresh random key when none is set.
    pub fn from_config(config: &ServerConfig) -> Result<Self, TokenError> {
        let signing_key = match &config.token_secret {
            Some(secret) => signing_key_from_bytes(secret)?,
            None => {
                warn!("TOKEN_SECRET not set; issued tokens will not survive a restart");
                generate_signing_key()
            }
        };
        let ttl = config.token_ttl_secs.clamp(1, MAX_TOKEN_TTL_SECS);
        Ok(Self::new(signing_key, Duration::seconds(ttl)))
    }

    pub fn issue(&self, user: AuthUser) -> Result<String, ServerError> {
        let token = issue_token(user, self.ttl, &self.signing_key)
            .map_err(|e| ServerError::Internal(format!("Token issuance failed: {e}")))?;
        Ok(token.encode())
    }

    pub fn verify(&self, encoded: &str) -> Result<AuthUser, TokenError> {
        verify_token(encoded, &self.verifying_key)
    }

    /// Identity from an `Authorization: Bearer <token>` header.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthUser, ServerError> {
        let token = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ServerError::Unauthorized("Token required".into()))?;

        self.verify(token).map_err(|e| {
            debug!(error = %e, "Rejected bearer token");
            ServerError::Unauthorized("Invalid token".into())
        })
    }
}

pub fn require_admin(user: &AuthUser) -> Result<(), ServerError> {
    if user.role != Role::Admin {
        return Err(ServerError::Forbidden("Admin only".into()));
    }
    Ok(())
}

/// Hash a password with argon2id on a blocking worker.
pub async fn hash_password(password: String) -> Result<String, ServerError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ServerError::Internal(format!("Password hashing failed: {e}")))
    })
    .await?
}

/// Check `password` against a stored PHC hash string. A malformed hash
/// never matches.
pub async fn verify_password(password: String, hash: String) -> Result<bool, ServerError> {
    let ok = tokio::task::spawn_blocking(move || {
        PasswordHash::new(&hash)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    })
    .await?;
    Ok(ok)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use skysense_shared::types::UserId;

    use super::*;

    fn authenticator() -> Authenticator {
        Authenticator::new(generate_signing_key(), Duration::hours(1))
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn test_issue_and_authenticate() {
        let auth = authenticator();
        let user = AuthUser {
            id: UserId(5),
            role: Role::Client,
        };
        let token = auth.issue(user).unwrap();

        assert_eq!(auth.verify(&token).unwrap(), user);
        assert_eq!(auth.authenticate(&bearer(&token)).unwrap(), user);
    }

    #[test]
    fn test_missing_and_foreign_tokens() {
        let auth = authenticator();
        assert!(matches!(
            auth.authenticate(&HeaderMap::new()),
            Err(ServerError::Unauthorized(_))
        ));

        let foreign = authenticator()
            .issue(AuthUser {
                id: UserId(1),
                role: Role::Admin,
            })
            .unwrap();
        assert!(matches!(
            auth.authenticate(&bearer(&foreign)),
            Err(ServerError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_from_config_uses_secret() {
        let config = ServerConfig {
            token_secret: Some([7u8; 32]),
            ..Default::default()
        };
        let a = Authenticator::from_config(&config).unwrap();
        let b = Authenticator::from_config(&config).unwrap();

        let token = a
            .issue(AuthUser {
                id: UserId(2),
                role: Role::Admin,
            })
            .unwrap();
        assert!(b.verify(&token).is_ok());
    }

    #[test]
    fn test_out_of_range_ttl_never_panics() {
        let config = ServerConfig {
            token_ttl_secs: i64::MAX,
            ..Default::default()
        };
        let auth = Authenticator::from_config(&config).unwrap();
        let user = AuthUser {
            id: UserId(3),
            role: Role::Client,
        };
        let token = auth.issue(user).unwrap();
        assert_eq!(auth.verify(&token).unwrap(), user);

        let unbounded = Authenticator::new(generate_signing_key(), Duration::days(200_000_000));
        assert!(matches!(unbounded.issue(user), Err(ServerError::Internal(_))));
    }

    #[test]
    fn test_require_admin() {
        assert!(require_admin(&AuthUser {
            id: UserId(1),
            role: Role::Admin
        })
        .is_ok());
        assert!(matches!(
            require_admin(&AuthUser {
                id: UserId(2),
                role: Role::Client
            }),
            Err(ServerError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_password_hash_round_trip() {
        let hash = hash_password("s3cret".to_string()).await.unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("s3cret".to_string(), hash.clone()).await.unwrap());
        assert!(!verify_password("wrong".to_string(), hash).await.unwrap());
        assert!(!verify_password("s3cret".to_string(), "not-a-hash".to_string())
            .await
            .unwrap());
    }
}
