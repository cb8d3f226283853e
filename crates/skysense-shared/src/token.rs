//! Session tokens.
//!
//! Tokens are issued by the server at login and presented back on every
//! authenticated request (`Authorization: Bearer …`) and on the chat channel
//! (`?token=…`). A token carries the user id and role, an expiry, and an
//! Ed25519 signature by the server key over both.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::TokenError;
use crate::types::{AuthUser, Role, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    pub user_id: UserId,
    pub role: Role,
    pub valid_until: DateTime<Utc>,
    /// Hex-encoded Ed25519 signature.
    pub signature: String,
}

impl SessionToken {
    pub fn claims(&self) -> AuthUser {
        AuthUser {
            id: self.user_id,
            role: self.role,
        }
    }

    /// URL-safe text form used on the wire.
    pub fn encode(&self) -> String {
        // Serializing a struct of plain fields cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(encoded: &str) -> Result<Self, TokenError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|_| TokenError::Encoding)?;
        serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
    }
}

// payload = user_id (decimal) || ":" || role || ":" || valid_until (rfc3339)
fn signing_payload(user_id: UserId, role: Role, valid_until: &DateTime<Utc>) -> Vec<u8> {
    format!("{}:{}:{}", user_id, role, valid_until.to_rfc3339()).into_bytes()
}

pub fn issue_token(
    user: AuthUser,
    ttl: Duration,
    signing_key: &SigningKey,
) -> Result<SessionToken, TokenError> {
    let valid_until = Utc::now()
        .checked_add_signed(ttl)
        .ok_or(TokenError::TtlOutOfRange)?;
    let payload = signing_payload(user.id, user.role, &valid_until);
    let signature = signing_key.sign(&payload);

    Ok(SessionToken {
        user_id: user.id,
        role: user.role,
        valid_until,
        signature: hex::encode(signature.to_bytes()),
    })
}

pub fn check_token(token: &SessionToken, verifying_key: &VerifyingKey) -> Result<AuthUser, TokenError> {
    if Utc::now() > token.valid_until {
        return Err(TokenError::Expired);
    }

    let sig_bytes = hex::decode(&token.signature).map_err(|_| TokenError::Malformed)?;
    let signature = Signature::from_slice(&sig_bytes).map_err(|_| TokenError::Malformed)?;

    let payload = signing_payload(token.user_id, token.role, &token.valid_until);
    verifying_key
        .verify(&payload, &signature)
        .map_err(|_| TokenError::BadSignature)?;

    Ok(token.claims())
}

/// Decode and verify an encoded token in one step.
pub fn verify_token(encoded: &str, verifying_key: &VerifyingKey) -> Result<AuthUser, TokenError> {
    let token = SessionToken::decode(encoded)?;
    check_token(&token, verifying_key)
}

/// Build a signing key from 32 raw secret bytes.
pub fn signing_key_from_bytes(secret: &[u8]) -> Result<SigningKey, TokenError> {
    let bytes: [u8; 32] = secret.try_into().map_err(|_| TokenError::InvalidKey)?;
    Ok(SigningKey::from_bytes(&bytes))
}

pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut rand::rngs::OsRng)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> AuthUser {
        AuthUser {
            id: UserId(5),
            role: Role::Client,
        }
    }

    #[test]
    fn test_token_valid() {
        let key = generate_signing_key();
        let token = issue_token(user(), Duration::days(7), &key).unwrap();

        let claims = verify_token(&token.encode(), &key.verifying_key()).unwrap();
        assert_eq!(claims, user());
    }

    #[test]
    fn test_token_expired() {
        let key = generate_signing_key();
        let token = issue_token(user(), Duration::days(-1), &key).unwrap();

        assert_eq!(
            verify_token(&token.encode(), &key.verifying_key()),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_token_wrong_server_key() {
        let key = generate_signing_key();
        let other = generate_signing_key();
        let token = issue_token(user(), Duration::days(7), &key).unwrap();

        assert_eq!(
            verify_token(&token.encode(), &other.verifying_key()),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn test_token_role_tampering_detected() {
        let key = generate_signing_key();
        let mut token = issue_token(user(), Duration::days(7), &key).unwrap();
        token.role = Role::Admin;

        assert_eq!(
            check_token(&token, &key.verifying_key()),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn test_garbage_is_rejected() {
        let key = generate_signing_key();
        assert_eq!(
            verify_token("not a token!", &key.verifying_key()),
            Err(TokenError::Encoding)
        );
        let not_json = URL_SAFE_NO_PAD.encode(b"hello");
        assert_eq!(
            verify_token(&not_json, &key.verifying_key()),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn test_signing_key_from_bytes() {
        assert!(signing_key_from_bytes(&[7u8; 32]).is_ok());
        assert_eq!(
            signing_key_from_bytes(&[7u8; 16]).err(),
            Some(TokenError::InvalidKey)
        );
    }

    #[test]
    fn test_unrepresentable_expiry_is_an_error() {
        let key = generate_signing_key();
        let err = issue_token(user(), Duration::days(200_000_000), &key).unwrap_err();
        assert_eq!(err, TokenError::TtlOutOfRange);
    }
}
