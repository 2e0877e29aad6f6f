//! Password hashing, signed session tokens and one-time reset tokens.
//!
//! Session tokens are HS256 JWTs carrying the profile id and role. Reset
//! tokens are random hex strings; only their SHA-256 digest is stored.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::db::Role;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,

    #[error("Token is invalid")]
    Invalid,

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random token (32 bytes, hex encoded)
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Claims carried by a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Profile id
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Issues and verifies session tokens with a shared secret
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").field("ttl", &self.ttl).finish()
    }
}

impl TokenSigner {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::hours(ttl_hours),
        }
    }

    /// Sign a token for the given profile, valid for the configured TTL
    pub fn issue(&self, profile_id: &str, role: Role) -> Result<(String, DateTime<Utc>), TokenError> {
        self.issue_at(profile_id, role, Utc::now())
    }

    pub fn issue_at(
        &self,
        profile_id: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), TokenError> {
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: profile_id.to_string(),
            role,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        Ok((token, expires_at))
    }

    /// Verify signature and expiry, returning the claims
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "a-test-secret-that-is-long-enough-1234";

    #[test]
    fn test_password_roundtrip() {
        let hash = hash_password("Sabr-1234-Jamil").unwrap();
        assert!(verify_password("Sabr-1234-Jamil", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("Sabr-1234-Jamil", "not-a-hash"));
    }

    #[test]
    fn test_token_roundtrip() {
        let signer = TokenSigner::new(SECRET, 24);
        let (token, expires_at) = signer.issue("profile-1", Role::Teacher).unwrap();

        let claims = signer.verify(&token).unwrap();
        assert_eq!(claims.sub, "profile-1");
        assert_eq!(claims.role, Role::Teacher);
        assert_eq!(claims.exp, expires_at.timestamp());
    }

    #[test]
    fn test_tampered_token_rejected() {
        let signer = TokenSigner::new(SECRET, 24);
        let (token, _) = signer.issue("profile-1", Role::Student).unwrap();

        // Flip one character of the signature
        let mut chars: Vec<char> = token.chars().collect();
        let last = chars.len() - 2;
        chars[last] = if chars[last] == 'A' { 'B' } else { 'A' };
        let tampered: String = chars.into_iter().collect();

        assert!(matches!(signer.verify(&tampered), Err(TokenError::Invalid)));
        assert!(matches!(signer.verify("garbage"), Err(TokenError::Invalid)));
    }

    #[test]
    fn test_token_from_other_secret_rejected() {
        let signer = TokenSigner::new(SECRET, 24);
        let other = TokenSigner::new("another-secret-that-is-long-enough-999", 24);
        let (token, _) = other.issue("profile-1", Role::Admin).unwrap();

        assert!(matches!(signer.verify(&token), Err(TokenError::Invalid)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let signer = TokenSigner::new(SECRET, 1);
        let issued = Utc::now() - Duration::hours(2);
        let (token, _) = signer.issue_at("profile-1", Role::Student, issued).unwrap();

        assert!(matches!(signer.verify(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn test_reset_token_hashing() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert_eq!(hash_token(&token), hash_token(&token));
        assert_ne!(hash_token(&token), hash_token(&generate_token()));
    }
}
