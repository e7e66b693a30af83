//! JWT token generation and validation
//!
//! Access and refresh tokens share one secret and are told apart by the
//! `type` claim. Callers must check [`Claims::token_type`] against what the
//! endpoint expects.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use prodtrack_core::{AuthConfig, JwtAlgorithm};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Token kind carried in the `type` claim
///
/// A missing or unrecognised `type` decodes as `Unknown` so that the caller
/// rejects it as a bad payload rather than a bad signature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
    #[default]
    #[serde(other)]
    Unknown,
}

/// JWT claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject - user ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(rename = "type", default)]
    pub token_type: TokenType,
    /// Session id; present on access tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Issued at (Unix epoch)
    #[serde(default)]
    pub iat: i64,
    /// Expiration (Unix epoch)
    pub exp: i64,
}

/// JWT token generation errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode JWT: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("System time error: {0}")]
    SystemTimeError(#[from] std::time::SystemTimeError),
}

/// Signs and verifies access and refresh tokens
#[derive(Clone)]
pub struct TokenCodec {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &str, algorithm: JwtAlgorithm) -> Self {
        let algorithm = match algorithm {
            JwtAlgorithm::HS256 => Algorithm::HS256,
            JwtAlgorithm::HS384 => Algorithm::HS384,
            JwtAlgorithm::HS512 => Algorithm::HS512,
        };
        Self {
            algorithm,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.secret_key, config.algorithm)
    }

    /// Issue an access token with a fresh session id
    ///
    /// Returns the signed token and the bare session id (`jti`).
    pub fn issue_access(&self, subject_id: &str, ttl_secs: i64) -> Result<(String, String), JwtError> {
        let session_id = Uuid::new_v4().to_string();
        let token = self.sign(subject_id, TokenType::Access, Some(session_id.clone()), ttl_secs)?;
        Ok((token, session_id))
    }

    /// Issue a refresh token
    pub fn issue_refresh(&self, subject_id: &str, ttl_secs: i64) -> Result<String, JwtError> {
        self.sign(subject_id, TokenType::Refresh, None, ttl_secs)
    }

    fn sign(
        &self,
        subject_id: &str,
        token_type: TokenType,
        jti: Option<String>,
        ttl_secs: i64,
    ) -> Result<String, JwtError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64;

        let claims = Claims {
            sub: Some(subject_id.to_string()),
            token_type,
            jti,
            iat: now,
            exp: now + ttl_secs,
        };

        Ok(encode(&Header::new(self.algorithm), &claims, &self.encoding_key)?)
    }

    /// Check signature and expiry
    ///
    /// Expired, tampered and malformed tokens all yield `None`.
    pub fn verify(&self, token: &str) -> Option<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.required_spec_claims.clear();
        validation.required_spec_claims.insert("exp".to_string());

        match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::debug!(error = %e, "token verification failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new("test-secret", JwtAlgorithm::HS256)
    }

    #[test]
    fn test_access_round_trip() {
        let codec = codec();
        let user_id = Uuid::new_v4().to_string();

        let (token, jti) = codec.issue_access(&user_id, 60).unwrap();
        let claims = codec.verify(&token).expect("valid token");

        assert_eq!(claims.sub.as_deref(), Some(user_id.as_str()));
        assert_eq!(claims.token_type, TokenType::Access);
        assert_eq!(claims.jti.as_deref(), Some(jti.as_str()));
        assert_eq!(claims.exp - claims.iat, 60);
    }

    #[test]
    fn test_refresh_round_trip() {
        let codec = codec();
        let token = codec.issue_refresh("user-1", 3600).unwrap();
        let claims = codec.verify(&token).unwrap();

        assert_eq!(claims.sub.as_deref(), Some("user-1"));
        assert_eq!(claims.token_type, TokenType::Refresh);
        assert!(claims.jti.is_none());
    }

    #[test]
    fn test_session_ids_are_unique() {
        let codec = codec();
        let (_, a) = codec.issue_access("u", 60).unwrap();
        let (_, b) = codec.issue_access("u", 60).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_expired_token_returns_none() {
        let codec = codec();
        let (token, _) = codec.issue_access("u", -1).unwrap();
        assert!(codec.verify(&token).is_none());
    }

    #[test]
    fn test_tampered_token_returns_none() {
        let codec = codec();
        let (token, _) = codec.issue_access("u", 60).unwrap();

        for i in 0..token.len() {
            let mut bytes = token.clone().into_bytes();
            bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(bytes).unwrap();
            if tampered == token {
                continue;
            }
            assert!(codec.verify(&tampered).is_none(), "byte {i} accepted");
        }
    }

    #[test]
    fn test_wrong_secret_and_algorithm() {
        let (token, _) = codec().issue_access("u", 60).unwrap();

        let other_secret = TokenCodec::new("other-secret", JwtAlgorithm::HS256);
        assert!(other_secret.verify(&token).is_none());

        let other_alg = TokenCodec::new("test-secret", JwtAlgorithm::HS512);
        assert!(other_alg.verify(&token).is_none());
    }

    #[test]
    fn test_foreign_payload_still_decodes() {
        let exp = chrono::Utc::now().timestamp() + 60;
        let key = EncodingKey::from_secret(b"test-secret");
        let sign = |claims: serde_json::Value| encode(&Header::default(), &claims, &key).unwrap();

        let bogus = codec()
            .verify(&sign(serde_json::json!({"sub": "u", "type": "bogus", "exp": exp})))
            .expect("signed token decodes");
        assert_eq!(bogus.token_type, TokenType::Unknown);
        assert_eq!(bogus.iat, 0);

        let untyped = codec()
            .verify(&sign(serde_json::json!({"sub": "u", "exp": exp})))
            .expect("signed token decodes");
        assert_eq!(untyped.token_type, TokenType::Unknown);
    }

    #[test]
    fn test_garbage_returns_none() {
        assert!(codec().verify("invalid.token.here").is_none());
        assert!(codec().verify("").is_none());
    }
}
