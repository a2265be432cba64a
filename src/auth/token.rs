//! Bearer tokens: HS256 JWTs minted by the identity provider.
//!
//! The service only needs the shared secret to verify them. `issue` exists for
//! local development and tests.

use std::sync::Arc;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Username at the time of issue.
    pub name: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct TokenKeys(Arc<Inner>);

struct Inner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
}

impl TokenKeys {
    pub fn new(secret: &str, ttl_secs: i64) -> Self {
        Self(Arc::new(Inner {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
            ttl_secs,
        }))
    }

    pub fn issue(&self, user_id: &str, username: &str) -> AppResult<String> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: user_id.to_owned(),
            name: username.to_owned(),
            iat: now,
            exp: now + self.0.ttl_secs,
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.0.encoding_key)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("jwt encode: {e}")))
    }

    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        jsonwebtoken::decode::<Claims>(token, &self.0.decoding_key, &self.0.validation)
            .map(|data| data.claims)
            .map_err(|e| AppError::Unauthorized(format!("invalid token: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_verify() {
        let keys = TokenKeys::new("test-secret", 60);
        let token = keys.issue("u1", "alice").unwrap();
        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.name, "alice");
    }

    #[test]
    fn foreign_secret_is_rejected() {
        let token = TokenKeys::new("one", 60).issue("u1", "alice").unwrap();
        let err = TokenKeys::new("two", 60).verify(&token).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        // default validation allows 60s of leeway
        let keys = TokenKeys::new("test-secret", -3600);
        let token = keys.issue("u1", "alice").unwrap();
        assert!(keys.verify(&token).is_err());
    }
}
