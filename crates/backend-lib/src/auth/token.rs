// ============================
// crates/backend-lib/src/auth/token.rs
// ============================
//! HS256 JWT bearer tokens carrying `{ id, exp }`.
use super::{AuthService, AuthUser};
use crate::error::AppError;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// User ID
    pub id: String,
    /// Expiry, seconds since the epoch
    pub exp: u64,
}

pub struct JwtAuth {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl JwtAuth {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl,
        }
    }

    fn sign(&self, claims: &Claims) -> Result<String, AppError> {
        Ok(encode(&Header::new(Algorithm::HS256), claims, &self.encoding)?)
    }
}

impl AuthService for JwtAuth {
    fn verify(&self, token: &str) -> Result<AuthUser, AppError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        Ok(AuthUser {
            user_id: data.claims.id,
        })
    }

    fn issue(&self, user_id: &str) -> Result<String, AppError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        self.sign(&Claims {
            id: user_id.to_string(),
            exp: (now + self.ttl).as_secs(),
        })
    }
}
