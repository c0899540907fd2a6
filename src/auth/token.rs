//! HS256 bearer tokens

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use super::employee::Employee;
use super::error::AuthError;

pub const REFRESH_TOKEN_DAYS: i64 = 7;

/// JWT claims, exactly these four
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    pub username: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, access_ttl_seconds: u64) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::MissingRequiredData("auth.jwt_secret".into()));
        }
        let access_ttl = i64::try_from(access_ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| AuthError::InvalidRequest("auth.jwt_token_duration out of range".into()))?;
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl,
        })
    }

    pub fn issue(&self, employee: &Employee) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access_token: self.sign(employee, self.access_ttl)?,
            refresh_token: self.sign(employee, Duration::days(REFRESH_TOKEN_DAYS))?,
        })
    }

    fn sign(&self, employee: &Employee, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now();
        let exp = now
            .checked_add_signed(ttl)
            .ok_or_else(|| AuthError::InvalidRequest("token expiry out of range".into()))?;
        let claims = Claims {
            username: employee.username.clone(),
            role: employee.role.as_str().to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// Check signature and expiry
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        Ok(decode::<Claims>(token, &self.decoding, &validation)?.claims)
    }
}
