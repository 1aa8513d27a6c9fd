use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: UserId,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("Could not sign token: {0}")]
    Encode(String),
}

/// Signs an HS256 token for `user_id`, valid for `ttl` from `now`.
pub fn issue(
    user_id: UserId,
    secret: &str,
    ttl: TimeDelta,
    now: DateTime<Utc>,
) -> Result<String, TokenError> {
    let claims = Claims {
        user_id,
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| TokenError::Encode(e.to_string()))
}

pub fn verify(token: &str, secret: &str) -> Result<Claims, TokenError> {
    let validation = Validation::new(Algorithm::HS256);

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Invalid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-for-testing-only";

    #[test]
    fn issued_token_verifies() {
        let token = issue(7, SECRET, TimeDelta::hours(24), Utc::now()).unwrap();
        let claims = verify(&token, SECRET).unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
    }

    #[test]
    fn expired_is_distinguished() {
        let issued = Utc::now() - TimeDelta::days(2);
        let token = issue(7, SECRET, TimeDelta::hours(1), issued).unwrap();
        assert_eq!(verify(&token, SECRET), Err(TokenError::Expired));
    }

    #[test]
    fn wrong_secret_or_garbage_is_invalid() {
        let token = issue(7, SECRET, TimeDelta::hours(1), Utc::now()).unwrap();
        assert_eq!(verify(&token, "another-secret"), Err(TokenError::Invalid));
        assert_eq!(verify("not.a.token", SECRET), Err(TokenError::Invalid));
    }
}
