pub mod middleware;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Passenger,
    Driver,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Passenger => "PASSENGER",
            Role::Driver => "DRIVER",
            Role::Admin => "ADMIN",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

/// Issues and validates HS256 access tokens.
pub struct JwtManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(2 * 60 * 60);

impl JwtManager {
    pub fn new(secret: &str, ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        })
    }

    pub fn issue(&self, user_id: Uuid, role: Role) -> Result<String, AppError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id,
            role,
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| AppError::Internal(format!("failed to sign token: {err}")))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        let data = decode::<Claims>(
            token,
            &self.decoding,
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|err| AppError::Unauthorized(format!("invalid token: {err}")))?;
        Ok(data.claims)
    }

    /// Validates a `Bearer <jwt>` string (socket auth frames and HTTP headers
    /// share this shape) and enforces the expected role.
    pub fn verify_bearer(&self, bearer: &str, expected: Role) -> Result<Claims, AppError> {
        let token = bearer
            .strip_prefix("Bearer ")
            .or_else(|| bearer.strip_prefix("bearer "))
            .ok_or_else(|| {
                AppError::Unauthorized("token must be 'Bearer <token>'".to_string())
            })?;

        let claims = self.verify(token.trim())?;
        if claims.role != expected {
            return Err(AppError::Forbidden(format!(
                "role {} is not allowed here",
                claims.role
            )));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<JwtManager> {
        JwtManager::new("integration-test-secret-key-0123456789", ACCESS_TOKEN_TTL)
    }

    #[test]
    fn issued_tokens_verify_with_subject_and_role() {
        let mgr = manager();
        let user = Uuid::new_v4();
        let token = mgr.issue(user, Role::Driver).unwrap();

        let claims = mgr.verify(&token).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.role, Role::Driver);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let mgr = manager();
        let token = mgr.issue(Uuid::new_v4(), Role::Passenger).unwrap();
        let other = JwtManager::new("a-completely-different-secret-key!!", ACCESS_TOKEN_TTL);
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn bearer_wrapping_is_required_for_socket_auth() {
        let mgr = manager();
        let token = mgr.issue(Uuid::new_v4(), Role::Driver).unwrap();

        assert!(mgr.verify_bearer(&format!("Bearer {token}"), Role::Driver).is_ok());
        assert!(mgr.verify_bearer(&token, Role::Driver).is_err());
    }

    #[test]
    fn role_mismatch_is_forbidden() {
        let mgr = manager();
        let token = mgr.issue(Uuid::new_v4(), Role::Passenger).unwrap();
        let err = mgr
            .verify_bearer(&format!("Bearer {token}"), Role::Driver)
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn expired_tokens_fail_validation() {
        let mgr = manager();
        let now = Utc::now().timestamp();
        let stale = Claims {
            sub: Uuid::new_v4(),
            role: Role::Admin,
            iat: now - 7_300,
            exp: now - 7_200,
        };
        let raw = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(Algorithm::HS256),
            &stale,
            &EncodingKey::from_secret("integration-test-secret-key-0123456789".as_bytes()),
        )
        .unwrap();
        assert!(mgr.verify(&raw).is_err());
    }
}
