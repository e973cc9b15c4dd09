//! Authentication and authorization utilities
//!
//! Provides:
//! - The ordered role hierarchy used by every permission check
//! - JWT token generation and validation
//! - Password hashing for stored credentials
//! - Actor context extraction for handlers

use crate::errors::{AppError, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Role hierarchy, lowest privilege first.
///
/// The derived ordering is the hierarchy: `Admin > Head > PMO > PM >
/// Secretary > ReadOnly`. Permission checks go through [`Role::at_least`]
/// instead of listing roles.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, DeriveActiveEnum,
    Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum Role {
    #[sea_orm(string_value = "ReadOnly")]
    ReadOnly,
    #[sea_orm(string_value = "Secretary")]
    Secretary,
    #[sea_orm(string_value = "PM")]
    PM,
    #[sea_orm(string_value = "PMO")]
    PMO,
    #[sea_orm(string_value = "Head")]
    Head,
    #[sea_orm(string_value = "Admin")]
    Admin,
}

impl Role {
    /// True when this role sits at or above `min` in the hierarchy
    pub fn at_least(self, min: Role) -> bool {
        self >= min
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::ReadOnly => "ReadOnly",
            Role::Secretary => "Secretary",
            Role::PM => "PM",
            Role::PMO => "PMO",
            Role::Head => "Head",
            Role::Admin => "Admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "readonly" | "read_only" => Ok(Role::ReadOnly),
            "secretary" => Ok(Role::Secretary),
            "pm" => Ok(Role::PM),
            "pmo" => Ok(Role::PMO),
            "head" => Ok(Role::Head),
            "admin" => Ok(Role::Admin),
            other => Err(AppError::validation("role", format!("unknown role '{}'", other))),
        }
    }
}

/// The caller of a workflow operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i32,
    pub username: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: i32, username: impl Into<String>, role: Role) -> Self {
        Self {
            user_id,
            username: username.into(),
            role,
        }
    }
}

/// Extracted authentication context available to handlers
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub actor: Actor,

    /// Request ID for tracing
    pub request_id: String,
}

impl AuthContext {
    pub fn role(&self) -> Role {
        self.actor.role
    }

    pub fn username(&self) -> &str {
        &self.actor.username
    }

    /// Require a minimum role, returning error if the caller is below it
    pub fn require_role(&self, min: Role) -> Result<()> {
        if self.actor.role.at_least(min) {
            Ok(())
        } else {
            Err(AppError::Forbidden {
                message: format!("Requires role {} or higher", min),
            })
        }
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID)
    pub sub: String,

    pub username: String,

    pub role: Role,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// JWT token manager
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_secs: i64,
}

impl JwtManager {
    /// Create a new JWT manager with the given secret
    pub fn new(secret: &str, expiration_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_secs: expiration_secs as i64,
        }
    }

    pub fn expiration_secs(&self) -> i64 {
        self.expiration_secs
    }

    /// Generate a new JWT token
    pub fn generate_token(&self, actor: &Actor) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.expiration_secs);

        let claims = JwtClaims {
            sub: actor.user_id.to_string(),
            username: actor.username.clone(),
            role: actor.role,
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| AppError::Internal {
            message: format!("Failed to generate token: {}", e),
        })
    }

    /// Validate and decode a JWT token
    pub fn validate_token(&self, token: &str) -> Result<JwtClaims> {
        decode::<JwtClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::ExpiredToken,
                _ => AppError::Unauthorized {
                    message: "Invalid token".to_string(),
                },
            })
    }

    /// Decode a token into the actor it was issued for
    pub fn actor_from_token(&self, token: &str) -> Result<Actor> {
        let claims = self.validate_token(token)?;
        let user_id = claims.sub.parse::<i32>().map_err(|_| AppError::Unauthorized {
            message: "Invalid token subject".to_string(),
        })?;
        Ok(Actor::new(user_id, claims.username, claims.role))
    }
}

/// Hash a password into a PHC string for storage
pub fn hash_password(password: &str) -> Result<String> {
    let salt_bytes: [u8; 16] = rand::random();
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| AppError::Internal {
        message: format!("Failed to encode salt: {}", e),
    })?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal {
            message: format!("Failed to hash password: {}", e),
        })
}

/// Check a password against a stored PHC string
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Extract a bearer token from an Authorization header
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Axum extractor for AuthContext
impl<S> FromRequestParts<S> for AuthContext
where
    Arc<JwtManager>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let request_id = parts
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
            })?;

        let token = extract_bearer(auth_header).ok_or_else(|| AppError::Unauthorized {
            message: "Expected a bearer token".to_string(),
        })?;

        let jwt = <Arc<JwtManager> as FromRef<S>>::from_ref(state);
        let actor = jwt.actor_from_token(token)?;

        Ok(AuthContext { actor, request_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_hierarchy() {
        assert!(Role::Admin.at_least(Role::Head));
        assert!(Role::Head.at_least(Role::PMO));
        assert!(Role::PMO.at_least(Role::PM));
        assert!(Role::PM.at_least(Role::PM));
        assert!(!Role::Secretary.at_least(Role::PM));
        assert!(!Role::ReadOnly.at_least(Role::Secretary));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("pmo".parse::<Role>().unwrap(), Role::PMO);
        assert_eq!(" Admin ".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("read_only".parse::<Role>().unwrap(), Role::ReadOnly);
        assert!("manager".parse::<Role>().is_err());
    }

    #[test]
    fn test_password_roundtrip() {
        let hash = hash_password("s3cret!").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("s3cret!", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("s3cret!", "not-a-phc-string"));
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer abc.def"), Some("abc.def"));
        assert_eq!(extract_bearer("Bearer "), None);
        assert_eq!(extract_bearer("Basic abc"), None);
    }

    #[test]
    fn test_require_role() {
        let ctx = AuthContext {
            actor: Actor::new(3, "sec", Role::Secretary),
            request_id: "req".into(),
        };
        assert!(ctx.require_role(Role::Secretary).is_ok());
        assert!(matches!(
            ctx.require_role(Role::Head),
            Err(AppError::Forbidden { .. })
        ));
    }

    #[test]
    fn test_jwt_roundtrip() {
        let manager = JwtManager::new("test_secret", 3600);
        let actor = Actor::new(12, "pm.user", Role::PM);

        let token = manager.generate_token(&actor).unwrap();
        let decoded = manager.actor_from_token(&token).unwrap();

        assert_eq!(decoded, actor);
    }

    #[test]
    fn test_jwt_rejects_foreign_signature() {
        let issuer = JwtManager::new("secret-a", 3600);
        let verifier = JwtManager::new("secret-b", 3600);
        let token = issuer
            .generate_token(&Actor::new(1, "admin", Role::Admin))
            .unwrap();

        assert!(matches!(
            verifier.validate_token(&token),
            Err(AppError::Unauthorized { .. })
        ));
    }
}
