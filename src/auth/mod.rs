use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::{
    entities::user::{self, UserRole},
    errors::ServiceError,
    AppState,
};

const TOKEN_ISSUER: &str = "storefront-api";

/// JWT claims carried by every bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: UserRole,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// Authenticated principal, injected into request extensions by
/// [`auth_middleware`] and extracted explicitly by handlers.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: UserRole,
    pub token_id: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| ServiceError::Unauthorized("authentication required".to_string()))
    }
}

/// Issues and validates tokens; keeps a redis-backed blacklist of revoked
/// token ids (logout). Blacklist lookups degrade open when redis is down:
/// a warning is logged and the token is accepted.
#[derive(Clone)]
pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_secs: i64,
    redis: Arc<redis::Client>,
}

impl AuthService {
    pub fn new(jwt_secret: &str, expiration_secs: i64, redis: Arc<redis::Client>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            expiration_secs,
            redis,
        }
    }

    pub fn generate_token(&self, user: &user::Model) -> Result<String, ServiceError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user.id,
            role: user.role,
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + self.expiration_secs,
            iss: TOKEN_ISSUER.to_string(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::InternalError(format!("token encoding: {}", e)))
    }

    pub async fn validate_token(&self, token: &str) -> Result<Claims, ServiceError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[TOKEN_ISSUER]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|_| ServiceError::Unauthorized("invalid or expired token".to_string()))?;

        if self.is_blacklisted(&data.claims.jti).await {
            return Err(ServiceError::Unauthorized("token revoked".to_string()));
        }
        Ok(data.claims)
    }

    /// Revokes a token until its natural expiry.
    pub async fn blacklist(&self, claims: &Claims) {
        let ttl = (claims.exp - Utc::now().timestamp()).max(1) as u64;
        let key = format!("auth:blacklist:{}", claims.jti);
        match self.redis.get_async_connection().await {
            Ok(mut conn) => {
                let res: Result<(), redis::RedisError> = redis::cmd("SET")
                    .arg(&key)
                    .arg("1")
                    .arg("EX")
                    .arg(ttl)
                    .query_async(&mut conn)
                    .await;
                if let Err(e) = res {
                    warn!(error = %e, "failed to blacklist token");
                }
            }
            Err(e) => warn!(error = %e, "redis unavailable, token not blacklisted"),
        }
    }

    async fn is_blacklisted(&self, jti: &str) -> bool {
        let key = format!("auth:blacklist:{}", jti);
        match self.redis.get_async_connection().await {
            Ok(mut conn) => {
                let exists: Result<bool, redis::RedisError> =
                    redis::cmd("EXISTS").arg(&key).query_async(&mut conn).await;
                exists.unwrap_or(false)
            }
            Err(e) => {
                warn!(error = %e, "redis unavailable, skipping blacklist check");
                false
            }
        }
    }
}

pub fn hash_password(password: &str) -> Result<String, ServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ServiceError::InternalError(format!("password hashing: {}", e)))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Validates the bearer token and attaches the [`AuthUser`] principal to the
/// request. Routes behind this middleware can rely on the extractor.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let token = bearer_token(&req)
        .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".to_string()))?
        .to_string();

    let claims = state.auth.validate_token(&token).await?;
    req.extensions_mut().insert(AuthUser {
        user_id: claims.sub,
        role: claims.role,
        token_id: claims.jti.clone(),
    });
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Rejects non-admin principals. Must be layered inside [`auth_middleware`].
pub async fn require_admin(req: Request, next: Next) -> Result<Response, ServiceError> {
    let user = req
        .extensions()
        .get::<AuthUser>()
        .ok_or_else(|| ServiceError::Unauthorized("authentication required".to_string()))?;
    if !user.is_admin() {
        return Err(ServiceError::Forbidden("admin access required".to_string()));
    }
    Ok(next.run(req).await)
}
