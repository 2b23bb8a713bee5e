use actix_web::body::MessageBody;
use actix_web::cookie::{time, Cookie, SameSite};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderValue, AUTHORIZATION};
use actix_web::middleware::Next;
use actix_web::{web, HttpMessage};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use once_cell::sync::Lazy;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::database::Database;
use crate::error::ApiError;
use crate::models::Role;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: i32,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    fn new(user_id: i32, expires_in: Duration) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            iat: now.timestamp(),
            exp: (now + expires_in).timestamp(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Keys {
    fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Issues and verifies access and refresh tokens, each signed with its own secret.
pub struct TokenService {
    access: Keys,
    refresh: Keys,
    access_ttl: Duration,
    refresh_ttl: Duration,
    validation: Validation,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenService {
    pub fn new(
        access_secret: &str,
        refresh_secret: &str,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            access: Keys::new(access_secret),
            refresh: Keys::new(refresh_secret),
            access_ttl,
            refresh_ttl,
            validation,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            &config.jwt_secret,
            &config.refresh_token_secret,
            config.access_token_ttl,
            config.refresh_token_ttl,
        )
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn access_token(&self, user_id: i32) -> Result<String, ApiError> {
        Self::sign(&self.access, &Claims::new(user_id, self.access_ttl))
    }

    pub fn refresh_token(&self, user_id: i32) -> Result<String, ApiError> {
        Self::sign(&self.refresh, &Claims::new(user_id, self.refresh_ttl))
    }

    pub fn issue_pair(&self, user_id: i32) -> Result<TokenPair, ApiError> {
        Ok(TokenPair {
            access_token: self.access_token(user_id)?,
            refresh_token: self.refresh_token(user_id)?,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(&self.access, token)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(&self.refresh, token)
    }

    fn sign(keys: &Keys, claims: &Claims) -> Result<String, ApiError> {
        encode(&Header::new(Algorithm::HS256), claims, &keys.encoding)
            .map_err(|err| ApiError::internal(format!("failed to sign token: {err}")))
    }

    fn verify(&self, keys: &Keys, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token, &keys.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }
}

// ============================================================================
// PASSWORDS & RESET TOKENS
// ============================================================================

fn hash_blocking(password: &str) -> Result<String, ApiError> {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|err| ApiError::internal(format!("failed to encode salt: {err}")))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| ApiError::internal(format!("failed to hash password: {err}")))
}

fn verify_blocking(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(err) => {
            log::error!("Stored password hash is malformed: {err}");
            false
        }
    }
}

/// Hashes on the blocking pool so the worker thread is not stalled.
pub async fn hash_password(password: String) -> Result<String, ApiError> {
    web::block(move || hash_blocking(&password))
        .await
        .map_err(|err| ApiError::internal(format!("password hashing task failed: {err}")))?
}

pub async fn verify_password(password: String, hash: String) -> Result<bool, ApiError> {
    web::block(move || verify_blocking(&password, &hash))
        .await
        .map_err(|err| ApiError::internal(format!("password verification task failed: {err}")))
}

/// Hash of a throwaway secret, checked when the account does not exist.
static UNKNOWN_USER_HASH: Lazy<Option<String>> =
    Lazy::new(|| hash_blocking("no-such-account").ok());

/// Does the same Argon2 work as a real login for an email with no account.
pub async fn verify_unknown_user(password: String) -> Result<(), ApiError> {
    web::block(move || {
        if let Some(hash) = UNKNOWN_USER_HASH.as_deref() {
            verify_blocking(&password, hash);
        }
    })
    .await
    .map_err(|err| ApiError::internal(format!("password verification task failed: {err}")))
}

pub fn generate_reset_token() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ============================================================================
// COOKIES
// ============================================================================

pub fn refresh_cookie(token: &str, ttl: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build(REFRESH_COOKIE, token.to_string())
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::seconds(ttl.num_seconds()))
        .finish()
}

pub fn removal_cookie(secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::build(REFRESH_COOKIE, "")
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .finish();
    cookie.make_removal();
    cookie
}

// ============================================================================
// MIDDLEWARE
// ============================================================================

/// Caller identity attached to request extensions by the auth middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: i32,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

fn bearer_token(req: &ServiceRequest) -> Option<String> {
    let from_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string);

    from_header.or_else(|| req.cookie(ACCESS_COOKIE).map(|c| c.value().to_string()))
}

fn app_state<T: 'static>(req: &ServiceRequest) -> Result<web::Data<T>, ApiError> {
    req.app_data::<web::Data<T>>()
        .cloned()
        .ok_or_else(|| ApiError::internal(format!("missing app data {}", std::any::type_name::<T>())))
}

/// Resolves the caller. Returns a fresh access token when the presented one had expired
/// and the refresh cookie was still valid.
async fn authenticate(req: &ServiceRequest) -> Result<(AuthUser, Option<String>), ApiError> {
    let token = bearer_token(req)
        .ok_or_else(|| ApiError::Unauthorized("Access token is required".into()))?;
    let tokens = app_state::<TokenService>(req)?;
    let db = app_state::<Database>(req)?;

    let (user_id, renewed) = match tokens.verify_access(&token) {
        Ok(claims) => (claims.user_id, None),
        Err(TokenError::Expired) => {
            let refresh = req
                .cookie(REFRESH_COOKIE)
                .map(|c| c.value().to_string())
                .ok_or_else(|| ApiError::Unauthorized("Access token expired".into()))?;
            let claims = tokens.verify_refresh(&refresh).map_err(|err| {
                log::warn!("Refresh during authentication failed: {err}");
                ApiError::InvalidRefreshToken
            })?;

            let user = db
                .find_user_by_id(claims.user_id)
                .await?
                .ok_or(ApiError::InvalidRefreshToken)?;
            if user.refresh_token.as_deref() != Some(refresh.as_str()) {
                log::warn!("Refresh token for user {} does not match the stored one", user.id);
                return Err(ApiError::InvalidRefreshToken);
            }
            (user.id, Some(tokens.access_token(user.id)?))
        }
        Err(TokenError::Invalid) => return Err(ApiError::Forbidden("Invalid access token".into())),
    };

    let user = db
        .find_user_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User no longer exists".into()))?;

    Ok((
        AuthUser {
            id: user.id,
            role: user.role,
        },
        renewed,
    ))
}

async fn guard(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
    admin_only: bool,
) -> Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    let (user, renewed) = authenticate(&req).await?;
    if admin_only && !user.is_admin() {
        return Err(ApiError::Forbidden("Admin access required".into()).into());
    }
    req.extensions_mut().insert(user);

    let mut res = next.call(req).await?;
    if let Some(token) = renewed {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|err| ApiError::internal(format!("invalid header value: {err}")))?;
        res.headers_mut().insert(AUTHORIZATION, value);
    }
    Ok(res)
}

/// Any signed-in user.
pub async fn require_auth(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    guard(req, next, false).await
}

/// Signed-in user with the ADMIN role.
pub async fn require_admin(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    guard(req, next, true).await
}
