use actix_web::{post, web, HttpMessage, HttpRequest, HttpResponse};
use chrono::{Duration, Utc};

use crate::auth::{self, TokenService, REFRESH_COOKIE};
use crate::clients::mailer::{Mailer, OutgoingEmail};
use crate::config::AppConfig;
use crate::database::{is_unique_violation, Database};
use crate::error::ApiError;
use crate::models::{
    AccessTokenResponse, ApiResponse, ForgotPasswordRequest, LoginRequest, MessageResponse,
    RefreshRequest, RegisterRequest, ResetPasswordRequest,
};
use crate::validation::validate_input;

const RESET_TOKEN_TTL_HOURS: i64 = 1;

fn message(text: &str) -> ApiResponse<MessageResponse> {
    ApiResponse::success(MessageResponse {
        message: text.to_string(),
    })
}

fn token_response(
    config: &AppConfig,
    tokens: &TokenService,
    status: actix_web::http::StatusCode,
    access_token: String,
    refresh_token: &str,
) -> HttpResponse {
    HttpResponse::build(status)
        .cookie(auth::refresh_cookie(
            refresh_token,
            tokens.refresh_ttl(),
            config.is_production(),
        ))
        .json(ApiResponse::success(AccessTokenResponse { access_token }))
}

fn presented_refresh_token(req: &HttpRequest, body: Option<web::Json<RefreshRequest>>) -> Option<String> {
    req.cookie(REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
        .or_else(|| body.and_then(|body| body.into_inner().refresh_token))
        .filter(|token| !token.is_empty())
}

#[post("/register")]
pub async fn register(
    db: web::Data<Database>,
    tokens: web::Data<TokenService>,
    config: web::Data<AppConfig>,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validate_input(&body)?;

    if db.find_user_by_email(&body.email).await?.is_some() {
        return Err(ApiError::EmailTaken);
    }

    let password_hash = auth::hash_password(body.password.clone()).await?;
    let user = match db.create_user(body.into_new_user(password_hash)).await {
        Ok(user) => user,
        Err(err) if is_unique_violation(&err, "users_email_key") => return Err(ApiError::EmailTaken),
        Err(err) => {
            log::error!("Failed to create user: {err:?}");
            return Err(err.into());
        }
    };

    let pair = tokens.issue_pair(user.id)?;
    db.set_refresh_token(user.id, Some(&pair.refresh_token)).await?;
    log::info!("Registered user {}", user.id);

    Ok(token_response(
        &config,
        &tokens,
        actix_web::http::StatusCode::CREATED,
        pair.access_token,
        &pair.refresh_token,
    ))
}

#[post("/login")]
pub async fn login(
    db: web::Data<Database>,
    tokens: web::Data<TokenService>,
    config: web::Data<AppConfig>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validate_input(&body)?;

    let Some(user) = db.find_user_by_email(&body.email).await? else {
        auth::verify_unknown_user(body.password).await?;
        return Err(ApiError::InvalidCredentials);
    };

    if !auth::verify_password(body.password, user.password.clone()).await? {
        return Err(ApiError::InvalidCredentials);
    }

    let pair = tokens.issue_pair(user.id)?;
    db.set_refresh_token(user.id, Some(&pair.refresh_token)).await?;

    Ok(token_response(
        &config,
        &tokens,
        actix_web::http::StatusCode::OK,
        pair.access_token,
        &pair.refresh_token,
    ))
}

#[post("/refresh")]
pub async fn refresh(
    req: HttpRequest,
    db: web::Data<Database>,
    tokens: web::Data<TokenService>,
    body: Option<web::Json<RefreshRequest>>,
) -> Result<HttpResponse, ApiError> {
    let token = presented_refresh_token(&req, body).ok_or(ApiError::InvalidRefreshToken)?;
    let claims = tokens.verify_refresh(&token).map_err(|err| {
        log::warn!("Rejected refresh token: {err}");
        ApiError::InvalidRefreshToken
    })?;

    let user = db
        .find_user_by_id(claims.user_id)
        .await?
        .ok_or(ApiError::InvalidRefreshToken)?;
    if user.refresh_token.as_deref() != Some(token.as_str()) {
        return Err(ApiError::InvalidRefreshToken);
    }

    let access_token = tokens.access_token(user.id)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(AccessTokenResponse { access_token })))
}

#[post("/logout")]
pub async fn logout(
    req: HttpRequest,
    db: web::Data<Database>,
    config: web::Data<AppConfig>,
    body: Option<web::Json<RefreshRequest>>,
) -> Result<HttpResponse, ApiError> {
    if let Some(token) = presented_refresh_token(&req, body) {
        db.clear_refresh_token(&token).await?;
    }

    Ok(HttpResponse::Ok()
        .cookie(auth::removal_cookie(config.is_production()))
        .json(message("Logged out successfully")))
}

#[post("/forgot-password")]
pub async fn forgot_password(
    db: web::Data<Database>,
    mailer: web::Data<dyn Mailer>,
    config: web::Data<AppConfig>,
    body: web::Json<ForgotPasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validate_input(&body)?;

    let generic = message("If an account exists for that email, a reset link has been sent");

    let Some(user) = db.find_user_by_email(&body.email).await? else {
        return Ok(HttpResponse::Ok().json(generic));
    };

    let token = auth::generate_reset_token();
    let expires_at = Utc::now() + Duration::hours(RESET_TOKEN_TTL_HOURS);
    db.set_reset_token(user.id, &token, expires_at).await?;

    let reset_url = format!("{}/reset-password?token={token}", config.frontend_url);
    if let Err(err) = mailer
        .send(OutgoingEmail::password_reset(&user.email, &reset_url))
        .await
    {
        log::error!("Failed to send password reset email to user {}: {err:?}", user.id);
    }

    Ok(HttpResponse::Ok().json(generic))
}

#[post("/reset-password")]
pub async fn reset_password(
    db: web::Data<Database>,
    body: web::Json<ResetPasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validate_input(&body)?;

    if !db.reset_token_valid(&body.token).await? {
        return Err(ApiError::BadRequest("Invalid or expired token".into()));
    }

    let password_hash = auth::hash_password(body.password).await?;
    if !db.reset_password(&body.token, &password_hash).await? {
        return Err(ApiError::BadRequest("Invalid or expired token".into()));
    }

    Ok(HttpResponse::Ok().json(message("Password reset successful")))
}
