use actix_web::middleware::from_fn;
use actix_web::{get, web, HttpResponse};

use crate::auth::{require_auth, AuthUser};
use crate::database::Database;
use crate::error::ApiError;
use crate::models::ApiResponse;

#[get("/user", wrap = "from_fn(require_auth)")]
pub async fn current_user(
    db: web::Data<Database>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, ApiError> {
    let user = db
        .find_user_by_id(auth.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(user)))
}
