use actix_web::middleware::from_fn;
use actix_web::{delete, get, patch, post, web, HttpResponse};

use crate::auth::require_admin;
use crate::database::{is_unique_violation, Database};
use crate::error::ApiError;
use crate::models::{ApiResponse, CreateFeatureRequest, UpdateFeatureRequest};
use crate::validation::{positive_id, validate_input};

fn feature_not_found() -> ApiError {
    ApiError::NotFound("Feature not found".into())
}

fn name_conflict(err: sqlx::Error) -> ApiError {
    if is_unique_violation(&err, "features_name_key") {
        ApiError::Conflict("Feature with this name already exists".into())
    } else if matches!(err, sqlx::Error::RowNotFound) {
        feature_not_found()
    } else {
        log::error!("Failed to save feature: {err:?}");
        err.into()
    }
}

#[get("/features")]
pub async fn list_features(db: web::Data<Database>) -> Result<HttpResponse, ApiError> {
    let features = db.list_features().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(features)))
}

#[get("/features/{id}")]
pub async fn get_feature(
    db: web::Data<Database>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let id = positive_id("id", path.into_inner())?;
    let feature = db.get_feature(id).await?.ok_or_else(feature_not_found)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(feature)))
}

#[post("/features", wrap = "from_fn(require_admin)")]
pub async fn create_feature(
    db: web::Data<Database>,
    body: web::Json<CreateFeatureRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validate_input(&body)?;

    let feature = db.create_feature(body.name.trim()).await.map_err(name_conflict)?;
    log::info!("Created feature {} ({})", feature.id, feature.name);
    Ok(HttpResponse::Created().json(ApiResponse::success(feature)))
}

#[patch("/features/{id}", wrap = "from_fn(require_admin)")]
pub async fn update_feature(
    db: web::Data<Database>,
    path: web::Path<i32>,
    body: web::Json<UpdateFeatureRequest>,
) -> Result<HttpResponse, ApiError> {
    let id = positive_id("id", path.into_inner())?;
    let body = body.into_inner();
    validate_input(&body)?;

    let Some(name) = body.name else {
        return Err(ApiError::validation("body", "At least one field must be provided"));
    };

    let feature = db.update_feature(id, name.trim()).await.map_err(name_conflict)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(feature)))
}

#[delete("/features/{id}", wrap = "from_fn(require_admin)")]
pub async fn delete_feature(
    db: web::Data<Database>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let id = positive_id("id", path.into_inner())?;
    match db.delete_feature(id).await {
        Ok(()) => Ok(HttpResponse::NoContent().finish()),
        Err(sqlx::Error::RowNotFound) => Err(feature_not_found()),
        Err(err) => {
            log::error!("Failed to delete feature {id}: {err:?}");
            Err(err.into())
        }
    }
}
