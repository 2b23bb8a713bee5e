use actix_web::middleware::from_fn;
use actix_web::{delete, get, patch, post, web, HttpResponse};

use crate::auth::require_admin;
use crate::config::AppConfig;
use crate::database::{is_foreign_key_violation, is_unique_violation, Database};
use crate::error::ApiError;
use crate::handlers::listings::listing_filter;
use crate::handlers::{discard_on_error, public_url};
use crate::models::{
    ApiResponse, CreateLocationRequest, ListingQuery, Location, MessageResponse, PageQuery,
    PaginatedResponse, UpdateLocationRequest,
};
use crate::uploads::{FeaturedImageUpload, FormData};
use crate::validation::{check_slug, positive_id, validate_input, PageRequest};

fn location_not_found() -> ApiError {
    ApiError::NotFound("Location not found".into())
}

fn missing_parent() -> ApiError {
    ApiError::validation("parent", "Parent location does not exist")
}

fn write_error(err: sqlx::Error) -> ApiError {
    if is_unique_violation(&err, "locations_slug_key") {
        ApiError::Conflict("Location with this slug already exists".into())
    } else if is_foreign_key_violation(&err) {
        missing_parent()
    } else if matches!(err, sqlx::Error::RowNotFound) {
        location_not_found()
    } else {
        log::error!("Failed to save location: {err:?}");
        err.into()
    }
}

async fn ensure_parent(db: &Database, parent: Option<i32>) -> Result<(), ApiError> {
    if let Some(parent_id) = parent {
        if db.get_location(parent_id).await?.is_none() {
            return Err(missing_parent());
        }
    }
    Ok(())
}

/// id/name/slug triples for select inputs.
#[get("/locations/options")]
pub async fn location_options(db: web::Data<Database>) -> Result<HttpResponse, ApiError> {
    let options = db.location_options().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(options)))
}

#[get("/locations")]
pub async fn list_locations(
    db: web::Data<Database>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let page = PageRequest::from_query(query.page, query.limit, 10, 500)?;
    let (locations, total) = db.list_locations(page).await?;
    Ok(HttpResponse::Ok().json(PaginatedResponse::new(locations, page, total)))
}

#[get("/locations/{id}")]
pub async fn get_location(
    db: web::Data<Database>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let id = positive_id("id", path.into_inner())?;
    let location = db.get_location(id).await?.ok_or_else(location_not_found)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(location)))
}

#[get("/locations/{slug}/listings")]
pub async fn get_location_listings(
    db: web::Data<Database>,
    path: web::Path<String>,
    query: web::Query<ListingQuery>,
) -> Result<HttpResponse, ApiError> {
    let slug = path.into_inner();
    check_slug("slug", &slug, 1, 500)?;
    let page = PageRequest::from_query(query.page, query.limit, 10, 100)?;
    let mut filter = listing_filter(&query)?;

    let location = db
        .get_location_by_slug(&slug)
        .await?
        .ok_or_else(location_not_found)?;

    filter.location_id = Some(location.id);
    filter.location_slug = None;
    let (listings, total) = db.search_listings(&filter, page).await?;

    Ok(HttpResponse::Ok().json(PaginatedResponse::new(listings, page, total)))
}

// ============================================================================
// ADMIN
// ============================================================================

#[post("/locations", wrap = "from_fn(require_admin)")]
pub async fn create_location(
    db: web::Data<Database>,
    config: web::Data<AppConfig>,
    form: FormData<FeaturedImageUpload>,
) -> Result<HttpResponse, ApiError> {
    let result = create_location_inner(&db, &config, &form).await;
    let location = discard_on_error(&form.files, result).await?;

    log::info!("Created location {} ({})", location.id, location.slug);
    Ok(HttpResponse::Created().json(ApiResponse::success(location)))
}

async fn create_location_inner(
    db: &Database,
    config: &AppConfig,
    form: &FormData<FeaturedImageUpload>,
) -> Result<Location, ApiError> {
    let body: CreateLocationRequest = form.parse()?;
    validate_input(&body)?;
    ensure_parent(db, body.parent).await?;

    let featured_image = form
        .file("featured_image")
        .map(|file| public_url(config, file))
        .transpose()?;

    db.create_location(body.into_new_location(featured_image))
        .await
        .map_err(write_error)
}

#[patch("/locations/{id}", wrap = "from_fn(require_admin)")]
pub async fn update_location(
    db: web::Data<Database>,
    config: web::Data<AppConfig>,
    path: web::Path<i32>,
    form: FormData<FeaturedImageUpload>,
) -> Result<HttpResponse, ApiError> {
    let result = update_location_inner(&db, &config, path.into_inner(), &form).await;
    let location = discard_on_error(&form.files, result).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(location)))
}

async fn update_location_inner(
    db: &Database,
    config: &AppConfig,
    id: i32,
    form: &FormData<FeaturedImageUpload>,
) -> Result<Location, ApiError> {
    let id = positive_id("id", id)?;
    let body: UpdateLocationRequest = form.parse()?;
    if body.is_empty() && form.files.is_empty() {
        return Err(ApiError::validation(
            "body",
            "At least one field must be provided for update",
        ));
    }
    validate_input(&body)?;
    if body.parent == Some(id) {
        return Err(ApiError::validation("parent", "A location cannot be its own parent"));
    }

    let mut location = db.get_location(id).await?.ok_or_else(location_not_found)?;
    ensure_parent(db, body.parent).await?;

    let featured_image = form
        .file("featured_image")
        .map(|file| public_url(config, file))
        .transpose()?;
    body.apply_to_existing(&mut location, featured_image);

    db.update_location(location).await.map_err(write_error)
}

#[delete("/locations/{id}", wrap = "from_fn(require_admin)")]
pub async fn delete_location(
    db: web::Data<Database>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let id = positive_id("id", path.into_inner())?;

    match db.delete_location(id).await {
        Ok(()) => Ok(HttpResponse::Ok().json(ApiResponse::success(MessageResponse {
            message: "Location deleted successfully".into(),
        }))),
        Err(sqlx::Error::RowNotFound) => Err(location_not_found()),
        Err(err) => {
            log::error!("Failed to delete location {id}: {err:?}");
            Err(err.into())
        }
    }
}
