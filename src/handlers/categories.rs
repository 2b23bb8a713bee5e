use actix_web::middleware::from_fn;
use actix_web::{delete, get, patch, post, web, HttpResponse};

use crate::auth::require_admin;
use crate::config::AppConfig;
use crate::database::{is_foreign_key_violation, is_unique_violation, Database, StoreError};
use crate::error::ApiError;
use crate::handlers::listings::listing_filter;
use crate::handlers::{discard_on_error, public_url};
use crate::models::{
    ApiResponse, CategoryWithFeatures, CreateCategoryRequest, ListingQuery, MessageResponse,
    PageQuery, PaginatedResponse, UpdateCategoryRequest,
};
use crate::uploads::{BannerUpload, FormData};
use crate::validation::{check_slug, positive_id, validate_input, PageRequest};

fn category_not_found() -> ApiError {
    ApiError::NotFound("Category not found".into())
}

fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::Sqlx(err) if is_unique_violation(&err, "categories_slug_key") => {
            ApiError::Conflict("Category with this slug already exists".into())
        }
        StoreError::Sqlx(sqlx::Error::RowNotFound) => category_not_found(),
        StoreError::Sqlx(err) => {
            log::error!("Failed to save category: {err:?}");
            err.into()
        }
        other => other.into(),
    }
}

#[get("/categories")]
pub async fn list_categories(
    db: web::Data<Database>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let page = PageRequest::from_query(query.page, query.limit, 10, 500)?;
    let (categories, total) = db.list_categories(page).await?;
    Ok(HttpResponse::Ok().json(PaginatedResponse::new(categories, page, total)))
}

#[get("/categories/{id}")]
pub async fn get_category(
    db: web::Data<Database>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let id = positive_id("id", path.into_inner())?;
    let category = db
        .get_category_with_features(id)
        .await?
        .ok_or_else(category_not_found)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(category)))
}

#[get("/categories/{id}/features")]
pub async fn get_category_features(
    db: web::Data<Database>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let id = positive_id("id", path.into_inner())?;
    if db.get_category(id).await?.is_none() {
        return Err(category_not_found());
    }

    let features = db.category_features(id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(features)))
}

/// Listings in one category, with the same price/feature/search filters as `/listings`.
#[get("/categories/{category_slug}/listings")]
pub async fn get_category_listings(
    db: web::Data<Database>,
    path: web::Path<String>,
    query: web::Query<ListingQuery>,
) -> Result<HttpResponse, ApiError> {
    let category_slug = path.into_inner();
    check_slug("categorySlug", &category_slug, 3, 50)?;
    let page = PageRequest::from_query(query.page, query.limit, 6, 100)?;
    let mut filter = listing_filter(&query)?;

    let category = db
        .get_category_by_slug(&category_slug)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Category '{category_slug}' not found")))?;

    filter.category_id = Some(category.id);
    filter.category_slug = None;
    let (listings, total) = db.search_listings(&filter, page).await?;

    Ok(HttpResponse::Ok().json(PaginatedResponse::new(listings, page, total)))
}

// ============================================================================
// ADMIN
// ============================================================================

#[post("/categories", wrap = "from_fn(require_admin)")]
pub async fn create_category(
    db: web::Data<Database>,
    config: web::Data<AppConfig>,
    form: FormData<BannerUpload>,
) -> Result<HttpResponse, ApiError> {
    let result = create_category_inner(&db, &config, &form).await;
    let category = discard_on_error(&form.files, result).await?;

    log::info!("Created category {} ({})", category.category.id, category.category.slug);
    Ok(HttpResponse::Created().json(ApiResponse::success(category)))
}

async fn create_category_inner(
    db: &Database,
    config: &AppConfig,
    form: &FormData<BannerUpload>,
) -> Result<CategoryWithFeatures, ApiError> {
    let body: CreateCategoryRequest = form.parse()?;
    validate_input(&body)?;

    let banner_image = form
        .file("banner_image")
        .map(|file| public_url(config, file))
        .transpose()?;

    db.create_category(body.into_new_category(banner_image))
        .await
        .map_err(store_error)
}

#[patch("/categories/{id}", wrap = "from_fn(require_admin)")]
pub async fn update_category(
    db: web::Data<Database>,
    config: web::Data<AppConfig>,
    path: web::Path<i32>,
    form: FormData<BannerUpload>,
) -> Result<HttpResponse, ApiError> {
    let result = update_category_inner(&db, &config, path.into_inner(), &form).await;
    let category = discard_on_error(&form.files, result).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(category)))
}

async fn update_category_inner(
    db: &Database,
    config: &AppConfig,
    id: i32,
    form: &FormData<BannerUpload>,
) -> Result<CategoryWithFeatures, ApiError> {
    let id = positive_id("id", id)?;
    let body: UpdateCategoryRequest = form.parse()?;
    if body.is_empty() && form.files.is_empty() {
        return Err(ApiError::validation(
            "body",
            "At least one field must be provided for update",
        ));
    }
    validate_input(&body)?;

    let mut category = db.get_category(id).await?.ok_or_else(category_not_found)?;
    let banner_image = form
        .file("banner_image")
        .map(|file| public_url(config, file))
        .transpose()?;
    body.apply_to_existing(&mut category, banner_image);

    db.update_category(category, body.feature_ids)
        .await
        .map_err(store_error)
}

#[delete("/categories/{id}", wrap = "from_fn(require_admin)")]
pub async fn delete_category(
    db: web::Data<Database>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let id = positive_id("id", path.into_inner())?;

    match db.delete_category(id).await {
        Ok(()) => Ok(HttpResponse::Ok().json(ApiResponse::success(MessageResponse {
            message: "Category deleted successfully".into(),
        }))),
        Err(sqlx::Error::RowNotFound) => Err(category_not_found()),
        Err(err) if is_foreign_key_violation(&err) => Err(ApiError::Conflict(
            "Cannot delete category while listings still reference it".into(),
        )),
        Err(err) => {
            log::error!("Failed to delete category {id}: {err:?}");
            Err(err.into())
        }
    }
}
