pub mod auth;
pub mod categories;
pub mod features;
pub mod listings;
pub mod locations;
pub mod reviews;
pub mod system;
pub mod users;

use actix_web::error::{JsonPayloadError, PathError, QueryPayloadError};
use actix_web::{web, HttpRequest, HttpResponse};

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::models::ApiResponse;
use crate::uploads::{self, StoredFile};

/// Registers every route. `/api/admin` precedes `/api` so the broader prefix cannot shadow it.
/// Admin handlers carry their own `require_admin` guard, so unmatched admin paths still 404.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
        .app_data(web::QueryConfig::default().error_handler(query_error))
        .app_data(web::PathConfig::default().error_handler(path_error))
        .service(system::welcome)
        .service(system::health_check)
        .service(
            web::scope("/auth")
                .service(auth::register)
                .service(auth::login)
                .service(auth::refresh)
                .service(auth::logout)
                .service(auth::forgot_password)
                .service(auth::reset_password),
        )
        .service(
            web::scope("/api/admin")
                .service(categories::create_category)
                .service(categories::update_category)
                .service(categories::delete_category)
                .service(locations::create_location)
                .service(locations::update_location)
                .service(locations::delete_location)
                .service(listings::create_listing)
                .service(listings::update_listing)
                .service(listings::delete_listing)
                .service(features::create_feature)
                .service(features::update_feature)
                .service(features::delete_feature),
        )
        .service(
            web::scope("/api")
                .service(users::current_user)
                // Categories
                .service(categories::list_categories)
                .service(categories::get_category)
                .service(categories::get_category_features)
                .service(categories::get_category_listings)
                // Locations (options before the id route)
                .service(locations::location_options)
                .service(locations::list_locations)
                .service(locations::get_location)
                .service(locations::get_location_listings)
                // Listings
                .service(listings::search_listings)
                .service(listings::get_listing_by_slug)
                .service(listings::get_listing)
                .service(reviews::list_listing_reviews)
                // Features
                .service(features::list_features)
                .service(features::get_feature)
                // Reviews
                .service(reviews::create_review),
        )
        .default_service(web::to(not_found));
}

pub async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(ApiResponse::<()>::error("Resource not found".into()))
}

/// Removes the request's stored uploads when the handler failed.
pub(crate) async fn discard_on_error<T>(
    files: &[StoredFile],
    result: Result<T, ApiError>,
) -> Result<T, ApiError> {
    if result.is_err() && !files.is_empty() {
        uploads::discard(files).await;
    }
    result
}

pub(crate) fn public_url(config: &AppConfig, file: &StoredFile) -> Result<String, ApiError> {
    let base_url = config.base_url.as_deref().ok_or_else(|| {
        log::error!("BASE_URL is not configured; cannot build a public URL for {}", file.file_name);
        ApiError::internal("BASE_URL is not configured")
    })?;
    Ok(file.public_url(base_url))
}

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::validation("body", err.to_string()).into()
}

fn query_error(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::validation("query", err.to_string()).into()
}

fn path_error(err: PathError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::validation("params", err.to_string()).into()
}
