use actix_web::middleware::from_fn;
use actix_web::{get, post, web, HttpResponse};

use crate::auth::{require_auth, AuthUser};
use crate::database::{is_foreign_key_violation, is_unique_violation, Database};
use crate::error::ApiError;
use crate::models::{ApiResponse, CreateReviewRequest, PageQuery, PaginatedResponse};
use crate::validation::{positive_id, validate_input, PageRequest};

fn listing_not_found() -> ApiError {
    ApiError::NotFound("Listing not found".into())
}

fn already_reviewed() -> ApiError {
    ApiError::Conflict("You have already reviewed this listing".into())
}

#[get("/listings/{listing_id}/reviews")]
pub async fn list_listing_reviews(
    db: web::Data<Database>,
    path: web::Path<i32>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let listing_id = positive_id("listingId", path.into_inner())?;
    let page = PageRequest::from_query(query.page, query.limit, 10, 100)?;

    if !db.listing_exists(listing_id).await? {
        return Err(listing_not_found());
    }

    let (reviews, total) = db.list_reviews(listing_id, page).await?;
    Ok(HttpResponse::Ok().json(PaginatedResponse::new(reviews, page, total)))
}

/// One review per user and listing; the unique index settles concurrent submissions.
#[post("/reviews", wrap = "from_fn(require_auth)")]
pub async fn create_review(
    db: web::Data<Database>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<CreateReviewRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validate_input(&body)?;

    if !db.listing_exists(body.listing_id).await? {
        return Err(listing_not_found());
    }
    if db.has_reviewed(body.listing_id, auth.id).await? {
        return Err(already_reviewed());
    }

    let review = db
        .create_review(body.listing_id, auth.id, body.rating, body.comment.trim())
        .await
        .map_err(|err| {
            if is_unique_violation(&err, "reviews_listing_user_key") {
                already_reviewed()
            } else if is_foreign_key_violation(&err) {
                listing_not_found()
            } else {
                log::error!("Failed to create review: {err:?}");
                err.into()
            }
        })?;

    log::info!("User {} reviewed listing {}", auth.id, body.listing_id);
    Ok(HttpResponse::Created().json(ApiResponse::success(review)))
}
