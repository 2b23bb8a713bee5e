use actix_web::middleware::from_fn;
use actix_web::{delete, get, post, route, web, HttpResponse};

use crate::auth::require_admin;
use crate::config::AppConfig;
use crate::database::{is_unique_violation, Database, ListingFilter, StoreError};
use crate::error::ApiError;
use crate::handlers::{discard_on_error, public_url};
use crate::models::{
    ApiResponse, CreateListingRequest, Listing, ListingDetail, ListingQuery, MessageResponse,
    NewListingImage, PaginatedResponse, UpdateListingRequest,
};
use crate::slug;
use crate::uploads::{FormData, ListingUploads};
use crate::validation::{
    check_slug, finish, parse_feature_ids, parse_price_ranges, positive_id, validate_with_rules,
    PageRequest,
};

const SLUG_CONSTRAINT: &str = "listings_slug_key";

fn listing_not_found() -> ApiError {
    ApiError::NotFound("Listing not found".into())
}

/// Parses the shared listing filters. Category and location slugs from the query
/// string are carried as-is; unknown values simply match nothing.
pub(crate) fn listing_filter(query: &ListingQuery) -> Result<ListingFilter, ApiError> {
    Ok(ListingFilter {
        category_slug: query.category.clone().filter(|c| !c.trim().is_empty()),
        location_slug: query.location.clone().filter(|l| !l.trim().is_empty()),
        price_ranges: parse_price_ranges(query.price_range.as_deref())?,
        feature_ids: parse_feature_ids(query.features.as_deref())?,
        search: query.search.clone(),
        ..ListingFilter::default()
    })
}

/// The featured image leads with order 0; the others follow in upload order.
fn listing_images(
    config: &AppConfig,
    form: &FormData<ListingUploads>,
    alt: &str,
) -> Result<Vec<NewListingImage>, ApiError> {
    let mut images = Vec::new();
    if let Some(file) = form.file("featuredImage") {
        images.push(NewListingImage {
            url: public_url(config, file)?,
            alt: Some(alt.to_string()),
            is_main: true,
            sort_order: 0,
        });
    }
    for (index, file) in form.files_for("otherImages").enumerate() {
        images.push(NewListingImage {
            url: public_url(config, file)?,
            alt: Some(alt.to_string()),
            is_main: false,
            sort_order: index as i32 + 1,
        });
    }
    Ok(images)
}

async fn load_detail(db: &Database, listing: &Listing) -> Result<ListingDetail, ApiError> {
    db.get_listing_detail(listing.id)
        .await?
        .ok_or_else(listing_not_found)
}

#[get("/listings")]
pub async fn search_listings(
    db: web::Data<Database>,
    query: web::Query<ListingQuery>,
) -> Result<HttpResponse, ApiError> {
    let page = PageRequest::from_query(query.page, query.limit, 10, 100)?;
    let filter = listing_filter(&query)?;

    let (listings, total) = db.search_listings(&filter, page).await.map_err(|err| {
        log::error!("Failed to search listings: {err:?}");
        ApiError::from(err)
    })?;

    Ok(HttpResponse::Ok().json(PaginatedResponse::new(listings, page, total)))
}

#[get("/listings/slug/{slug}")]
pub async fn get_listing_by_slug(
    db: web::Data<Database>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let slug = path.into_inner();
    check_slug("slug", &slug, 1, 500)?;

    let listing = db
        .get_listing_detail_by_slug(&slug)
        .await?
        .ok_or_else(listing_not_found)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(listing)))
}

#[get("/listings/{listing_id}")]
pub async fn get_listing(
    db: web::Data<Database>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let listing_id = positive_id("listingId", path.into_inner())?;

    let listing = db
        .get_listing_detail(listing_id)
        .await?
        .ok_or_else(listing_not_found)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(listing)))
}

// ============================================================================
// ADMIN
// ============================================================================

#[post("/listings", wrap = "from_fn(require_admin)")]
pub async fn create_listing(
    db: web::Data<Database>,
    config: web::Data<AppConfig>,
    form: FormData<ListingUploads>,
) -> Result<HttpResponse, ApiError> {
    let result = create_listing_inner(&db, &config, &form).await;
    let listing = discard_on_error(&form.files, result).await?;

    log::info!("Created listing {} ({})", listing.listing.id, listing.listing.slug);
    Ok(HttpResponse::Created().json(ApiResponse::success(listing)))
}

async fn create_listing_inner(
    db: &Database,
    config: &AppConfig,
    form: &FormData<ListingUploads>,
) -> Result<ListingDetail, ApiError> {
    if config.base_url.is_none() {
        log::error!("Refusing to create listing: BASE_URL is not configured");
        return Err(ApiError::internal("BASE_URL is not configured"));
    }

    let body: CreateListingRequest = form.parse()?;
    validate_with_rules(&body, body.validate_business_rules())?;

    let explicit = body.slug.clone();
    let slug = slug::allocate(db, &body.name, explicit.as_deref(), None).await?;
    let images = listing_images(config, form, &body.name)?;
    let new_listing = body.into_new_listing(slug, images);

    let created = match db.create_listing(new_listing.clone()).await {
        Ok(listing) => listing,
        Err(StoreError::Sqlx(err)) if is_unique_violation(&err, SLUG_CONSTRAINT) => {
            if explicit.is_some() {
                return Err(ApiError::SlugConflict(new_listing.slug));
            }
            log::warn!("Slug '{}' was taken concurrently, allocating again", new_listing.slug);
            let mut retry = new_listing;
            retry.slug = slug::allocate(db, &retry.name, None, None).await?;
            let slug = retry.slug.clone();
            db.create_listing(retry).await.map_err(|err| match err {
                StoreError::Sqlx(err) if is_unique_violation(&err, SLUG_CONSTRAINT) => {
                    ApiError::SlugConflict(slug)
                }
                other => other.into(),
            })?
        }
        Err(err) => return Err(err.into()),
    };

    load_detail(db, &created).await
}

#[route(
    "/listings/{listing_id}",
    method = "PUT",
    method = "PATCH",
    wrap = "from_fn(require_admin)"
)]
pub async fn update_listing(
    db: web::Data<Database>,
    config: web::Data<AppConfig>,
    path: web::Path<i32>,
    form: FormData<ListingUploads>,
) -> Result<HttpResponse, ApiError> {
    let result = update_listing_inner(&db, &config, path.into_inner(), &form).await;
    let listing = discard_on_error(&form.files, result).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(listing)))
}

async fn update_listing_inner(
    db: &Database,
    config: &AppConfig,
    listing_id: i32,
    form: &FormData<ListingUploads>,
) -> Result<ListingDetail, ApiError> {
    let listing_id = positive_id("listingId", listing_id)?;
    let body: UpdateListingRequest = form.parse()?;
    if body.is_empty() && form.files.is_empty() {
        return Err(ApiError::validation(
            "body",
            "At least one field must be provided for update",
        ));
    }
    validate_with_rules(&body, body.validate_business_rules())?;

    let mut existing = db
        .get_listing(listing_id)
        .await?
        .ok_or_else(listing_not_found)?;

    let slug = match body.slug.as_deref() {
        Some(requested) if requested != existing.slug => {
            slug::allocate(db, &existing.name, Some(requested), Some(listing_id)).await?
        }
        _ => existing.slug.clone(),
    };

    body.apply_to_existing(&mut existing);
    existing.slug = slug;
    finish(UpdateListingRequest::merged_coordinate_errors(&existing))?;

    let images = listing_images(config, form, &existing.name)?;
    let children = body.into_children(images);
    let slug = existing.slug.clone();

    let updated = db
        .update_listing(existing, children)
        .await
        .map_err(|err| match err {
            StoreError::Sqlx(err) if is_unique_violation(&err, SLUG_CONSTRAINT) => {
                ApiError::SlugConflict(slug)
            }
            StoreError::Sqlx(sqlx::Error::RowNotFound) => listing_not_found(),
            other => other.into(),
        })?;

    load_detail(db, &updated).await
}

#[delete("/listings/{listing_id}", wrap = "from_fn(require_admin)")]
pub async fn delete_listing(
    db: web::Data<Database>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let listing_id = positive_id("listingId", path.into_inner())?;

    match db.delete_listing(listing_id).await {
        Ok(()) => Ok(HttpResponse::Ok().json(ApiResponse::success(MessageResponse {
            message: "Listing deleted successfully".into(),
        }))),
        Err(sqlx::Error::RowNotFound) => Err(listing_not_found()),
        Err(err) => {
            log::error!("Failed to delete listing {listing_id}: {err:?}");
            Err(err.into())
        }
    }
}
