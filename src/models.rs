use std::collections::HashSet;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use validator::Validate;

use crate::error::FieldError;
use crate::validation::{coerce, PageRequest, SLUG_RE, TIME_RE};

// ============================================================================
// ENUMS
// ============================================================================

/// Account role (Postgres enum `user_role`)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    User,
}

/// Price bracket of a listing (Postgres enum `price_range`)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "price_range", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PriceRange {
    Notsay,
    Inexpensive,
    Moderate,
    Pricey,
    Luxurious,
}

impl PriceRange {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "notsay" => Some(Self::Notsay),
            "inexpensive" => Some(Self::Inexpensive),
            "moderate" => Some(Self::Moderate),
            "pricey" => Some(Self::Pricey),
            "luxurious" => Some(Self::Luxurious),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notsay => "notsay",
            Self::Inexpensive => "inexpensive",
            Self::Moderate => "moderate",
            Self::Pricey => "pricey",
            Self::Luxurious => "luxurious",
        }
    }
}

/// Postgres enum `day_of_week`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "day_of_week", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

fn hhmm<S: Serializer>(time: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error> {
    match time {
        Some(time) => serializer.serialize_str(&time.format("%H:%M").to_string()),
        None => serializer.serialize_none(),
    }
}

fn parse_hhmm(raw: Option<&str>) -> Option<NaiveTime> {
    raw.and_then(|value| NaiveTime::parse_from_str(value, "%H:%M").ok())
}

// ============================================================================
// USERS
// ============================================================================

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub role: Role,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing)]
    pub reset_token: Option<String>,
    #[serde(skip_serializing)]
    pub reset_token_expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

// ============================================================================
// FEATURES & CATEGORIES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub id: i32,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: i32,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub banner_image: Option<String>,
    pub icon: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryWithFeatures {
    #[serde(flatten)]
    pub category: Category,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone)]
pub struct NewCategory {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub banner_image: Option<String>,
    pub icon: Option<String>,
    pub feature_ids: Vec<i32>,
}

// ============================================================================
// LOCATIONS
// ============================================================================

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: i32,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub parent_id: Option<i32>,
    pub featured_image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lightweight projection for selector widgets
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LocationOption {
    pub id: i32,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone)]
pub struct NewLocation {
    pub name: String,
    pub slug: String,
    pub description: String,
    pub parent_id: Option<i32>,
    pub featured_image: Option<String>,
}

// ============================================================================
// LISTINGS
// ============================================================================

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: i32,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub phone: String,
    pub email: Option<String>,
    pub website: String,
    pub rating: Option<f64>,
    pub price_range: Option<PriceRange>,
    pub price_from: Option<f64>,
    pub price_to: Option<f64>,
    pub category_id: i32,
    pub location_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row shape of listing search results
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ListingSummary {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub listing: Listing,
    pub category_name: String,
    pub main_image: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WorkingHour {
    pub id: i32,
    pub listing_id: i32,
    pub day: DayOfWeek,
    pub is_24_hour: bool,
    #[serde(serialize_with = "hhmm")]
    pub opening_time: Option<NaiveTime>,
    #[serde(serialize_with = "hhmm")]
    pub closing_time: Option<NaiveTime>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ListingImage {
    pub id: i32,
    pub listing_id: i32,
    pub url: String,
    pub alt: Option<String>,
    pub is_main: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Faq {
    pub id: i32,
    pub listing_id: i32,
    pub question: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

/// Listing with every related record, as returned by the detail routes
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingDetail {
    #[serde(flatten)]
    pub listing: Listing,
    pub category: Category,
    pub location: Option<Location>,
    pub images: Vec<ListingImage>,
    pub working_hours: Vec<WorkingHour>,
    pub features: Vec<Feature>,
    pub faqs: Vec<Faq>,
}

#[derive(Debug, Clone)]
pub struct NewWorkingHour {
    pub day: DayOfWeek,
    pub is_24_hour: bool,
    pub opening_time: Option<NaiveTime>,
    pub closing_time: Option<NaiveTime>,
}

#[derive(Debug, Clone)]
pub struct NewFaq {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone)]
pub struct NewListingImage {
    pub url: String,
    pub alt: Option<String>,
    pub is_main: bool,
    pub sort_order: i32,
}

/// Listing row plus its children, inserted in one transaction
#[derive(Debug, Clone)]
pub struct NewListing {
    pub slug: String,
    pub name: String,
    pub description: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub phone: String,
    pub email: Option<String>,
    pub website: String,
    pub rating: Option<f64>,
    pub price_range: Option<PriceRange>,
    pub price_from: Option<f64>,
    pub price_to: Option<f64>,
    pub category_id: i32,
    pub location_id: Option<i32>,
    pub working_hours: Vec<NewWorkingHour>,
    pub faqs: Vec<NewFaq>,
    pub feature_ids: Vec<i32>,
    pub images: Vec<NewListingImage>,
}

/// Child-record replacements applied alongside a listing update
#[derive(Debug, Clone, Default)]
pub struct ListingChildren {
    pub working_hours: Option<Vec<NewWorkingHour>>,
    pub faqs: Option<Vec<NewFaq>>,
    pub feature_ids: Option<Vec<i32>>,
    pub new_images: Vec<NewListingImage>,
}

// ============================================================================
// REVIEWS
// ============================================================================

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: i32,
    pub listing_id: i32,
    pub user_id: i32,
    pub rating: i32,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReviewWithUser {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub review: Review,
    pub user_name: String,
}

// ============================================================================
// RESPONSE ENVELOPES
// ============================================================================

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            details: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            details: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: i64,
    pub items_per_page: i64,
    pub total_items: i64,
    pub total_pages: i64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl Pagination {
    pub fn new(request: PageRequest, total_items: i64) -> Self {
        let total_pages = (total_items + request.limit - 1) / request.limit;
        Self {
            current_page: request.page,
            items_per_page: request.limit,
            total_items,
            total_pages,
            has_next_page: request.page < total_pages,
            has_prev_page: request.page > 1,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub success: bool,
    pub data: Vec<T>,
    pub pagination: Pagination,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, request: PageRequest, total_items: i64) -> Self {
        Self {
            success: true,
            data,
            pagination: Pagination::new(request, total_items),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenResponse {
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// ============================================================================
// QUERY DTOs
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Filters shared by the listing search routes
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub price_range: Option<String>,
    pub features: Option<String>,
    pub search: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
}

// ============================================================================
// LISTING REQUESTS
// ============================================================================

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WorkingHourInput {
    pub day: DayOfWeek,
    #[serde(default, deserialize_with = "coerce::opt_bool")]
    pub is_24_hour: Option<bool>,
    #[validate(regex(path = *TIME_RE, message = "Invalid time format (HH:MM)"))]
    pub opening_time: Option<String>,
    #[validate(regex(path = *TIME_RE, message = "Invalid time format (HH:MM)"))]
    pub closing_time: Option<String>,
}

impl WorkingHourInput {
    fn rule_errors(&self, prefix: &str) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.is_24_hour.unwrap_or(false) {
            return errors;
        }

        match (self.opening_time.as_deref(), self.closing_time.as_deref()) {
            (Some(open), Some(close)) => {
                // HH:MM strings compare in clock order once the format check passed.
                if TIME_RE.is_match(open) && TIME_RE.is_match(close) && open >= close {
                    errors.push(FieldError::new(
                        format!("{prefix}.closingTime"),
                        "Closing time must be after opening time",
                    ));
                }
            }
            _ => errors.push(FieldError::new(
                format!("{prefix}.openingTime"),
                "Both times required when not 24h",
            )),
        }
        errors
    }

    fn into_new_working_hour(self) -> NewWorkingHour {
        let is_24_hour = self.is_24_hour.unwrap_or(false);
        NewWorkingHour {
            day: self.day,
            is_24_hour,
            opening_time: parse_hhmm(self.opening_time.as_deref()),
            closing_time: parse_hhmm(self.closing_time.as_deref()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct FaqInput {
    #[validate(length(min = 1, max = 1000))]
    pub question: String,
    #[validate(length(min = 1, max = 5000))]
    pub answer: String,
}

impl FaqInput {
    fn into_new_faq(self) -> NewFaq {
        NewFaq {
            question: self.question,
            answer: self.answer,
        }
    }
}

fn working_hour_rules(hours: Option<&Vec<WorkingHourInput>>) -> Vec<FieldError> {
    let Some(hours) = hours else {
        return Vec::new();
    };

    let mut errors = Vec::new();
    if hours.len() > 7 {
        errors.push(FieldError::new("workingHours", "Cannot have more than 7 days"));
    }

    let mut seen = HashSet::new();
    if !hours.iter().all(|hour| seen.insert(hour.day)) {
        errors.push(FieldError::new("workingHours", "Duplicate days found"));
    }

    for (index, hour) in hours.iter().enumerate() {
        errors.extend(hour.rule_errors(&format!("workingHours.{index}")));
    }
    errors
}

fn coordinate_pair_rule(latitude: Option<f64>, longitude: Option<f64>) -> Vec<FieldError> {
    if latitude.is_some() == longitude.is_some() {
        return Vec::new();
    }
    vec![FieldError::new(
        "latitude",
        "Both latitude and longitude must be provided together, or neither",
    )]
}

/// Listing fields as sent by the admin create form
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateListingRequest {
    #[validate(length(min = 3, max = 255))]
    pub name: String,
    #[validate(
        length(min = 3, max = 500),
        regex(path = *SLUG_RE, message = "Slug can only contain lowercase letters, numbers, and hyphens")
    )]
    pub slug: Option<String>,
    #[validate(length(max = 500))]
    pub description: String,
    #[validate(length(min = 1, max = 255, message = "Address is required"))]
    pub address: Option<String>,
    #[validate(length(max = 255))]
    pub city: Option<String>,
    #[validate(length(max = 6))]
    pub zip: Option<String>,
    #[serde(default, deserialize_with = "coerce::opt_f64")]
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be between -90 and 90"))]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "coerce::opt_f64")]
    #[validate(range(min = -180.0, max = 180.0, message = "Longitude must be between -180 and 180"))]
    pub longitude: Option<f64>,
    #[validate(length(min = 1, max = 64))]
    pub phone: String,
    #[validate(email, length(max = 255))]
    pub email: Option<String>,
    #[validate(url)]
    pub website: String,
    #[serde(default, deserialize_with = "coerce::opt_f64")]
    #[validate(range(min = 0.0, max = 5.0))]
    pub rating: Option<f64>,
    pub price_range: Option<PriceRange>,
    #[serde(default, deserialize_with = "coerce::opt_f64")]
    #[validate(range(min = 0.0))]
    pub price_from: Option<f64>,
    #[serde(default, deserialize_with = "coerce::opt_f64")]
    #[validate(range(exclusive_min = 0.0))]
    pub price_to: Option<f64>,
    #[serde(default, deserialize_with = "coerce::opt_json_list")]
    #[validate(nested)]
    pub working_hours: Option<Vec<WorkingHourInput>>,
    #[serde(deserialize_with = "coerce::i32")]
    #[validate(range(min = 1))]
    pub category_id: i32,
    #[serde(default, deserialize_with = "coerce::opt_id_list")]
    pub features: Option<Vec<i32>>,
    #[serde(default, deserialize_with = "coerce::opt_json_list")]
    #[validate(nested)]
    pub faqs: Option<Vec<FaqInput>>,
    #[serde(default, deserialize_with = "coerce::opt_i32")]
    #[validate(range(min = 1))]
    pub location_id: Option<i32>,
}

impl CreateListingRequest {
    pub fn validate_business_rules(&self) -> Vec<FieldError> {
        let mut errors = working_hour_rules(self.working_hours.as_ref());
        errors.extend(coordinate_pair_rule(self.latitude, self.longitude));
        errors
    }

    pub fn into_new_listing(self, slug: String, images: Vec<NewListingImage>) -> NewListing {
        NewListing {
            slug,
            name: self.name,
            description: self.description,
            address: self.address,
            city: self.city,
            zip: self.zip,
            latitude: self.latitude,
            longitude: self.longitude,
            phone: self.phone,
            email: self.email,
            website: self.website,
            rating: self.rating,
            price_range: self.price_range,
            price_from: self.price_from,
            price_to: self.price_to,
            category_id: self.category_id,
            location_id: self.location_id,
            working_hours: self
                .working_hours
                .unwrap_or_default()
                .into_iter()
                .map(WorkingHourInput::into_new_working_hour)
                .collect(),
            faqs: self
                .faqs
                .unwrap_or_default()
                .into_iter()
                .map(FaqInput::into_new_faq)
                .collect(),
            feature_ids: self.features.unwrap_or_default(),
            images,
        }
    }
}

/// Partial listing update; absent fields keep their stored value
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateListingRequest {
    #[validate(length(min = 3, max = 255))]
    pub name: Option<String>,
    #[validate(
        length(min = 3, max = 500),
        regex(path = *SLUG_RE, message = "Slug can only contain lowercase letters, numbers, and hyphens")
    )]
    pub slug: Option<String>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 255, message = "Address is required"))]
    pub address: Option<String>,
    #[validate(length(max = 255))]
    pub city: Option<String>,
    #[validate(length(max = 6))]
    pub zip: Option<String>,
    #[serde(default, deserialize_with = "coerce::opt_f64")]
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be between -90 and 90"))]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "coerce::opt_f64")]
    #[validate(range(min = -180.0, max = 180.0, message = "Longitude must be between -180 and 180"))]
    pub longitude: Option<f64>,
    #[validate(length(min = 1, max = 64))]
    pub phone: Option<String>,
    #[validate(email, length(max = 255))]
    pub email: Option<String>,
    #[validate(url)]
    pub website: Option<String>,
    #[serde(default, deserialize_with = "coerce::opt_f64")]
    #[validate(range(min = 0.0, max = 5.0))]
    pub rating: Option<f64>,
    pub price_range: Option<PriceRange>,
    #[serde(default, deserialize_with = "coerce::opt_f64")]
    #[validate(range(min = 0.0))]
    pub price_from: Option<f64>,
    #[serde(default, deserialize_with = "coerce::opt_f64")]
    #[validate(range(exclusive_min = 0.0))]
    pub price_to: Option<f64>,
    #[serde(default, deserialize_with = "coerce::opt_json_list")]
    #[validate(nested)]
    pub working_hours: Option<Vec<WorkingHourInput>>,
    #[serde(default, deserialize_with = "coerce::opt_i32")]
    #[validate(range(min = 1))]
    pub category_id: Option<i32>,
    #[serde(default, deserialize_with = "coerce::opt_id_list")]
    pub features: Option<Vec<i32>>,
    #[serde(default, deserialize_with = "coerce::opt_json_list")]
    #[validate(nested)]
    pub faqs: Option<Vec<FaqInput>>,
    #[serde(default, deserialize_with = "coerce::opt_i32")]
    #[validate(range(min = 1))]
    pub location_id: Option<i32>,
}

impl UpdateListingRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.slug.is_none()
            && self.description.is_none()
            && self.address.is_none()
            && self.city.is_none()
            && self.zip.is_none()
            && self.latitude.is_none()
            && self.longitude.is_none()
            && self.phone.is_none()
            && self.email.is_none()
            && self.website.is_none()
            && self.rating.is_none()
            && self.price_range.is_none()
            && self.price_from.is_none()
            && self.price_to.is_none()
            && self.working_hours.is_none()
            && self.category_id.is_none()
            && self.features.is_none()
            && self.faqs.is_none()
            && self.location_id.is_none()
    }

    pub fn validate_business_rules(&self) -> Vec<FieldError> {
        working_hour_rules(self.working_hours.as_ref())
    }

    /// Copies supplied scalars onto `existing`. The slug is resolved by the caller.
    pub fn apply_to_existing(&self, existing: &mut Listing) {
        if let Some(name) = &self.name {
            existing.name = name.clone();
        }
        if let Some(description) = &self.description {
            existing.description = description.clone();
        }
        if self.address.is_some() {
            existing.address = self.address.clone();
        }
        if self.city.is_some() {
            existing.city = self.city.clone();
        }
        if self.zip.is_some() {
            existing.zip = self.zip.clone();
        }
        if self.latitude.is_some() {
            existing.latitude = self.latitude;
        }
        if self.longitude.is_some() {
            existing.longitude = self.longitude;
        }
        if let Some(phone) = &self.phone {
            existing.phone = phone.clone();
        }
        if self.email.is_some() {
            existing.email = self.email.clone();
        }
        if let Some(website) = &self.website {
            existing.website = website.clone();
        }
        if self.rating.is_some() {
            existing.rating = self.rating;
        }
        if self.price_range.is_some() {
            existing.price_range = self.price_range;
        }
        if self.price_from.is_some() {
            existing.price_from = self.price_from;
        }
        if self.price_to.is_some() {
            existing.price_to = self.price_to;
        }
        if let Some(category_id) = self.category_id {
            existing.category_id = category_id;
        }
        if self.location_id.is_some() {
            existing.location_id = self.location_id;
        }
        existing.updated_at = Utc::now();
    }

    pub fn merged_coordinate_errors(existing: &Listing) -> Vec<FieldError> {
        coordinate_pair_rule(existing.latitude, existing.longitude)
    }

    pub fn into_children(self, new_images: Vec<NewListingImage>) -> ListingChildren {
        ListingChildren {
            working_hours: self.working_hours.map(|hours| {
                hours
                    .into_iter()
                    .map(WorkingHourInput::into_new_working_hour)
                    .collect()
            }),
            faqs: self
                .faqs
                .map(|faqs| faqs.into_iter().map(FaqInput::into_new_faq).collect()),
            feature_ids: self.features,
            new_images,
        }
    }
}

// ============================================================================
// CATEGORY / LOCATION / FEATURE REQUESTS
// ============================================================================

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCategoryRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(
        length(min = 1, max = 500),
        regex(path = *SLUG_RE, message = "Slug must contain only lowercase letters, numbers, and hyphens")
    )]
    pub slug: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    #[validate(length(max = 255))]
    pub icon: Option<String>,
    #[serde(default, deserialize_with = "coerce::opt_id_list")]
    pub feature_ids: Option<Vec<i32>>,
}

impl CreateCategoryRequest {
    pub fn into_new_category(self, banner_image: Option<String>) -> NewCategory {
        NewCategory {
            name: self.name,
            slug: self.slug,
            description: self.description.map(|d| d.trim().to_string()),
            banner_image,
            icon: self.icon,
            feature_ids: self.feature_ids.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCategoryRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(
        length(min = 1, max = 500),
        regex(path = *SLUG_RE, message = "Slug must contain only lowercase letters, numbers, and hyphens")
    )]
    pub slug: Option<String>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    #[validate(length(max = 255))]
    pub icon: Option<String>,
    #[serde(default, deserialize_with = "coerce::opt_id_list")]
    pub feature_ids: Option<Vec<i32>>,
}

impl UpdateCategoryRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.slug.is_none()
            && self.description.is_none()
            && self.icon.is_none()
            && self.feature_ids.is_none()
    }

    pub fn apply_to_existing(&self, existing: &mut Category, banner_image: Option<String>) {
        if let Some(name) = &self.name {
            existing.name = name.clone();
        }
        if let Some(slug) = &self.slug {
            existing.slug = slug.clone();
        }
        if let Some(description) = &self.description {
            existing.description = Some(description.trim().to_string());
        }
        if self.icon.is_some() {
            existing.icon = self.icon.clone();
        }
        if banner_image.is_some() {
            existing.banner_image = banner_image;
        }
        existing.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateLocationRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(
        length(min = 1, max = 500),
        regex(path = *SLUG_RE, message = "Slug must contain only lowercase letters, numbers, and hyphens")
    )]
    pub slug: String,
    #[validate(length(max = 500))]
    pub description: String,
    #[serde(default, deserialize_with = "coerce::opt_i32")]
    #[validate(range(min = 1))]
    pub parent: Option<i32>,
}

impl CreateLocationRequest {
    pub fn into_new_location(self, featured_image: Option<String>) -> NewLocation {
        NewLocation {
            name: self.name,
            slug: self.slug,
            description: self.description,
            parent_id: self.parent,
            featured_image,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLocationRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(
        length(min = 1, max = 500),
        regex(path = *SLUG_RE, message = "Slug must contain only lowercase letters, numbers, and hyphens")
    )]
    pub slug: Option<String>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "coerce::opt_i32")]
    #[validate(range(min = 1))]
    pub parent: Option<i32>,
}

impl UpdateLocationRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.slug.is_none() && self.description.is_none() && self.parent.is_none()
    }

    pub fn apply_to_existing(&self, existing: &mut Location, featured_image: Option<String>) {
        if let Some(name) = &self.name {
            existing.name = name.clone();
        }
        if let Some(slug) = &self.slug {
            existing.slug = slug.clone();
        }
        if let Some(description) = &self.description {
            existing.description = description.clone();
        }
        if self.parent.is_some() {
            existing.parent_id = self.parent;
        }
        if featured_image.is_some() {
            existing.featured_image = featured_image;
        }
        existing.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateFeatureRequest {
    #[validate(length(min = 2, max = 50))]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateFeatureRequest {
    #[validate(length(min = 2, max = 50))]
    pub name: Option<String>,
}

// ============================================================================
// REVIEW & AUTH REQUESTS
// ============================================================================

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateReviewRequest {
    #[serde(deserialize_with = "coerce::i32")]
    #[validate(range(min = 1))]
    pub listing_id: i32,
    #[serde(deserialize_with = "coerce::i32")]
    #[validate(range(min = 1, max = 5))]
    pub rating: i32,
    #[validate(length(min = 3, max = 500))]
    pub comment: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email, length(max = 255))]
    pub email: String,
    #[validate(length(min = 6, max = 128))]
    pub password: String,
}

impl RegisterRequest {
    pub fn into_new_user(self, password_hash: String) -> NewUser {
        NewUser {
            name: self.name,
            email: self.email.trim().to_lowercase(),
            password_hash,
            role: Role::User,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email, length(max = 255))]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email, length(max = 255))]
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1))]
    pub token: String,
    #[validate(length(min = 6, max = 128))]
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::field_errors;
    use serde_json::json;

    fn listing_body() -> serde_json::Value {
        json!({
            "name": "Dal Lake Houseboat",
            "description": "Floating stay",
            "phone": "+91 9000000000",
            "website": "https://example.com",
            "categoryId": "3",
        })
    }

    fn rule_messages(request: &CreateListingRequest) -> Vec<String> {
        let mut errors = field_errors(request);
        errors.extend(request.validate_business_rules());
        errors.into_iter().map(|e| e.message).collect()
    }

    #[test]
    fn duplicate_working_days_are_rejected() {
        let mut body = listing_body();
        body["workingHours"] = json!([
            { "day": "monday", "is24Hour": true },
            { "day": "monday", "openingTime": "09:00", "closingTime": "17:00" },
        ]);
        let request: CreateListingRequest = serde_json::from_value(body).unwrap();

        assert!(rule_messages(&request).contains(&"Duplicate days found".to_string()));
    }

    #[test]
    fn closing_must_follow_opening_unless_open_all_day() {
        let mut body = listing_body();
        body["workingHours"] = json!(
            "[{\"day\":\"friday\",\"openingTime\":\"18:00\",\"closingTime\":\"09:00\"},{\"day\":\"saturday\",\"is24Hour\":\"true\"}]"
        );
        let request: CreateListingRequest = serde_json::from_value(body).unwrap();
        let errors = request.validate_business_rules();

        assert_eq!(
            errors,
            vec![FieldError::new(
                "workingHours.0.closingTime",
                "Closing time must be after opening time"
            )]
        );
    }

    #[test]
    fn equal_times_are_rejected() {
        let mut body = listing_body();
        body["workingHours"] =
            json!([{ "day": "sunday", "openingTime": "10:00", "closingTime": "10:00" }]);
        let request: CreateListingRequest = serde_json::from_value(body).unwrap();

        assert_eq!(request.validate_business_rules().len(), 1);
    }

    #[test]
    fn missing_times_require_24_hour_flag() {
        let mut body = listing_body();
        body["workingHours"] = json!([{ "day": "tuesday", "openingTime": "10:00" }]);
        let request: CreateListingRequest = serde_json::from_value(body).unwrap();

        assert_eq!(
            request.validate_business_rules(),
            vec![FieldError::new("workingHours.0.openingTime", "Both times required when not 24h")]
        );
    }

    #[test]
    fn malformed_times_report_nested_paths() {
        let mut body = listing_body();
        body["workingHours"] =
            json!([{ "day": "monday", "openingTime": "9am", "closingTime": "17:00" }]);
        let request: CreateListingRequest = serde_json::from_value(body).unwrap();
        let errors = field_errors(&request);

        assert_eq!(errors[0].field, "workingHours.0.openingTime");
        assert_eq!(errors[0].message, "Invalid time format (HH:MM)");
    }

    #[test]
    fn coordinates_must_come_in_pairs() {
        let mut body = listing_body();
        body["latitude"] = json!("34.1");
        let request: CreateListingRequest = serde_json::from_value(body).unwrap();

        assert!(rule_messages(&request)
            .contains(&"Both latitude and longitude must be provided together, or neither".into()));
    }

    #[test]
    fn uppercase_slug_fails_field_validation() {
        let mut body = listing_body();
        body["slug"] = json!("Dal-Lake");
        let request: CreateListingRequest = serde_json::from_value(body).unwrap();

        let errors = field_errors(&request);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "slug");
    }

    #[test]
    fn into_new_listing_converts_children() {
        let mut body = listing_body();
        body["workingHours"] =
            json!([{ "day": "monday", "openingTime": "09:30", "closingTime": "17:00" }]);
        body["faqs"] = json!([{ "question": "Parking?", "answer": "Yes" }]);
        body["features"] = json!(["1", 2]);
        let request: CreateListingRequest = serde_json::from_value(body).unwrap();
        let listing = request.into_new_listing("dal-lake-houseboat".into(), Vec::new());

        assert_eq!(listing.category_id, 3);
        assert_eq!(listing.feature_ids, vec![1, 2]);
        assert_eq!(listing.faqs.len(), 1);
        assert_eq!(
            listing.working_hours[0].opening_time,
            NaiveTime::from_hms_opt(9, 30, 0)
        );
        assert!(!listing.working_hours[0].is_24_hour);
    }

    #[test]
    fn empty_update_is_detected() {
        assert!(UpdateListingRequest::default().is_empty());
        let update = UpdateListingRequest {
            rating: Some(4.5),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }

    #[test]
    fn pagination_reports_page_bounds() {
        let request = PageRequest { page: 2, limit: 5 };
        let pagination = Pagination::new(request, 7);

        assert_eq!(pagination.total_pages, 2);
        assert!(!pagination.has_next_page);
        assert!(pagination.has_prev_page);

        let empty = Pagination::new(PageRequest { page: 1, limit: 10 }, 0);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next_page);
    }

    #[test]
    fn working_hours_serialize_as_clock_strings() {
        let hour = WorkingHour {
            id: 1,
            listing_id: 1,
            day: DayOfWeek::Monday,
            is_24_hour: false,
            opening_time: NaiveTime::from_hms_opt(9, 0, 0),
            closing_time: None,
        };
        let value = serde_json::to_value(hour).unwrap();

        assert_eq!(value["openingTime"], "09:00");
        assert_eq!(value["is24Hour"], false);
        assert!(value["closingTime"].is_null());
    }

    #[test]
    fn user_secrets_are_not_serialized() {
        let user = User {
            id: 1,
            name: "Asha".into(),
            email: "asha@example.com".into(),
            password: "hash".into(),
            role: Role::Admin,
            refresh_token: Some("token".into()),
            reset_token: None,
            reset_token_expiry: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let value = serde_json::to_value(user).unwrap();

        assert_eq!(value["role"], "ADMIN");
        assert!(value.get("password").is_none());
        assert!(value.get("refreshToken").is_none());
    }

    #[test]
    fn overlong_emails_are_rejected() {
        let email = format!("{}@example.com", "a".repeat(250));
        let register = RegisterRequest {
            name: "Asha".into(),
            email: email.clone(),
            password: "secret123".into(),
        };
        let mut listing = listing_body();
        listing["email"] = json!(email);
        let listing: CreateListingRequest = serde_json::from_value(listing).unwrap();

        for errors in [field_errors(&register), field_errors(&listing)] {
            assert!(errors.iter().any(|e| e.field == "email"), "{errors:?}");
        }
        let login = LoginRequest { email, password: "x".into() };
        assert!(field_errors(&login).iter().any(|e| e.field == "email"));
    }
}
