//! End-to-end checks against a real Postgres. Set `TEST_DATABASE_URL` to run them;
//! without it every test returns early.

use std::path::PathBuf;
use std::sync::Arc;

use actix_web::cookie::Cookie;
use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App};
use async_trait::async_trait;
use chrono::Duration;
use serde_json::{json, Value};

use travel_listings_api::auth::TokenService;
use travel_listings_api::clients::mailer::{MailError, Mailer, OutgoingEmail};
use travel_listings_api::config::AppConfig;
use travel_listings_api::database::{self, Database};
use travel_listings_api::handlers;

struct NullMailer;

#[async_trait]
impl Mailer for NullMailer {
    async fn send(&self, _email: OutgoingEmail) -> Result<(), MailError> {
        Ok(())
    }
}

struct Harness {
    db: web::Data<Database>,
    tokens: web::Data<TokenService>,
    config: web::Data<AppConfig>,
    suffix: String,
}

async fn harness() -> Option<Harness> {
    harness_with_uploads(std::env::temp_dir().join("travel-listings-api-tests")).await
}

async fn harness_with_uploads(upload_dir: PathBuf) -> Option<Harness> {
    let Ok(database_url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return None;
    };

    let db = Database::connect(&database_url).await.expect("connect test database");
    let config = AppConfig {
        host: "127.0.0.1".into(),
        port: 0,
        database_url,
        base_url: Some("http://localhost:5000".into()),
        upload_dir,
        jwt_secret: "integration-access".into(),
        refresh_token_secret: "integration-refresh".into(),
        access_token_ttl: Duration::minutes(15),
        refresh_token_ttl: Duration::days(7),
        frontend_url: "http://localhost:3000".into(),
        environment: "test".into(),
        smtp_host: "localhost".into(),
        smtp_port: 1025,
        mail_from: "Travel Listings <no-reply@localhost>".into(),
    };

    Some(Harness {
        tokens: web::Data::new(TokenService::from_config(&config)),
        db: web::Data::new(db),
        config: web::Data::new(config),
        suffix: format!("{:08x}", rand::random::<u32>()),
    })
}

macro_rules! app {
    ($h:expr) => {{
        let mailer: Arc<dyn Mailer> = Arc::new(NullMailer);
        test::init_service(
            App::new()
                .app_data($h.config.clone())
                .app_data($h.db.clone())
                .app_data($h.tokens.clone())
                .app_data(web::Data::from(mailer))
                .configure(handlers::configure),
        )
        .await
    }};
}

async fn admin_token(h: &Harness) -> String {
    let id: i32 = sqlx::query_scalar(
        "INSERT INTO users (name, email, password, role) VALUES ($1, $2, 'x', 'ADMIN') RETURNING id",
    )
    .bind("Admin")
    .bind(format!("admin-{}@example.com", h.suffix))
    .fetch_one(h.db.pool())
    .await
    .expect("insert admin");

    h.tokens.access_token(id).expect("sign admin token")
}

/// Status and JSON body. Guard middleware rejects with an `Err`, which is rendered here
/// the way the server would.
macro_rules! send {
    ($app:expr, $req:expr) => {{
        let res = match test::try_call_service($app, $req.to_request()).await {
            Ok(res) => res.into_parts().1.map_into_boxed_body(),
            Err(err) => err.error_response(),
        };
        let status = res.status();
        let body = actix_web::body::to_bytes(res.into_body()).await.unwrap_or_default();
        (status, serde_json::from_slice::<Value>(&body).unwrap_or(Value::Null))
    }};
}

fn bearer(token: &str) -> (header::HeaderName, String) {
    (header::AUTHORIZATION, format!("Bearer {token}"))
}

macro_rules! seed_category {
    ($app:expr, $token:expr, $slug:expr) => {{
        let (status, body) = send!(
            $app,
            test::TestRequest::post()
                .uri("/api/admin/categories")
                .insert_header(bearer($token))
                .set_json(json!({ "name": "Hotels", "slug": $slug }))
        );
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["id"].as_i64().unwrap() as i32
    }};
}

#[actix_rt::test]
async fn register_login_and_fetch_profile() {
    let Some(h) = harness().await else { return };
    let app = app!(h);
    let email = format!("traveller-{}@example.com", h.suffix);

    let (status, body) = send!(
        &app,
        test::TestRequest::post()
            .uri("/auth/register")
            .set_json(json!({ "name": "Traveller", "email": email, "password": "secret123" }))
    );
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["data"]["accessToken"].is_string());

    let (status, body) = send!(
        &app,
        test::TestRequest::post()
            .uri("/auth/register")
            .set_json(json!({ "name": "Again", "email": email, "password": "secret123" }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "User already exists");

    let (status, body) = send!(
        &app,
        test::TestRequest::post()
            .uri("/auth/login")
            .set_json(json!({ "email": email, "password": "wrong-password" }))
    );
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid credentials");

    let (status, body) = send!(
        &app,
        test::TestRequest::post()
            .uri("/auth/login")
            .set_json(json!({ "email": email, "password": "secret123" }))
    );
    assert_eq!(status, StatusCode::OK);
    let token = body["data"]["accessToken"].as_str().unwrap().to_string();

    let (status, body) = send!(
        &app,
        test::TestRequest::get().uri("/api/user").insert_header(bearer(&token))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], email);
    assert!(body["data"].get("password").is_none());
}

#[actix_rt::test]
async fn non_admins_cannot_use_admin_routes() {
    let Some(h) = harness().await else { return };
    let app = app!(h);

    let (_, body) = send!(
        &app,
        test::TestRequest::post().uri("/auth/register").set_json(json!({
            "name": "Plain",
            "email": format!("plain-{}@example.com", h.suffix),
            "password": "secret123"
        }))
    );
    let token = body["data"]["accessToken"].as_str().unwrap().to_string();

    let (status, body) = send!(
        &app,
        test::TestRequest::post()
            .uri("/api/admin/features")
            .insert_header(bearer(&token))
            .set_json(json!({ "name": "Pool" }))
    );
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Admin access required");
}

#[actix_rt::test]
async fn listing_lifecycle_with_children_and_reviews() {
    let Some(h) = harness().await else { return };
    let app = app!(h);
    let admin = admin_token(&h).await;
    let category_slug = format!("stays-{}", h.suffix);
    let category_id = seed_category!(&app, &admin, &category_slug);

    let (status, body) = send!(
        &app,
        test::TestRequest::post()
            .uri("/api/admin/features")
            .insert_header(bearer(&admin))
            .set_json(json!({ "name": format!("Wifi {}", h.suffix) }))
    );
    assert_eq!(status, StatusCode::CREATED);
    let feature_id = body["data"]["id"].as_i64().unwrap();

    let name = format!("Lake View {}", h.suffix);
    let (status, body) = send!(
        &app,
        test::TestRequest::post()
            .uri("/api/admin/listings")
            .insert_header(bearer(&admin))
            .set_json(json!({
                "name": name,
                "description": "Houseboat on the lake",
                "address": "Boulevard Road",
                "phone": "+91 0000000",
                "website": "https://example.com",
                "priceRange": "moderate",
                "categoryId": category_id,
                "features": [feature_id],
                "workingHours": [
                    { "day": "monday", "is24Hour": false, "openingTime": "09:00", "closingTime": "17:00" },
                    { "day": "sunday", "is24Hour": true }
                ],
                "faqs": [{ "question": "Is breakfast included?", "answer": "Yes, every day." }]
            }))
    );
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let listing = &body["data"];
    let listing_id = listing["id"].as_i64().unwrap();
    let slug = listing["slug"].as_str().unwrap().to_string();
    assert_eq!(slug, format!("lake-view-{}", h.suffix));
    assert_eq!(listing["workingHours"].as_array().unwrap().len(), 2);
    assert_eq!(listing["faqs"].as_array().unwrap().len(), 1);
    assert_eq!(listing["features"][0]["id"].as_i64(), Some(feature_id));
    assert_eq!(listing["category"]["slug"], category_slug);

    // Same title again gets the next free suffix.
    let (status, body) = send!(
        &app,
        test::TestRequest::post()
            .uri("/api/admin/listings")
            .insert_header(bearer(&admin))
            .set_json(json!({
                "name": name,
                "description": "Second houseboat",
                "address": "Boulevard Road",
                "phone": "+91 0000001",
                "website": "https://example.com",
                "categoryId": category_id
            }))
    );
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["slug"], format!("{slug}-1"));

    let (status, body) = send!(
        &app,
        test::TestRequest::get().uri(&format!("/api/listings/slug/{slug}"))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"].as_i64(), Some(listing_id));

    let (status, body) = send!(
        &app,
        test::TestRequest::get().uri(&format!(
            "/api/categories/{category_slug}/listings?priceRange=moderate&features={feature_id}"
        ))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["totalItems"], 1);
    assert_eq!(body["data"][0]["id"].as_i64(), Some(listing_id));

    let (status, body) = send!(
        &app,
        test::TestRequest::patch()
            .uri(&format!("/api/admin/listings/{listing_id}"))
            .insert_header(bearer(&admin))
            .set_json(json!({ "faqs": [] , "rating": 4.5 }))
    );
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["faqs"].as_array().unwrap().len(), 0);
    assert_eq!(body["data"]["workingHours"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["rating"], 4.5);

    let (_, body) = send!(
        &app,
        test::TestRequest::post().uri("/auth/register").set_json(json!({
            "name": "Reviewer",
            "email": format!("reviewer-{}@example.com", h.suffix),
            "password": "secret123"
        }))
    );
    let reviewer = body["data"]["accessToken"].as_str().unwrap().to_string();

    let review = json!({ "listingId": listing_id, "rating": 5, "comment": "Wonderful stay" });
    let (status, _) = send!(
        &app,
        test::TestRequest::post()
            .uri("/api/reviews")
            .insert_header(bearer(&reviewer))
            .set_json(review.clone())
    );
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send!(
        &app,
        test::TestRequest::post()
            .uri("/api/reviews")
            .insert_header(bearer(&reviewer))
            .set_json(review)
    );
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "You have already reviewed this listing");

    let (status, body) = send!(
        &app,
        test::TestRequest::get().uri(&format!("/api/listings/{listing_id}/reviews"))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["userName"], "Reviewer");

    let (status, _) = send!(
        &app,
        test::TestRequest::delete()
            .uri(&format!("/api/admin/listings/{listing_id}"))
            .insert_header(bearer(&admin))
    );
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send!(&app, test::TestRequest::get().uri(&format!("/api/listings/{listing_id}")));
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn explicit_slug_conflict_writes_nothing() {
    let Some(h) = harness().await else { return };
    let app = app!(h);
    let admin = admin_token(&h).await;
    let category_id = seed_category!(&app, &admin, format!("conflicts-{}", h.suffix));
    let slug = format!("taken-{}", h.suffix);

    let listing = |phone: &str| {
        json!({
            "name": "Taken Place",
            "slug": slug,
            "description": "First",
            "address": "Somewhere",
            "phone": phone,
            "website": "https://example.com",
            "categoryId": category_id,
            "faqs": [{ "question": "Parking available?", "answer": "Street only." }]
        })
    };

    let (status, _) = send!(
        &app,
        test::TestRequest::post()
            .uri("/api/admin/listings")
            .insert_header(bearer(&admin))
            .set_json(listing("1"))
    );
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send!(
        &app,
        test::TestRequest::post()
            .uri("/api/admin/listings")
            .insert_header(bearer(&admin))
            .set_json(listing("2"))
    );
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["details"][0]["field"], "slug");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM listings WHERE category_id = $1")
        .bind(category_id)
        .fetch_one(h.db.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[actix_rt::test]
async fn unknown_category_is_rejected_without_writes() {
    let Some(h) = harness().await else { return };
    let app = app!(h);
    let admin = admin_token(&h).await;

    let (status, body) = send!(
        &app,
        test::TestRequest::post()
            .uri("/api/admin/listings")
            .insert_header(bearer(&admin))
            .set_json(json!({
                "name": format!("Orphan {}", h.suffix),
                "description": "No category",
                "address": "Nowhere",
                "phone": "1",
                "website": "https://example.com",
                "categoryId": i32::MAX
            }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid category ID: Category does not exist");
}

#[actix_rt::test]
async fn pages_past_the_end_are_empty() {
    let Some(h) = harness().await else { return };
    let app = app!(h);

    let (status, body) = send!(&app, test::TestRequest::get().uri("/api/listings?page=100000&limit=100"));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
    assert_eq!(body["pagination"]["currentPage"], 100000);
    assert_eq!(body["pagination"]["hasNextPage"], false);
}

#[actix_rt::test]
async fn repeated_reads_are_identical() {
    let Some(h) = harness().await else { return };
    let app = app!(h);
    let admin = admin_token(&h).await;
    let category_id = seed_category!(&app, &admin, format!("stable-{}", h.suffix));
    let uri = format!("/api/categories/{category_id}");

    let first = test::call_service(&app, test::TestRequest::get().uri(&uri).to_request()).await;
    let first = test::read_body(first).await;
    let second = test::call_service(&app, test::TestRequest::get().uri(&uri).to_request()).await;
    let second = test::read_body(second).await;

    assert_eq!(first, second);
}

async fn user_id_for(email: &str, h: &Harness) -> i32 {
    sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
        .bind(email)
        .fetch_one(h.db.pool())
        .await
        .expect("registered user")
}

/// Access tokens from this service are already expired; secrets match the harness.
fn expired_access(refresh_ttl: Duration) -> TokenService {
    TokenService::new(
        "integration-access",
        "integration-refresh",
        Duration::seconds(-60),
        refresh_ttl,
    )
}

#[actix_rt::test]
async fn expired_access_token_is_renewed_from_the_stored_refresh_token() {
    let Some(h) = harness().await else { return };
    let app = app!(h);
    let email = format!("renew-{}@example.com", h.suffix);

    let (status, _) = send!(
        &app,
        test::TestRequest::post()
            .uri("/auth/register")
            .set_json(json!({ "name": "Renew", "email": email, "password": "secret123" }))
    );
    assert_eq!(status, StatusCode::CREATED);
    let user_id = user_id_for(&email, &h).await;
    let stored: String = sqlx::query_scalar("SELECT refresh_token FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(h.db.pool())
        .await
        .unwrap();

    let expired = expired_access(Duration::days(7)).access_token(user_id).unwrap();
    let res = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/api/user")
            .insert_header(bearer(&expired))
            .cookie(Cookie::new("refreshToken", stored))
            .to_request(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    let renewed = res
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .expect("renewed token header")
        .to_string();
    assert_eq!(h.tokens.verify_access(&renewed).unwrap().user_id, user_id);

    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["data"]["email"], email);
}

#[actix_rt::test]
async fn refresh_cookie_that_differs_from_the_stored_one_is_forbidden() {
    let Some(h) = harness().await else { return };
    let app = app!(h);
    let email = format!("mismatch-{}@example.com", h.suffix);

    let (status, _) = send!(
        &app,
        test::TestRequest::post()
            .uri("/auth/register")
            .set_json(json!({ "name": "Mismatch", "email": email, "password": "secret123" }))
    );
    assert_eq!(status, StatusCode::CREATED);
    let user_id = user_id_for(&email, &h).await;

    // Validly signed, but not the token the user was issued.
    let issuer = expired_access(Duration::days(8));
    let expired = issuer.access_token(user_id).unwrap();
    let other_refresh = issuer.refresh_token(user_id).unwrap();

    let (status, body) = send!(
        &app,
        test::TestRequest::get()
            .uri("/api/user")
            .insert_header(bearer(&expired))
            .cookie(Cookie::new("refreshToken", other_refresh))
    );
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Invalid refresh token");
}

#[actix_rt::test]
async fn admin_creates_location_with_requested_slug() {
    let Some(h) = harness().await else { return };
    let app = app!(h);
    let admin = admin_token(&h).await;
    sqlx::query("DELETE FROM locations WHERE slug = 'pahalgam'")
        .execute(h.db.pool())
        .await
        .unwrap();

    let (status, body) = send!(
        &app,
        test::TestRequest::post()
            .uri("/api/admin/locations")
            .insert_header(bearer(&admin))
            .set_json(json!({ "name": "Pahalgam", "slug": "pahalgam", "description": "Hill station" }))
    );
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["slug"], "pahalgam");
    assert_eq!(body["data"]["name"], "Pahalgam");
}

#[actix_rt::test]
async fn second_page_of_category_listings_holds_the_remainder() {
    let Some(h) = harness().await else { return };
    let app = app!(h);
    let admin = admin_token(&h).await;
    let category_slug = format!("paged-{}", h.suffix);
    let category_id = seed_category!(&app, &admin, &category_slug);

    for n in 0..7 {
        let (status, body) = send!(
            &app,
            test::TestRequest::post()
                .uri("/api/admin/listings")
                .insert_header(bearer(&admin))
                .set_json(json!({
                    "name": format!("Paged {n} {}", h.suffix),
                    "description": "Counted stay",
                    "address": "Main Street",
                    "phone": format!("{n}"),
                    "website": "https://example.com",
                    "categoryId": category_id
                }))
        );
        assert_eq!(status, StatusCode::CREATED, "{body}");
    }

    let (status, body) = send!(
        &app,
        test::TestRequest::get().uri(&format!("/api/categories/{category_slug}/listings?page=2&limit=5"))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["pagination"]["totalPages"], 2);
    assert_eq!(body["pagination"]["hasNextPage"], false);
}

#[actix_rt::test]
async fn rejected_multipart_listing_leaves_no_files_behind() {
    let uploads = tempfile::tempdir().unwrap();
    let Some(h) = harness_with_uploads(uploads.path().to_path_buf()).await else { return };
    let app = app!(h);
    let admin = admin_token(&h).await;

    let boundary = "travel-listings-boundary";
    let mut body = Vec::new();
    for (name, value) in [
        ("name", format!("Ghost {}", h.suffix)),
        ("description", "Never saved".to_string()),
        ("address", "Nowhere".to_string()),
        ("phone", "1".to_string()),
        ("website", "https://example.com".to_string()),
        ("categoryId", i32::MAX.to_string()),
    ] {
        body.extend_from_slice(
            format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"featuredImage\"; filename=\"front.png\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"not-really-a-png");
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let (status, json) = send!(
        &app,
        test::TestRequest::post()
            .uri("/api/admin/listings")
            .insert_header(bearer(&admin))
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            ))
            .set_payload(body)
    );
    assert_eq!(status, StatusCode::BAD_REQUEST, "{json}");
    assert_eq!(json["error"], "Invalid category ID: Category does not exist");

    let leftovers = std::fs::read_dir(uploads.path())
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[actix_rt::test]
async fn bootstrapping_an_existing_database_is_a_no_op() {
    let Ok(database_url) = std::env::var("TEST_DATABASE_URL") else { return };

    let created = database::create_database_if_missing(&database_url).await.unwrap();
    assert!(!created);
}
