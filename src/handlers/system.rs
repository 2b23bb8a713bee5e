use actix_web::{get, web, HttpResponse, Responder};

use crate::database::Database;

#[get("/")]
pub async fn welcome() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body("Welcome to the Travel Listings API")
}

#[get("/health")]
pub async fn health_check(db: web::Data<Database>) -> impl Responder {
    let database = match sqlx::query("SELECT 1").execute(db.pool()).await {
        Ok(_) => "ok",
        Err(err) => {
            log::error!("Health check database ping failed: {err:?}");
            "unavailable"
        }
    };

    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "travel-listings-api",
        "database": database,
        "timestamp": chrono::Utc::now()
    }))
}
