use actix_cors::Cors;
use actix_files::Files;
use actix_web::{http::header, middleware::Logger, web, App, HttpServer};
use std::sync::Arc;

use travel_listings_api::auth::TokenService;
use travel_listings_api::clients::mailer::{Mailer, SmtpMailer};
use travel_listings_api::config::AppConfig;
use travel_listings_api::database::Database;
use travel_listings_api::handlers;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::from_env().map_err(|err| {
        log::error!("Invalid configuration: {err}");
        std::io::Error::new(std::io::ErrorKind::InvalidInput, err)
    })?;

    if config.base_url.is_none() {
        log::warn!("BASE_URL is not set; uploads with images will be rejected");
    }

    std::fs::create_dir_all(&config.upload_dir)?;

    let db = Database::connect(&config.database_url).await.map_err(|err| {
        log::error!("Failed to initialize database: {err:?}");
        std::io::Error::new(std::io::ErrorKind::Other, err)
    })?;

    let mailer: Arc<dyn Mailer> = Arc::new(SmtpMailer::from_config(&config).map_err(|err| {
        log::error!("Failed to configure mailer: {err:?}");
        std::io::Error::new(std::io::ErrorKind::InvalidInput, err)
    })?);

    let bind_address = config.bind_address();
    let frontend_url = config.frontend_url.clone();
    let upload_dir = config.upload_dir.clone();

    let tokens = web::Data::new(TokenService::from_config(&config));
    let db_data = web::Data::new(db);
    let config_data = web::Data::new(config);
    let mailer_data: web::Data<dyn Mailer> = web::Data::from(mailer);

    log::info!("Starting Travel Listings API on {}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_url)
            .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
            .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
            .expose_headers(vec![header::AUTHORIZATION])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(config_data.clone())
            .app_data(db_data.clone())
            .app_data(tokens.clone())
            .app_data(mailer_data.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .service(Files::new("/uploads", upload_dir.clone()))
            .configure(handlers::configure)
    })
    .bind(&bind_address)?
    .run()
    .await
}
