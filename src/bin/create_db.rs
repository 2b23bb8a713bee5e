use travel_listings_api::database::{self, Database};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let database_url = std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set in environment")?;

    if database::create_database_if_missing(&database_url).await? {
        println!("Database created.");
    } else {
        println!("Database already exists.");
    }

    // Connecting runs the migrations.
    Database::connect(&database_url).await?;
    println!("Database ready and migrations applied.");

    Ok(())
}
