use std::env;
use std::path::PathBuf;

use chrono::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set in environment")]
    Missing(&'static str),
    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Process-wide settings, read once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Absolute URL prefix for uploaded images. Record creation with images fails without it.
    pub base_url: Option<String>,
    pub upload_dir: PathBuf,
    pub jwt_secret: String,
    pub refresh_token_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub frontend_url: String,
    pub environment: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub mail_from: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = optional("PORT").unwrap_or_else(|| "5000".to_string());
        let port = port
            .parse::<u16>()
            .map_err(|_| ConfigError::Invalid { key: "PORT", value: port })?;

        let smtp_port = optional("SMTP_PORT").unwrap_or_else(|| "1025".to_string());
        let smtp_port = smtp_port
            .parse::<u16>()
            .map_err(|_| ConfigError::Invalid { key: "SMTP_PORT", value: smtp_port })?;

        let access_raw = optional("ACCESS_TOKEN_EXPIRES_IN").unwrap_or_else(|| "15m".to_string());
        let access_token_ttl = parse_duration(&access_raw).ok_or(ConfigError::Invalid {
            key: "ACCESS_TOKEN_EXPIRES_IN",
            value: access_raw.clone(),
        })?;

        let refresh_raw = optional("REFRESH_TOKEN_EXPIRES_IN").unwrap_or_else(|| "7d".to_string());
        let refresh_token_ttl = parse_duration(&refresh_raw).ok_or(ConfigError::Invalid {
            key: "REFRESH_TOKEN_EXPIRES_IN",
            value: refresh_raw.clone(),
        })?;

        Ok(Self {
            host: optional("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port,
            database_url: required("DATABASE_URL")?,
            base_url: optional("BASE_URL").map(|url| url.trim_end_matches('/').to_string()),
            upload_dir: PathBuf::from(optional("UPLOAD_DIR").unwrap_or_else(|| "uploads".to_string())),
            jwt_secret: required("JWT_SECRET")?,
            refresh_token_secret: required("REFRESH_TOKEN_SECRET")?,
            access_token_ttl,
            refresh_token_ttl,
            frontend_url: optional("FRONTEND_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
            environment: optional("APP_ENV")
                .or_else(|| optional("NODE_ENV"))
                .unwrap_or_else(|| "development".to_string()),
            smtp_host: optional("SMTP_HOST").unwrap_or_else(|| "localhost".to_string()),
            smtp_port,
            mail_from: optional("MAIL_FROM")
                .unwrap_or_else(|| "Travel Listings <no-reply@localhost>".to_string()),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::Missing(key))
}

/// Parses lifetimes such as `15m`, `7d`, `12h`, `30s` or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let amount: i64 = digits.parse().ok()?;

    match unit.trim() {
        "" | "s" => Some(Duration::seconds(amount)),
        "m" => Some(Duration::minutes(amount)),
        "h" => Some(Duration::hours(amount)),
        "d" => Some(Duration::days(amount)),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) fn test_config(upload_dir: PathBuf) -> AppConfig {
    AppConfig {
        host: "127.0.0.1".into(),
        port: 0,
        database_url: "postgres://localhost/travel_listings_test".into(),
        base_url: Some("http://localhost:5000".into()),
        upload_dir,
        jwt_secret: "access-secret".into(),
        refresh_token_secret: "refresh-secret".into(),
        access_token_ttl: Duration::minutes(15),
        refresh_token_ttl: Duration::days(7),
        frontend_url: "http://localhost:3000".into(),
        environment: "test".into(),
        smtp_host: "localhost".into(),
        smtp_port: 1025,
        mail_from: "Travel Listings <no-reply@localhost>".into(),
    }
}
