use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;

use crate::database::StoreError;
use crate::models::ApiResponse;

/// One failed check, addressed by the dotted path into the request input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Validation error")]
    Validation(Vec<FieldError>),
    #[error("{0}")]
    BadRequest(String),
    #[error("Invalid category ID: Category does not exist")]
    CategoryNotFound,
    #[error("User already exists")]
    EmailTaken,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("Invalid refresh token")]
    InvalidRefreshToken,
    #[error("{0}")]
    NotFound(String),
    #[error("This slug is already taken")]
    SlugConflict(String),
    #[error("{0}")]
    Conflict(String),
    #[error("File too large")]
    FileTooLarge,
    #[error("File type not allowed")]
    UnsupportedFileType,
    #[error("Failed to store uploaded file")]
    StorageUnavailable(#[source] std::io::Error),
    #[error("Internal server error")]
    Internal(String),
    #[error("Internal server error")]
    Database(#[source] sqlx::Error),
}

impl ApiError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    fn details(&self) -> Option<Vec<FieldError>> {
        match self {
            Self::Validation(details) => Some(details.clone()),
            Self::SlugConflict(_) => Some(vec![FieldError::new("slug", self.to_string())]),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("Resource not found".into()),
            other => Self::Database(other),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Sqlx(err) => err.into(),
            StoreError::MissingCategory(_) => Self::CategoryNotFound,
            StoreError::MissingLocation(_) => Self::BadRequest("Invalid location ID".into()),
            StoreError::MissingFeatures => Self::BadRequest("Invalid feature IDs".into()),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::BadRequest(_)
            | Self::CategoryNotFound
            | Self::EmailTaken => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::InvalidRefreshToken => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::SlugConflict(_) | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::FileTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedFileType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::StorageUnavailable(_) | Self::Internal(_) | Self::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        match self {
            Self::StorageUnavailable(err) => log::error!("Upload storage failure: {err:?}"),
            Self::Internal(message) => log::error!("Internal error: {message}"),
            Self::Database(err) => log::error!("Database error: {err:?}"),
            _ => {}
        }

        let mut body = ApiResponse::<()>::error(self.to_string());
        body.details = self.details();
        HttpResponse::build(status).json(body)
    }
}
