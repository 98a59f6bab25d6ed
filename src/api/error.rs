//! JSON error bodies for the HTTP surface.

use std::fmt;

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::Serialize;
use tracing::error;

use crate::assets::{AssetStoreError, ValidationError};
use crate::auth::AuthError;
use crate::tenant::DirectoryError;

pub const INVALID_BODY_MESSAGE: &str = "The provided request body was invalid";
pub const INVALID_PARAMETERS_MESSAGE: &str = "The provided request parameters were invalid";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationErrorResponse {
    pub error_message: String,
    pub validation_errors: Vec<ValidationError>,
}

/// Errors returned by request handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Authentication or authorization failed; answered with an empty body.
    Auth(AuthError),
    InvalidBody(Vec<ValidationError>),
    InvalidParameters(Vec<ValidationError>),
    NotFound(String),
    Conflict(String),
    /// A dependency is down. The message is shown to the client.
    Unavailable(String),
    /// Something failed internally. The message is shown to the client; the
    /// cause has already been logged.
    Internal(String),
}

impl ApiError {
    /// Build an internal error for a failed operation on an entity, logging
    /// the underlying cause.
    pub fn internal(action: &str, entity: &str, cause: impl fmt::Display) -> Self {
        error!("Error while {} {} entity: {}", action, entity, cause);
        Self::Internal(format!(
            "An internal error occurred while {} a(n) {} entity",
            action, entity
        ))
    }

    /// Map an asset storage failure for the given action ("creating",
    /// "reading", ...). A partition that cannot be resolved becomes an
    /// authentication failure with an empty body.
    pub fn from_store(action: &str, err: AssetStoreError) -> Self {
        match err {
            AssetStoreError::NameConflict(name) => {
                Self::Conflict(format!("An Asset named '{}' already exists", name))
            }
            AssetStoreError::Routing(err) => Self::Auth(AuthError::from(err)),
            AssetStoreError::Storage(cause) => Self::internal(action, "Asset", cause),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth(e) => write!(f, "{}", e),
            Self::InvalidBody(errors) => write!(f, "{} ({} errors)", INVALID_BODY_MESSAGE, errors.len()),
            Self::InvalidParameters(errors) => {
                write!(f, "{} ({} errors)", INVALID_PARAMETERS_MESSAGE, errors.len())
            }
            Self::NotFound(msg)
            | Self::Conflict(msg)
            | Self::Unavailable(msg)
            | Self::Internal(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Conflict(msg) => Self::Conflict(msg),
            DirectoryError::Invalid(msg) => Self::InvalidBody(vec![ValidationError::new("requestBody", msg)]),
            DirectoryError::Unavailable(msg) => {
                error!("Tenant directory unavailable: {}", msg);
                Self::Unavailable("The tenant directory is unavailable".to_string())
            }
        }
    }
}

fn message(status: StatusCode, error_message: String) -> Response {
    (status, Json(ErrorResponse { error_message })).into_response()
}

fn validation(error_message: &str, validation_errors: Vec<ValidationError>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ValidationErrorResponse {
            error_message: error_message.to_string(),
            validation_errors,
        }),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Auth(err) => err.into_response(),
            Self::InvalidBody(errors) => validation(INVALID_BODY_MESSAGE, errors),
            Self::InvalidParameters(errors) => validation(INVALID_PARAMETERS_MESSAGE, errors),
            Self::NotFound(msg) => message(StatusCode::NOT_FOUND, msg),
            Self::Conflict(msg) => message(StatusCode::CONFLICT, msg),
            Self::Unavailable(msg) => message(StatusCode::SERVICE_UNAVAILABLE, msg),
            Self::Internal(msg) => message(StatusCode::INTERNAL_SERVER_ERROR, msg),
        }
    }
}
