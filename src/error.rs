use crate::auth::AuthError;
use crate::database::DatabaseError;
use crate::weather::WeatherError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Error body returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Weather(#[from] WeatherError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::Weather(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Database(DatabaseError::UserNotFound)
            | ApiError::Database(DatabaseError::FavoriteNotFound) => StatusCode::NOT_FOUND,
            ApiError::Database(DatabaseError::DuplicateFavorite) => StatusCode::BAD_REQUEST,
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            // Storage internals stay in the logs.
            ApiError::Database(DatabaseError::QueryFailed(_))
            | ApiError::Database(DatabaseError::InvalidData(_)) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected ({}): {}", status.as_u16(), self);
        }
        (status, Json(ErrorResponse::new(self.message()))).into_response()
    }
}
