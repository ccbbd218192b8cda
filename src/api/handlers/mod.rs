pub mod auth;
pub mod health;

use super::types::ErrorResponse;
use crate::{identity::store::StoreError, Error};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::error;

/// Failure shape shared by the handlers, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "invalid credentials")
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidInput(message) => Self::new(StatusCode::BAD_REQUEST, message),
            Error::AuthRejected | Error::AuthExpired => Self::unauthorized(),
            Error::Persistence(StoreError::Conflict(_)) => {
                Self::new(StatusCode::CONFLICT, "account already exists")
            }
            other => {
                error!("request failed: {other}");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}
