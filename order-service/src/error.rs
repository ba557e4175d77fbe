use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use shared::StoreError;
use thiserror::Error;

use crate::cart::CartError;
use crate::writer::PlaceOrderError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),
    #[error(transparent)]
    InvalidCart(#[from] CartError),
    #[error("order {0} not found")]
    NotFound(i32),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<PlaceOrderError> for ApiError {
    fn from(err: PlaceOrderError) -> Self {
        match err {
            PlaceOrderError::Invalid(e) => ApiError::InvalidCart(e),
            PlaceOrderError::Store(e) => ApiError::Store(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::InvalidCart(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Store(e) => {
                tracing::error!(error = %e, "Order store error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to process order".to_string())
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
