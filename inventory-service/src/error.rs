use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use shared::StoreError;
use thiserror::Error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("product {0} not found")]
    NotFound(i32),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Store(e) => {
                tracing::error!(error = %e, "Inventory store error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read inventory".to_string())
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
