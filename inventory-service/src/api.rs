use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use shared::health::{self, ReadinessReport, PROBE_TIMEOUT};
use shared::EventLog;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::models::StockView;
use crate::store::InventoryStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn InventoryStore>,
    pub log: Arc<dyn EventLog>,
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/inventory/:product_id", get(get_stock))
        .route("/health", get(liveness))
        .route("/health/ready", get(readiness))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
}

pub async fn get_stock(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
) -> Result<Json<StockView>, ApiError> {
    state
        .store
        .stock(product_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound(product_id))
}

pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { status: "ok" })
}

pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadinessReport>) {
    let (database, event_log) = tokio::join!(
        health::probe("database", PROBE_TIMEOUT, state.store.ping()),
        health::probe("event_log", PROBE_TIMEOUT, state.log.ping()),
    );

    let report = ReadinessReport::new([("database", database), ("event_log", event_log)]);
    let status = if report.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
