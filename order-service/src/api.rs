use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use shared::health::{self, ReadinessReport, PROBE_TIMEOUT};
use shared::EventLog;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cart::CreateOrderRequest;
use crate::error::ApiError;
use crate::models::OrderView;
use crate::store::OrderStore;
use crate::writer::OrderWriter;

/// Header carrying the user id resolved by the upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub writer: OrderWriter,
    pub store: Arc<dyn OrderStore>,
    pub log: Arc<dyn EventLog>,
}

/// The acting user, as vouched for by the auth layer in front of us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub i32);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or(ApiError::Unauthorized("missing user identity"))?;

        header
            .to_str()
            .ok()
            .and_then(|value| value.trim().parse().ok())
            .map(UserId)
            .ok_or(ApiError::Unauthorized("invalid user identity"))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
    pub message: String,
    pub order_id: i32,
    pub item_count: usize,
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/orders", post(create_order))
        .route("/api/orders/:id", get(get_order))
        .route("/health", get(liveness))
        .route("/health/ready", get(readiness))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

pub async fn create_order(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), ApiError> {
    let placed = state.writer.place_order(user_id, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            message: "orders created successfully!".to_string(),
            order_id: placed.order_id,
            item_count: placed.item_count,
        }),
    ))
}

/// Users only see their own orders; anything else reads as missing.
pub async fn get_order(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(order_id): Path<i32>,
) -> Result<Json<OrderView>, ApiError> {
    match state.store.find_order(order_id).await? {
        Some(order) if order.user_id == user_id => Ok(Json(order)),
        _ => Err(ApiError::NotFound(order_id)),
    }
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
