use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use crate::health::{HealthAggregator, OverallStatus};

pub fn create_health_router(aggregator: HealthAggregator) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(aggregator)
}

/// `GET /health`: 200 when both listeners are up, 503 otherwise. The body
/// is the same report either way.
pub async fn health(State(aggregator): State<HealthAggregator>) -> Response {
    let report = aggregator.report();
    let status = match report.status {
        OverallStatus::Healthy => StatusCode::OK,
        OverallStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        status,
        [(header::CACHE_CONTROL, HeaderValue::from_static("no-store"))],
        Json(report),
    )
        .into_response()
}
