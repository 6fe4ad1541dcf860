//! HTTP alert ingestion and the alert query endpoints.
//!
//! Routes:
//! - `POST /api/alerts`       : store one JSON alert
//! - `GET  /api/alerts`       : paginated listing, filterable by severity/type
//! - `GET  /api/alerts/stats` : counters and breakdowns
//! - `POST /api/alerts/clear` : drop every stored alert

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, QueryRejection},
        ConnectInfo, DefaultBodyLimit, Query, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::AppError;
use crate::metrics::AppMetrics;
use crate::model::{Alert, AlertFilter, AlertRecord};
use crate::stats::StatsSnapshot;
use crate::store::AlertStore;

use super::page_from_query;

/// Shared state for the alerts routes.
pub type AlertsState = Arc<AlertsApi>;

pub struct AlertsApi {
    pub store: Arc<AlertStore>,
    pub metrics: Arc<AppMetrics>,
    pub max_payload_bytes: usize,
}

pub fn create_alerts_router(state: AlertsState) -> Router {
    let body_limit = state.max_payload_bytes;
    Router::new()
        .route("/api/alerts", post(receive_alert).get(list_alerts))
        .route("/api/alerts/stats", get(alert_stats))
        .route("/api/alerts/clear", post(clear_alerts))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

// ---- Request / response shapes ----

#[derive(Debug, Deserialize)]
pub struct AlertListQuery {
    pub severity: Option<String>,
    #[serde(rename = "type")]
    pub alert_type: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub order: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReceiveAlertResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub alert_id: u64,
}

#[derive(Debug, Serialize)]
pub struct AlertListResponse {
    pub alerts: Vec<AlertRecord>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

// ---- Handlers ----

/// `POST /api/alerts`: the body must be JSON; Content-Type is not checked.
pub async fn receive_alert(
    State(api): State<AlertsState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<ReceiveAlertResponse>, AppError> {
    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            api.metrics.alerts_rejected_total.with_label_values(&["too_large"]).inc();
            AppError::PayloadTooLarge {
                limit: api.max_payload_bytes,
            }
        } else {
            api.metrics.alerts_rejected_total.with_label_values(&["unreadable"]).inc();
            AppError::Validation(rejection.body_text())
        }
    })?;

    let payload: Value = serde_json::from_slice(&body).map_err(|err| {
        api.metrics.alerts_rejected_total.with_label_values(&["invalid_json"]).inc();
        AppError::Validation(format!("Alert body is not valid JSON: {}", err))
    })?;

    let source = connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let alert = Alert::new(source, payload);
    let severity = alert.severity().to_string();
    let alert_type = alert.alert_type().to_string();
    let source = alert.source_address.clone();

    let alert_id = api.store.insert(alert).await;
    api.metrics.alerts_received_total.inc();

    tracing::info!(
        alert_id,
        %source,
        %severity,
        %alert_type,
        "Alert received and stored"
    );

    Ok(Json(ReceiveAlertResponse {
        status: "success",
        message: "Alert received and stored",
        alert_id,
    }))
}

/// `GET /api/alerts`
///
/// Query params:
/// - `severity` / `type`: exact-match filters on the derived categories;
///   an empty value means no filter
/// - `limit` : page size (default 100, capped at 1000; 0 yields an empty page)
/// - `offset`: records to skip (default 0)
/// - `order` : `oldest` (default) or `newest`
pub async fn list_alerts(
    State(api): State<AlertsState>,
    query: Result<Query<AlertListQuery>, QueryRejection>,
) -> Result<Json<AlertListResponse>, AppError> {
    let Query(query) = query.map_err(|rejection| AppError::Validation(rejection.body_text()))?;
    let page = page_from_query(query.limit, query.offset, query.order.as_deref())?;
    let filter = AlertFilter {
        severity: query.severity.filter(|s| !s.is_empty()),
        alert_type: query.alert_type.filter(|s| !s.is_empty()),
    };

    let listing = api.store.list(&filter, page).await;
    tracing::debug!("Returning {} of {} alerts", listing.records.len(), listing.total);

    Ok(Json(AlertListResponse {
        alerts: listing.records,
        total: listing.total,
        offset: page.offset,
        limit: page.limit,
    }))
}

/// `GET /api/alerts/stats`
pub async fn alert_stats(State(api): State<AlertsState>) -> Json<StatsSnapshot> {
    Json(api.store.stats().await)
}

/// `POST /api/alerts/clear`: idempotent.
pub async fn clear_alerts(State(api): State<AlertsState>) -> Json<Value> {
    api.store.clear().await;
    tracing::warn!("Cleared all HTTP alerts");
    Json(json!({ "status": "success", "message": "All HTTP alerts cleared" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Method, Request},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn make_state(limit: usize) -> AlertsState {
        Arc::new(AlertsApi {
            store: Arc::new(AlertStore::new(5)),
            metrics: Arc::new(AppMetrics::new().unwrap()),
            max_payload_bytes: limit,
        })
    }

    async fn body_json(body: Body) -> Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_alert(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/api/alerts")
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn post_stores_alert_without_content_type() {
        let state = make_state(1024);
        let app = create_alerts_router(state.clone());

        let resp = app
            .oneshot(post_alert(r#"{"severity":"HIGH","alertType":"BROKER_DOWN"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp.into_body()).await;
        assert_eq!(json["status"], "success");
        assert_eq!(json["alert_id"], 1);

        let listing = state.store.list(&AlertFilter::default(), Default::default()).await;
        assert_eq!(listing.records[0].record.source_address, "unknown");
        assert!((state.metrics.alerts_received_total.get() - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn post_invalid_json_returns_400_and_stores_nothing() {
        let state = make_state(1024);
        let app = create_alerts_router(state.clone());

        let resp = app.oneshot(post_alert("{not json")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp.into_body()).await;
        assert_eq!(json["status"], "error");
        assert!(state.store.is_empty());
        assert_eq!(state.store.stats().await.total_received, 0);
    }

    #[tokio::test]
    async fn post_over_limit_returns_413() {
        let state = make_state(16);
        let app = create_alerts_router(state.clone());

        let big = format!(r#"{{"message":"{}"}}"#, "x".repeat(64));
        let resp = app.oneshot(post_alert(big)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(state.store.is_empty());
        let rejected = state
            .metrics
            .alerts_rejected_total
            .with_label_values(&["too_large"])
            .get();
        assert!((rejected - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn list_filters_and_paginates() {
        let state = make_state(1024);
        for severity in ["HIGH", "LOW", "HIGH", "HIGH"] {
            state
                .store
                .insert(Alert::new("10.0.0.1", json!({ "severity": severity })))
                .await;
        }
        let app = create_alerts_router(state);

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/alerts?severity=HIGH&limit=2&offset=1&order=newest")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp.into_body()).await;
        assert_eq!(json["total"], 3);
        assert_eq!(json["limit"], 2);
        assert_eq!(json["offset"], 1);
        let ids: Vec<u64> = json["alerts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[tokio::test]
    async fn list_rejects_unknown_order() {
        let app = create_alerts_router(make_state(1024));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/alerts?order=sideways")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_filters_match_every_alert() {
        let state = make_state(1024);
        for severity in ["LOW", "HIGH"] {
            state
                .store
                .insert(Alert::new("10.0.0.1", json!({ "severity": severity })))
                .await;
        }
        let app = create_alerts_router(state);

        for uri in ["/api/alerts?severity=", "/api/alerts?type=", "/api/alerts?severity=&type="] {
            let resp = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            let json = body_json(resp.into_body()).await;
            assert_eq!(json["total"], 2, "{}", uri);
            assert_eq!(json["alerts"].as_array().unwrap().len(), 2, "{}", uri);
        }
    }

    #[tokio::test]
    async fn zero_limit_returns_an_empty_page() {
        let state = make_state(1024);
        state.store.insert(Alert::new("10.0.0.1", json!({}))).await;
        let app = create_alerts_router(state);

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/alerts?limit=0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp.into_body()).await;
        assert_eq!(json["limit"], 0);
        assert_eq!(json["total"], 1);
        assert!(json["alerts"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_rejects_non_numeric_limit() {
        let app = create_alerts_router(make_state(1024));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/alerts?limit=ten")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp.into_body()).await;
        assert_eq!(json["status"], "error");
    }

    #[tokio::test]
    async fn clear_empties_store_but_keeps_total() {
        let state = make_state(1024);
        state.store.insert(Alert::new("10.0.0.1", json!({}))).await;
        let app = create_alerts_router(state.clone());

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/alerts/clear")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/alerts/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(resp.into_body()).await;
        assert_eq!(json["current_count"], 0);
        assert_eq!(json["total_received"], 1);
        assert!(json["by_severity"].as_object().unwrap().is_empty());
    }
}
