//! HTTP surface: alert ingestion, store queries, health and metrics.

pub mod alerts;
pub mod emails;
pub mod health;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::AppError;
use crate::health::HealthAggregator;
use crate::metrics::AppMetrics;
use crate::store::{AlertStore, EmailStore, Page, SortOrder, DEFAULT_PAGE_LIMIT};

/// Largest page a listing request may ask for.
pub const MAX_PAGE_LIMIT: usize = 1000;

/// Everything the router needs, built once by the composition root.
#[derive(Clone)]
pub struct ApiContext {
    pub alerts: Arc<AlertStore>,
    pub emails: Arc<EmailStore>,
    pub metrics: Arc<AppMetrics>,
    pub health: HealthAggregator,
    pub max_payload_bytes: usize,
}

/// Assemble the full application router.
pub fn create_router(ctx: ApiContext) -> Router {
    let alerts_router = alerts::create_alerts_router(Arc::new(alerts::AlertsApi {
        store: ctx.alerts.clone(),
        metrics: ctx.metrics.clone(),
        max_payload_bytes: ctx.max_payload_bytes,
    }));
    let emails_router = emails::create_emails_router(Arc::new(emails::EmailsApi {
        store: ctx.emails.clone(),
    }));
    let metrics_router = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(ScrapeState {
            metrics: ctx.metrics.clone(),
            alerts: ctx.alerts.clone(),
            emails: ctx.emails.clone(),
        });

    Router::new()
        .merge(health::create_health_router(ctx.health))
        .merge(metrics_router)
        .merge(alerts_router)
        .merge(emails_router)
        .layer(middleware::from_fn_with_state(ctx.metrics, track_http))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(Clone)]
struct ScrapeState {
    metrics: Arc<AppMetrics>,
    alerts: Arc<AlertStore>,
    emails: Arc<EmailStore>,
}

/// `GET /metrics`: Prometheus text exposition. Stored-record gauges are
/// read from the stores' live sizes at scrape time.
async fn render_metrics(State(scrape): State<ScrapeState>) -> Result<Response, AppError> {
    scrape
        .metrics
        .set_stored(scrape.alerts.len(), scrape.emails.len());
    let body = scrape
        .metrics
        .render()
        .map_err(|err| AppError::Internal(format!("Failed to render metrics: {}", err)))?;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .map_err(|err| AppError::Internal(err.to_string()))
}

/// Count and time every request, labelled by its route template.
async fn track_http(
    State(metrics): State<Arc<AppMetrics>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    metrics
        .http_requests_total
        .with_label_values(&[method.as_str(), path.as_str(), response.status().as_str()])
        .inc();
    metrics
        .http_request_duration
        .observe(start.elapsed().as_secs_f64());
    response
}

/// Translate listing query parameters into a [`Page`].
///
/// `limit` defaults to 100 and is capped at `MAX_PAGE_LIMIT` (0 is an empty page); `order`
/// accepts `oldest` (default) or `newest`.
pub fn page_from_query(
    limit: Option<usize>,
    offset: Option<usize>,
    order: Option<&str>,
) -> Result<Page, AppError> {
    let order = match order {
        None => SortOrder::OldestFirst,
        Some(o) if o.eq_ignore_ascii_case("oldest") => SortOrder::OldestFirst,
        Some(o) if o.eq_ignore_ascii_case("newest") => SortOrder::NewestFirst,
        Some(other) => {
            return Err(AppError::Validation(format!(
                "Invalid order '{}'. Must be one of: oldest, newest",
                other
            )))
        }
    };

    Ok(Page {
        limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT),
        offset: offset.unwrap_or(0),
        order,
    })
}
