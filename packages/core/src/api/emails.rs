//! Read side of the email store.
//!
//! Routes:
//! - `GET  /api/emails`       : paginated listing, filterable by sender
//! - `GET  /api/emails/stats` : counters and breakdowns
//! - `POST /api/emails/clear` : drop every stored email

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::AppError;
use crate::model::{EmailFilter, EmailRecord};
use crate::stats::StatsSnapshot;
use crate::store::EmailStore;

use super::page_from_query;

pub type EmailsState = Arc<EmailsApi>;

pub struct EmailsApi {
    pub store: Arc<EmailStore>,
}

pub fn create_emails_router(state: EmailsState) -> Router {
    Router::new()
        .route("/api/emails", get(list_emails))
        .route("/api/emails/stats", get(email_stats))
        .route("/api/emails/clear", post(clear_emails))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct EmailListQuery {
    pub sender: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub order: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EmailListResponse {
    pub emails: Vec<EmailRecord>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

/// `GET /api/emails`: `sender` is a case-insensitive substring match
/// against the envelope sender and the `From:` header.
pub async fn list_emails(
    State(api): State<EmailsState>,
    query: Result<Query<EmailListQuery>, QueryRejection>,
) -> Result<Json<EmailListResponse>, AppError> {
    let Query(query) = query.map_err(|rejection| AppError::Validation(rejection.body_text()))?;
    let page = page_from_query(query.limit, query.offset, query.order.as_deref())?;
    let filter = EmailFilter {
        sender: query.sender.filter(|s| !s.is_empty()),
    };

    let listing = api.store.list(&filter, page).await;
    tracing::debug!("Returning {} of {} emails", listing.records.len(), listing.total);

    Ok(Json(EmailListResponse {
        emails: listing.records,
        total: listing.total,
        offset: page.offset,
        limit: page.limit,
    }))
}

pub async fn email_stats(State(api): State<EmailsState>) -> Json<StatsSnapshot> {
    Json(api.store.stats().await)
}

pub async fn clear_emails(State(api): State<EmailsState>) -> Json<Value> {
    api.store.clear().await;
    tracing::warn!("Cleared all emails");
    Json(json!({ "status": "success", "message": "All emails cleared" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::model::Email;

    fn make_email(from: &str, subject: &str) -> Email {
        Email {
            from_address: from.to_string(),
            from_header: None,
            to_addresses: vec!["ops@example.com".to_string()],
            subject: subject.to_string(),
            body: "body".to_string(),
            raw_size: 4,
            headers: BTreeMap::new(),
            peer_address: "127.0.0.1:40000".to_string(),
        }
    }

    async fn make_state() -> EmailsState {
        let store = Arc::new(EmailStore::new(10));
        store.insert(make_email("smm@example.com", "Broker down")).await;
        store.insert(make_email("nagios@monitor.net", "Disk")).await;
        store.insert(make_email("SMM@Example.com", "Broker down")).await;
        Arc::new(EmailsApi { store })
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn list_defaults_to_insertion_order() {
        let (status, json) = get_json(create_emails_router(make_state().await), "/api/emails").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total"], 3);
        assert_eq!(json["limit"], 100);
        assert_eq!(json["offset"], 0);
        assert_eq!(json["emails"][0]["id"], 1);
        assert_eq!(json["emails"][0]["from_address"], "smm@example.com");
    }

    #[tokio::test]
    async fn sender_filter_is_case_insensitive() {
        let (_, json) = get_json(
            create_emails_router(make_state().await),
            "/api/emails?sender=smm@EXAMPLE",
        )
        .await;
        assert_eq!(json["total"], 2);
    }

    #[tokio::test]
    async fn zero_limit_returns_an_empty_page() {
        let (_, json) = get_json(
            create_emails_router(make_state().await),
            "/api/emails?limit=0",
        )
        .await;
        assert_eq!(json["limit"], 0);
        assert_eq!(json["total"], 3);
        assert!(json["emails"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stats_break_down_by_sender_and_subject() {
        let (_, json) = get_json(
            create_emails_router(make_state().await),
            "/api/emails/stats",
        )
        .await;
        assert_eq!(json["total_received"], 3);
        assert_eq!(json["by_subject"]["Broker down"], 2);
        assert_eq!(json["by_sender"]["nagios@monitor.net"], 1);
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let state = make_state().await;
        let app = create_emails_router(state.clone());
        for _ in 0..2 {
            let resp = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/api/emails/clear")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
        assert!(state.store.is_empty());
    }
}
