//! Composite liveness of the two listeners.
//!
//! The SMTP listener publishes its state through a [`ListenerMonitor`]
//! (a `tokio::sync::watch` channel); the HTTP side is healthy by
//! construction whenever `/health` is being answered. Store sizes come
//! from the stores' lock-free counters, so a health check never waits
//! behind an insert or clear.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::store::{AlertStore, EmailStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerStatus {
    Starting,
    Running { addr: SocketAddr },
    Failed { reason: String },
}

/// Publishing side of a listener's status, shared by the listener task and
/// the health aggregator.
#[derive(Debug, Clone)]
pub struct ListenerMonitor {
    tx: Arc<watch::Sender<ListenerStatus>>,
}

impl Default for ListenerMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerMonitor {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ListenerStatus::Starting);
        Self { tx: Arc::new(tx) }
    }

    pub fn set_running(&self, addr: SocketAddr) {
        self.tx.send_replace(ListenerStatus::Running { addr });
    }

    pub fn set_failed(&self, reason: impl Into<String>) {
        self.tx.send_replace(ListenerStatus::Failed {
            reason: reason.into(),
        });
    }

    pub fn status(&self) -> ListenerStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ListenerStatus> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: OverallStatus,
    pub timestamp: DateTime<Utc>,
    pub services: Services,
}

#[derive(Debug, Serialize)]
pub struct Services {
    pub http: HttpService,
    pub smtp: SmtpService,
}

#[derive(Debug, Serialize)]
pub struct HttpService {
    pub status: &'static str,
    pub alerts_stored: usize,
}

#[derive(Debug, Serialize)]
pub struct SmtpService {
    pub status: &'static str,
    pub emails_stored: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone)]
pub struct HealthAggregator {
    smtp: ListenerMonitor,
    alerts: Arc<AlertStore>,
    emails: Arc<EmailStore>,
}

impl HealthAggregator {
    pub fn new(smtp: ListenerMonitor, alerts: Arc<AlertStore>, emails: Arc<EmailStore>) -> Self {
        Self {
            smtp,
            alerts,
            emails,
        }
    }

    pub fn report(&self) -> HealthReport {
        let (status, smtp_status, address, reason) = match self.smtp.status() {
            ListenerStatus::Running { addr } => {
                (OverallStatus::Healthy, "running", Some(addr.to_string()), None)
            }
            ListenerStatus::Starting => (
                OverallStatus::Degraded,
                "starting",
                None,
                Some("SMTP listener has not started accepting connections".to_string()),
            ),
            ListenerStatus::Failed { reason } => {
                (OverallStatus::Degraded, "failed", None, Some(reason))
            }
        };

        HealthReport {
            status,
            timestamp: Utc::now(),
            services: Services {
                http: HttpService {
                    status: "running",
                    alerts_stored: self.alerts.len(),
                },
                smtp: SmtpService {
                    status: smtp_status,
                    emails_stored: self.emails.len(),
                    address,
                    reason,
                },
            },
        }
    }
}
