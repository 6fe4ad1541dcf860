//! Composition root: builds the stores, metrics and health surface from a
//! [`Config`], binds both listeners, and runs them until shutdown.
//!
//! The listeners are independent. A listener that fails to bind is logged
//! and reported through `/health`; the other one keeps serving.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::api::{self, ApiContext};
use crate::config::Config;
use crate::error::AppError;
use crate::health::{HealthAggregator, ListenerMonitor};
use crate::metrics::AppMetrics;
use crate::smtp::{SmtpContext, SmtpListener, SmtpSettings};
use crate::store::{AlertStore, EmailStore};

pub struct Server {
    alerts: Arc<AlertStore>,
    emails: Arc<EmailStore>,
    metrics: Arc<AppMetrics>,
    smtp_monitor: ListenerMonitor,
    max_payload_bytes: usize,
    http: Result<TcpListener, AppError>,
    smtp: Option<SmtpListener>,
}

impl Server {
    /// Bind both listeners. Fails only when neither could be bound.
    pub async fn bind(config: &Config) -> Result<Self, AppError> {
        let metrics = Arc::new(
            AppMetrics::new()
                .map_err(|err| AppError::Internal(format!("Failed to register metrics: {}", err)))?,
        );
        let alerts = Arc::new(AlertStore::new(config.alert_capacity));
        let emails = Arc::new(EmailStore::new(config.email_capacity));
        let smtp_monitor = ListenerMonitor::new();

        let smtp_ctx = SmtpContext {
            settings: Arc::new(SmtpSettings::from_config(config)),
            store: emails.clone(),
            metrics: metrics.clone(),
        };
        let smtp = match SmtpListener::bind(&config.smtp_addr(), smtp_ctx).await {
            Ok(listener) => Some(listener),
            Err(err) => {
                tracing::error!("{}", err);
                smtp_monitor.set_failed(err.to_string());
                None
            }
        };

        let http_addr = config.http_addr();
        let http = TcpListener::bind(&http_addr)
            .await
            .map_err(|source| AppError::ListenerStartup {
                listener: "HTTP",
                addr: http_addr,
                source,
            });

        match http {
            Err(err) if smtp.is_none() => Err(err),
            http => Ok(Self {
                alerts,
                emails,
                metrics,
                smtp_monitor,
                max_payload_bytes: config.max_payload_bytes,
                http,
                smtp,
            }),
        }
    }

    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http.as_ref().ok().and_then(|l| l.local_addr().ok())
    }

    pub fn smtp_addr(&self) -> Option<SocketAddr> {
        self.smtp.as_ref().map(SmtpListener::local_addr)
    }

    /// Serve until `shutdown` resolves. Returns the HTTP bind error, if
    /// there was one, once the SMTP side has stopped.
    pub async fn run<F>(self, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown.await;
            tracing::info!("Shutdown signal received");
            let _ = stop_tx.send(true);
        });

        let smtp_task = self
            .smtp
            .map(|listener| listener.spawn(self.smtp_monitor.clone(), stop_rx.clone()));

        let health = HealthAggregator::new(
            self.smtp_monitor.clone(),
            self.alerts.clone(),
            self.emails.clone(),
        );
        let app = api::create_router(ApiContext {
            alerts: self.alerts,
            emails: self.emails,
            metrics: self.metrics,
            health,
            max_payload_bytes: self.max_payload_bytes,
        });

        let result = match self.http {
            Ok(listener) => {
                match listener.local_addr() {
                    Ok(addr) => tracing::info!("HTTP API listening on {}", addr),
                    Err(err) => tracing::warn!("HTTP API listening on unknown address: {}", err),
                }
                axum::serve(
                    listener,
                    app.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(stopped(stop_rx))
                .await
                .map_err(|err| AppError::Internal(format!("HTTP server failed: {}", err)))
            }
            Err(err) => {
                tracing::error!("{}; SMTP keeps running until shutdown", err);
                stopped(stop_rx).await;
                Err(err)
            }
        };

        if let Some(task) = smtp_task {
            let _ = task.await;
        }
        tracing::info!("Receiver stopped");
        result
    }
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            break;
        }
    }
}
