//! Prometheus metrics registry for the alert receiver.
//!
//! [`AppMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once at startup, wrap in `Arc`, and pass it
//! to both listeners and the HTTP middleware.
//!
//! Exposed at `GET /metrics` in Prometheus text exposition format
//! (`text/plain; version=0.0.4`).

use prometheus::{
    Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry,
};

/// All application-level Prometheus metrics.
pub struct AppMetrics {
    /// Alerts accepted through `POST /api/alerts`.
    pub alerts_received_total: Counter,
    /// Alert submissions rejected, labelled by reason.
    pub alerts_rejected_total: CounterVec,
    /// Emails accepted by the SMTP listener.
    pub emails_received_total: Counter,
    /// SMTP sessions opened.
    pub smtp_sessions_total: Counter,
    /// Failed SMTP AUTH attempts.
    pub smtp_auth_failures_total: Counter,
    /// SMTP commands rejected, labelled by reply code.
    pub smtp_rejections_total: CounterVec,
    /// Current number of alerts held in memory.
    pub alerts_stored: Gauge,
    /// Current number of emails held in memory.
    pub emails_stored: Gauge,
    /// HTTP request count, labelled by method, path, and status code.
    pub http_requests_total: CounterVec,
    /// HTTP request latency histogram in seconds.
    pub http_request_duration: Histogram,
    /// The registry that owns all of the above metrics.
    pub registry: Registry,
}

impl AppMetrics {
    /// Create and register all metrics. Returns an error if any metric
    /// name is invalid or duplicated.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let alerts_received_total = Counter::with_opts(Opts::new(
            "smm_receiver_alerts_received_total",
            "Alerts accepted over HTTP",
        ))?;

        let alerts_rejected_total = CounterVec::new(
            Opts::new(
                "smm_receiver_alerts_rejected_total",
                "Alert submissions rejected, by reason",
            ),
            &["reason"],
        )?;

        let emails_received_total = Counter::with_opts(Opts::new(
            "smm_receiver_emails_received_total",
            "Emails accepted over SMTP",
        ))?;

        let smtp_sessions_total = Counter::with_opts(Opts::new(
            "smm_receiver_smtp_sessions_total",
            "SMTP sessions opened",
        ))?;

        let smtp_auth_failures_total = Counter::with_opts(Opts::new(
            "smm_receiver_smtp_auth_failures_total",
            "Failed SMTP AUTH attempts",
        ))?;

        let smtp_rejections_total = CounterVec::new(
            Opts::new(
                "smm_receiver_smtp_rejections_total",
                "SMTP commands rejected, by reply code",
            ),
            &["code"],
        )?;

        let alerts_stored = Gauge::with_opts(Opts::new(
            "smm_receiver_alerts_stored",
            "Current size of the alert store",
        ))?;

        let emails_stored = Gauge::with_opts(Opts::new(
            "smm_receiver_emails_stored",
            "Current size of the email store",
        ))?;

        let http_requests_total = CounterVec::new(
            Opts::new(
                "smm_receiver_http_requests_total",
                "HTTP requests by method, path, and status",
            ),
            &["method", "path", "status"],
        )?;

        let http_request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "smm_receiver_http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        registry.register(Box::new(alerts_received_total.clone()))?;
        registry.register(Box::new(alerts_rejected_total.clone()))?;
        registry.register(Box::new(emails_received_total.clone()))?;
        registry.register(Box::new(smtp_sessions_total.clone()))?;
        registry.register(Box::new(smtp_auth_failures_total.clone()))?;
        registry.register(Box::new(smtp_rejections_total.clone()))?;
        registry.register(Box::new(alerts_stored.clone()))?;
        registry.register(Box::new(emails_stored.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;

        Ok(Self {
            alerts_received_total,
            alerts_rejected_total,
            emails_received_total,
            smtp_sessions_total,
            smtp_auth_failures_total,
            smtp_rejections_total,
            alerts_stored,
            emails_stored,
            http_requests_total,
            http_request_duration,
            registry,
        })
    }

    /// Set the stored-record gauges from the stores' live sizes.
    pub fn set_stored(&self, alerts: usize, emails: usize) {
        self.alerts_stored.set(alerts as f64);
        self.emails_stored.set(emails as f64);
    }

    /// Render all metrics as Prometheus text format (for the `/metrics` endpoint).
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}
