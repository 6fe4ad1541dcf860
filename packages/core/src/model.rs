//! Record types held by the two in-memory stores.
//!
//! Records carry only what their listener parsed; the store wraps each one
//! in a [`Stored`] envelope that adds the id and receive timestamp.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity / type label used when an alert payload does not carry one.
pub const UNKNOWN_CATEGORY: &str = "UNKNOWN";

/// Behaviour the generic store needs from the records it holds.
pub trait Record: Clone + Send + Sync + 'static {
    /// Query filter accepted by `BoundedStore::list`. `Default` matches all.
    type Filter: Default + Send + Sync;

    /// Names of the categorical dimensions broken down in the stats.
    const DIMENSIONS: &'static [&'static str];

    /// `(dimension, value)` pairs for this record, one per entry in
    /// [`Record::DIMENSIONS`].
    fn categories(&self) -> Vec<(&'static str, String)>;

    fn matches(&self, filter: &Self::Filter) -> bool;
}

/// A record as held by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stored<T> {
    pub id: u64,
    pub received_at: DateTime<Utc>,
    #[serde(flatten)]
    pub record: T,
}

pub type AlertRecord = Stored<Alert>;
pub type EmailRecord = Stored<Email>;

// ---- Alerts ----

/// An alert submitted to `POST /api/alerts`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub source_address: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub severity: Option<String>,
    pub alert_type: Option<String>,
}

impl Alert {
    pub fn new(source_address: impl Into<String>, payload: Value) -> Self {
        Self {
            source_address: source_address.into(),
            payload,
        }
    }

    pub fn severity(&self) -> &str {
        self.payload
            .get("severity")
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_CATEGORY)
    }

    /// SMM sends `alertType`; generic notifiers tend to send `type`.
    pub fn alert_type(&self) -> &str {
        self.payload
            .get("alertType")
            .or_else(|| self.payload.get("type"))
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_CATEGORY)
    }
}

impl Record for Alert {
    type Filter = AlertFilter;

    const DIMENSIONS: &'static [&'static str] = &["severity", "type"];

    fn categories(&self) -> Vec<(&'static str, String)> {
        vec![
            ("severity", self.severity().to_string()),
            ("type", self.alert_type().to_string()),
        ]
    }

    fn matches(&self, filter: &AlertFilter) -> bool {
        let severity_ok = filter
            .severity
            .as_deref()
            .map_or(true, |wanted| self.severity() == wanted);
        let type_ok = filter
            .alert_type
            .as_deref()
            .map_or(true, |wanted| self.alert_type() == wanted);
        severity_ok && type_ok
    }
}

// ---- Emails ----

/// A message accepted by the SMTP listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Email {
    /// Envelope sender (`MAIL FROM`).
    pub from_address: String,
    /// Decoded `From:` header, when the message carried one.
    pub from_header: Option<String>,
    /// Envelope recipients (`RCPT TO`), first-seen order, no duplicates.
    pub to_addresses: Vec<String>,
    pub subject: String,
    pub body: String,
    pub raw_size: usize,
    pub headers: BTreeMap<String, String>,
    pub peer_address: String,
}

#[derive(Debug, Clone, Default)]
pub struct EmailFilter {
    /// Case-insensitive substring matched against the sender.
    pub sender: Option<String>,
}

impl Record for Email {
    type Filter = EmailFilter;

    const DIMENSIONS: &'static [&'static str] = &["sender", "subject"];

    fn categories(&self) -> Vec<(&'static str, String)> {
        vec![
            ("sender", self.from_address.clone()),
            ("subject", self.subject.clone()),
        ]
    }

    fn matches(&self, filter: &EmailFilter) -> bool {
        let Some(wanted) = filter.sender.as_deref() else {
            return true;
        };
        let wanted = wanted.to_lowercase();
        self.from_address.to_lowercase().contains(&wanted)
            || self
                .from_header
                .as_deref()
                .is_some_and(|header| header.to_lowercase().contains(&wanted))
    }
}
