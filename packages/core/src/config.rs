use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::cli::Cli;

pub const DEFAULT_HTTP_PORT: u16 = 18123;
pub const DEFAULT_SMTP_PORT: u16 = 1025;
pub const DEFAULT_STORE_CAPACITY: usize = 1000;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;
pub const DEFAULT_SMTP_MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_SMTP_IDLE_TIMEOUT_SECONDS: u64 = 300;

#[derive(Clone)]
pub struct Config {
    pub http_host: String,
    pub http_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_hostname: String,
    pub smtp_username: String,
    pub smtp_password: String,
    pub alert_capacity: usize,
    pub email_capacity: usize,
    pub max_payload_bytes: usize,
    pub smtp_max_message_bytes: usize,
    pub smtp_idle_timeout: Duration,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("Invalid LOG_FORMAT: {}", other)),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup. Unset keys fall back to defaults;
    /// set-but-invalid keys are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let config = Self {
            http_host: string_or("HTTP_HOST", "0.0.0.0"),
            http_port: parse_or(&lookup, "HTTP_PORT", DEFAULT_HTTP_PORT)?,
            smtp_host: string_or("SMTP_HOST", "0.0.0.0"),
            smtp_port: parse_or(&lookup, "SMTP_PORT", DEFAULT_SMTP_PORT)?,
            smtp_hostname: string_or("SMTP_HOSTNAME", "smm-alert-receiver"),
            smtp_username: string_or("SMTP_USERNAME", "admin"),
            smtp_password: string_or("SMTP_PASSWORD", "admin"),
            alert_capacity: parse_or(&lookup, "ALERT_STORE_CAPACITY", DEFAULT_STORE_CAPACITY)?,
            email_capacity: parse_or(&lookup, "EMAIL_STORE_CAPACITY", DEFAULT_STORE_CAPACITY)?,
            max_payload_bytes: parse_or(&lookup, "MAX_PAYLOAD_BYTES", DEFAULT_MAX_PAYLOAD_BYTES)?,
            smtp_max_message_bytes: parse_or(
                &lookup,
                "SMTP_MAX_MESSAGE_BYTES",
                DEFAULT_SMTP_MAX_MESSAGE_BYTES,
            )?,
            smtp_idle_timeout: Duration::from_secs(parse_or(
                &lookup,
                "SMTP_IDLE_TIMEOUT_SECONDS",
                DEFAULT_SMTP_IDLE_TIMEOUT_SECONDS,
            )?),
            log_format: parse_or(&lookup, "LOG_FORMAT", LogFormat::Compact)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides on top of the environment.
    pub fn with_cli_overrides(mut self, cli: &Cli) -> Result<Self, String> {
        if let Some(host) = &cli.http_host {
            self.http_host = host.clone();
        }
        if let Some(port) = cli.http_port {
            self.http_port = port;
        }
        if let Some(host) = &cli.smtp_host {
            self.smtp_host = host.clone();
        }
        if let Some(port) = cli.smtp_port {
            self.smtp_port = port;
        }
        if let Some(hostname) = &cli.smtp_hostname {
            self.smtp_hostname = hostname.clone();
        }
        if let Some(username) = &cli.smtp_username {
            self.smtp_username = username.clone();
        }
        if let Some(capacity) = cli.alert_capacity {
            self.alert_capacity = capacity;
        }
        if let Some(capacity) = cli.email_capacity {
            self.email_capacity = capacity;
        }
        if let Some(bytes) = cli.max_payload_bytes {
            self.max_payload_bytes = bytes;
        }
        if let Some(bytes) = cli.smtp_max_message_bytes {
            self.smtp_max_message_bytes = bytes;
        }
        if let Some(seconds) = cli.smtp_idle_timeout {
            self.smtp_idle_timeout = Duration::from_secs(seconds);
        }
        if let Some(format) = &cli.log_format {
            self.log_format = format.parse()?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    pub fn smtp_addr(&self) -> String {
        format!("{}:{}", self.smtp_host, self.smtp_port)
    }

    fn validate(&self) -> Result<(), String> {
        if self.alert_capacity == 0 {
            return Err("ALERT_STORE_CAPACITY must be greater than zero".into());
        }
        if self.email_capacity == 0 {
            return Err("EMAIL_STORE_CAPACITY must be greater than zero".into());
        }
        if self.max_payload_bytes == 0 {
            return Err("MAX_PAYLOAD_BYTES must be greater than zero".into());
        }
        if self.smtp_max_message_bytes == 0 {
            return Err("SMTP_MAX_MESSAGE_BYTES must be greater than zero".into());
        }
        if self.smtp_idle_timeout.is_zero() {
            return Err("SMTP_IDLE_TIMEOUT_SECONDS must be greater than zero".into());
        }
        if self.smtp_username.is_empty() {
            return Err("SMTP_USERNAME must not be empty".into());
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, String>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| format!("{} must be a valid value, got '{}'", key, raw)),
        None => Ok(default),
    }
}

// The password must never reach the logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("http_host", &self.http_host)
            .field("http_port", &self.http_port)
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_hostname", &self.smtp_hostname)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &"*".repeat(self.smtp_password.len()))
            .field("alert_capacity", &self.alert_capacity)
            .field("email_capacity", &self.email_capacity)
            .field("max_payload_bytes", &self.max_payload_bytes)
            .field("smtp_max_message_bytes", &self.smtp_max_message_bytes)
            .field("smtp_idle_timeout", &self.smtp_idle_timeout)
            .field("log_format", &self.log_format)
            .finish()
    }
}
