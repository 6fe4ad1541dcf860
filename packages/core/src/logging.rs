use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogFormat;

/// Initialize structured logging for the application.
///
/// `RUST_LOG` wins over the built-in default filter. Must be called once
/// at startup (in main.rs).
pub fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    match format {
        LogFormat::Compact => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init(),
        LogFormat::Json => fmt()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .init(),
    }

    info!(?format, "Logging initialized");
}
