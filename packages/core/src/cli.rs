use clap::Parser;

/// SMM Alert Receiver CLI arguments.
///
/// Every flag is optional and overrides the matching environment variable.
/// The SMTP password is only read from the environment.
#[derive(Debug, Default, Parser)]
#[command(
    name = "smm-alert-receiver",
    version,
    about = "Receives SMM alerts over HTTP and SMTP and serves them to a dashboard"
)]
pub struct Cli {
    /// Address the HTTP API binds to
    #[arg(long)]
    pub http_host: Option<String>,

    /// Port the HTTP API binds to
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Address the SMTP listener binds to
    #[arg(long)]
    pub smtp_host: Option<String>,

    /// Port the SMTP listener binds to
    #[arg(long)]
    pub smtp_port: Option<u16>,

    /// Hostname announced in the SMTP greeting
    #[arg(long)]
    pub smtp_hostname: Option<String>,

    /// Username SMTP clients must authenticate with
    #[arg(long)]
    pub smtp_username: Option<String>,

    /// Maximum number of alerts kept in memory
    #[arg(long)]
    pub alert_capacity: Option<usize>,

    /// Maximum number of emails kept in memory
    #[arg(long)]
    pub email_capacity: Option<usize>,

    /// Largest accepted HTTP alert body, in bytes
    #[arg(long)]
    pub max_payload_bytes: Option<usize>,

    /// Largest accepted SMTP message, in bytes
    #[arg(long)]
    pub smtp_max_message_bytes: Option<usize>,

    /// Seconds before an idle SMTP session is closed
    #[arg(long)]
    pub smtp_idle_timeout: Option<u64>,

    /// Log output format (compact or json)
    #[arg(long)]
    pub log_format: Option<String>,
}
