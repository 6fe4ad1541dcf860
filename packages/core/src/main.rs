use clap::Parser;
use dotenvy::dotenv;

use smm_alert_receiver::cli::Cli;
use smm_alert_receiver::config::{Config, LogFormat};
use smm_alert_receiver::error::AppError;
use smm_alert_receiver::logging::init_logging;
use smm_alert_receiver::server::Server;

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env()
        .and_then(|config| config.with_cli_overrides(&cli))
        .map_err(AppError::Config);
    let config = match config {
        Ok(config) => config,
        Err(err) => {
            init_logging(LogFormat::Compact);
            tracing::error!("{}", err);
            std::process::exit(1);
        }
    };

    init_logging(config.log_format);
    tracing::info!("Service starting with config: {:?}", config);

    let server = match Server::bind(&config).await {
        Ok(server) => server,
        Err(err) => {
            tracing::error!("{}", err);
            std::process::exit(1);
        }
    };

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    if let Err(err) = server.run(shutdown).await {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}
