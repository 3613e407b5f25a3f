//! approvald - Approval workflow service
//!
//! The daemon provides:
//! - REST API for definitions, requests, decisions and approver inboxes
//! - Deadline delivery from the tokio timer into the engine
//! - Periodic approver-resolution retries and an overdue sweep

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use workflow_daemon::config::DaemonConfig;
use workflow_daemon::error::{DaemonError, DaemonResult};
use workflow_daemon::server::Server;

/// approvald CLI
#[derive(Parser)]
#[command(name = "approvald")]
#[command(about = "approvald - Approval workflow service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "APPROVALD_CONFIG")]
    config: Option<String>,

    /// Listen address (overrides the configuration file)
    #[arg(short, long, env = "APPROVALD_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level
    #[arg(long, env = "APPROVALD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "APPROVALD_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Configuration first: logging settings may come from the file
    let mut config =
        DaemonConfig::load(cli.config.as_deref()).map_err(|e| DaemonError::Config(e.to_string()))?;

    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    println!(
        r#"
   __ _ _ __  _ __  _ __ _____   ____ _| | __| |
  / _` | '_ \| '_ \| '__/ _ \ \ / / _` | |/ _` |
 | (_| | |_) | |_) | | | (_) \ V / (_| | | (_| |
  \__,_| .__/| .__/|_|  \___/ \_/ \__,_|_|\__,_|
       |_|   |_|

  Approval workflow service
  Version: {}
  Listening: {}
"#,
        env!("CARGO_PKG_VERSION"),
        config.server.listen_addr
    );

    let server = Server::new(config)?;
    server.run().await
}
