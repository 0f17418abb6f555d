//! Toolgate - tool-invocation client for MCP gateways
//!
#![doc = "Toolgate - tool-invocation client for MCP gateways"]
#![doc = "Main entry point for the toolgate command-line client."]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use toolgate::cli::{Cli, Commands};
use toolgate::commands;
use toolgate::config::{Config, LoggingConfig};
use toolgate::mcp::supervisor::{ConnectionSupervisor, HealthStatus};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration; logging settings live in it, so tracing starts after
    let config_path = cli.config.as_deref().unwrap_or("toolgate.yaml");
    let config = Config::load(config_path, &cli)?;

    init_tracing(&config.logging);

    // Validate configuration
    config.validate()?;

    let supervisor = Arc::new(ConnectionSupervisor::new(config.gateway.clone()));
    tracing::debug!(
        transport = %config.gateway.transport,
        url = %config.gateway.url,
        "Supervisor created"
    );

    // Execute command
    match cli.command {
        Commands::Tools { json } => {
            tracing::info!("Listing gateway tools");
            supervisor.connect().await?;
            let result = commands::tools::list_tools(&supervisor, json).await;
            supervisor.close().await;
            result?;
            Ok(())
        }
        Commands::Call { tool, args, json } => {
            supervisor.connect().await?;
            let result =
                commands::call::call_tool(&supervisor, &tool, args.as_deref(), json).await;
            supervisor.close().await;
            result?;
            Ok(())
        }
        Commands::Health { json } => {
            // An unreachable gateway is a health result, not a startup failure
            if let Err(e) = supervisor.connect().await {
                tracing::warn!("Could not connect to gateway: {}", e);
            }
            let report = commands::health::check_health(&supervisor, json).await;
            supervisor.close().await;
            let report = report?;
            if report.status != HealthStatus::Healthy {
                anyhow::bail!("gateway is {}", report.status);
            }
            Ok(())
        }
        Commands::Watch { interval } => {
            if let Err(e) = supervisor.connect().await {
                tracing::warn!("Could not connect to gateway: {}", e);
            }
            let interval = interval
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.gateway.health_check_interval());
            let result = commands::health::watch_health(Arc::clone(&supervisor), interval).await;
            supervisor.close().await;
            result?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// `RUST_LOG` wins over the configured level. Logs go to stderr so command
/// output on stdout stays machine-readable.
fn init_tracing(logging: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("toolgate={}", logging.level)));

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
