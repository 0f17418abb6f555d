//! Health check commands
//!
//! `health` runs a single check and reports whether the gateway is usable;
//! `watch` keeps the supervisor's health monitor running until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::mcp::supervisor::{ConnectionSupervisor, HealthReport, HealthStatus};

/// Run one health check and print the report
///
/// # Arguments
///
/// * `supervisor` - The supervisor to probe; it may be disconnected
/// * `json` - Print the report as JSON
///
/// # Returns
///
/// Returns the report so the caller can pick an exit status
///
/// # Errors
///
/// Returns `ToolgateError::Serialization` if JSON output fails
pub async fn check_health(supervisor: &ConnectionSupervisor, json: bool) -> Result<HealthReport> {
    let report = supervisor.health_check().await;

    if json {
        super::print_json(&report)?;
    } else {
        println!("{}", format_report(&report));
    }
    Ok(report)
}

/// One-line human-readable rendering of a report
pub fn format_report(report: &HealthReport) -> String {
    let status = match report.status {
        HealthStatus::Healthy => report.status.to_string().green(),
        HealthStatus::Degraded => report.status.to_string().yellow(),
        HealthStatus::Disconnected => report.status.to_string().red(),
    };

    let mut line = format!("{}", status);
    if let Some(ms) = report.response_time_ms {
        line.push_str(&format!("  response={}ms", ms));
    }
    if let Some(count) = report.tool_count {
        line.push_str(&format!("  tools={}", count));
    }
    line.push_str(&format!("  error_rate={:.2}", report.error_rate));
    if let Some(message) = &report.message {
        line.push_str(&format!("  ({})", message));
    }
    line
}

/// Run periodic health checks until Ctrl-C
///
/// # Arguments
///
/// * `supervisor` - The supervisor to probe
/// * `interval` - Time between checks
///
/// # Errors
///
/// Returns `ToolgateError::Io` if the Ctrl-C handler cannot be installed
pub async fn watch_health(supervisor: Arc<ConnectionSupervisor>, interval: Duration) -> Result<()> {
    tracing::info!(interval_secs = interval.as_secs(), "Watching gateway health");

    let cancellation = CancellationToken::new();
    let monitor = supervisor.spawn_health_monitor(interval, cancellation.clone());

    let interrupted = tokio::signal::ctrl_c().await;
    cancellation.cancel();
    if let Err(e) = monitor.await {
        tracing::warn!("Health monitor task failed: {}", e);
    }

    interrupted?;
    tracing::info!("Stopped watching");
    Ok(())
}
