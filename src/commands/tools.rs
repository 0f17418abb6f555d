//! Tool listing command
//!
//! Prints the gateway's tools either as a table or as the raw descriptors in
//! JSON.

use crate::error::Result;
use crate::mcp::supervisor::ConnectionSupervisor;
use crate::mcp::types::ToolDescriptor;
use colored::Colorize;
use prettytable::{format, row, Table};

const DESCRIPTION_WIDTH: usize = 60;

/// List the tools offered by the connected gateway
///
/// # Arguments
///
/// * `supervisor` - A connected supervisor
/// * `json` - Print descriptors as JSON instead of a table
///
/// # Errors
///
/// Returns the supervisor's discovery error, or
/// `ToolgateError::Serialization` if JSON output fails
///
/// # Examples
///
/// ```no_run
/// use toolgate::commands::tools::list_tools;
/// use toolgate::mcp::config::GatewayConfig;
/// use toolgate::mcp::supervisor::ConnectionSupervisor;
///
/// # async fn example() -> anyhow::Result<()> {
/// let supervisor = ConnectionSupervisor::new(GatewayConfig::default());
/// supervisor.connect().await?;
/// list_tools(&supervisor, false).await?;
/// # Ok(())
/// # }
/// ```
pub async fn list_tools(supervisor: &ConnectionSupervisor, json: bool) -> Result<()> {
    tracing::debug!(json, "tools::list_tools");

    let tools = supervisor.list_tools().await?;

    if json {
        return super::print_json(&tools);
    }

    if tools.is_empty() {
        println!("{}", "The gateway offers no tools.".yellow());
        return Ok(());
    }

    let table = build_table(&tools);
    println!("\nAvailable tools ({}):\n", tools.len());
    table.printstd();
    println!();
    Ok(())
}

fn build_table(tools: &[ToolDescriptor]) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row!["Name".bold(), "Required".bold(), "Description".bold()]);

    for tool in tools {
        table.add_row(row![
            tool.name.cyan(),
            required_arguments(tool),
            super::truncate(&tool.description, DESCRIPTION_WIDTH)
        ]);
    }
    table
}

/// Comma-separated `required` names from the tool's input schema, or `-`
fn required_arguments(tool: &ToolDescriptor) -> String {
    let names: Vec<&str> = tool
        .input_schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();
    if names.is_empty() {
        "-".to_string()
    } else {
        names.join(", ")
    }
}
