//! Command-line interface definition for Toolgate
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to list tools, call a tool, and check gateway health.

use clap::{Parser, Subcommand};

/// Toolgate - tool-invocation client for MCP gateways
///
/// Connects to a gateway over stdio, SSE, or streaming HTTP, discovers its
/// tools, and invokes them with validated arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "toolgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "toolgate.yaml")]
    pub config: Option<String>,

    /// Gateway URL (overrides config and TOOLGATE_URL)
    #[arg(long)]
    pub url: Option<String>,

    /// Transport: stdio, sse, or streaming-http
    #[arg(long)]
    pub transport: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Toolgate
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List the tools the gateway offers
    Tools {
        /// Print the tool descriptors as JSON
        #[arg(long)]
        json: bool,
    },

    /// Invoke one tool
    Call {
        /// Tool name
        tool: String,

        /// Arguments as a JSON object
        #[arg(short, long)]
        args: Option<String>,

        /// Print the full normalized result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one health check and exit non-zero unless healthy
    Health {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run health checks periodically until interrupted
    Watch {
        /// Seconds between checks (defaults to the configured interval)
        #[arg(short, long)]
        interval: Option<u64>,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("toolgate.yaml".to_string()),
            url: None,
            transport: None,
            verbose: false,
            json_logs: false,
            command: Commands::Tools { json: false },
        }
    }
}
