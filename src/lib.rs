//! Toolgate - tool-invocation client library for MCP gateways
//!
//! This library connects to a tool gateway that speaks JSON-RPC 2.0 over
//! stdio, Server-Sent Events, or streaming HTTP, negotiates a session,
//! discovers the gateway's tools, and invokes them with schema-validated
//! arguments. A supervisor adds retry with exponential backoff and health
//! reporting.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `mcp`: Transports, protocol engine, session, tool registry, result
//!   normalizer, and connection supervisor
//! - `config`: Configuration loading and validation
//! - `error`: Error types and result aliases
//! - `metrics`: `metrics` facade counters and histograms
//! - `cli` / `commands`: Command-line interface and its handlers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use toolgate::{Config, ConnectionSupervisor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("toolgate.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let supervisor = Arc::new(ConnectionSupervisor::new(config.gateway));
//!     supervisor.connect().await?;
//!     let outcome = supervisor
//!         .execute("echo", serde_json::json!({"text": "hello"}))
//!         .await?;
//!     println!("{}", outcome.result.content);
//!     supervisor.close().await;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod mcp;
pub mod metrics;

// Re-export commonly used types
pub use config::Config;
pub use error::{ErrorKind, Result, ToolgateError};
pub use mcp::config::{GatewayConfig, TransportKind};
pub use mcp::normalize::NormalizedResult;
pub use mcp::registry::{ToolOutcome, ToolRegistry};
pub use mcp::supervisor::{ConnectionSupervisor, HealthReport, HealthStatus};
pub use mcp::types::ToolDescriptor;
