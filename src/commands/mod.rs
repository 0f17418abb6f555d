/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

- `tools`: List the gateway's tools
- `call`: Invoke one tool with JSON arguments
- `health`: One-shot and periodic health checks

Each handler takes an already-constructed [`ConnectionSupervisor`] so the
entrypoint owns connection setup and teardown.

[`ConnectionSupervisor`]: crate::mcp::supervisor::ConnectionSupervisor
*/

// Tool listing
pub mod tools;

// Tool invocation
pub mod call;

// Health checks
pub mod health;

use crate::error::{Result, ToolgateError};
use serde::Serialize;

/// Print a value as pretty JSON on stdout
///
/// # Errors
///
/// Returns `ToolgateError::Serialization` if serialization fails
pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(ToolgateError::Serialization)?;
    println!("{}", json);
    Ok(())
}

/// Shorten `text` to at most `max` characters, ending in `...` when cut
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}
