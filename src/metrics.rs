//! Metrics emitted through the `metrics` facade
//!
//! The library never installs a recorder; applications that want these
//! series install one (Prometheus, StatsD, ...) before connecting.
//!
//! # Metrics
//!
//! - `toolgate_requests_total`: Counter of JSON-RPC requests sent, by method
//! - `toolgate_errors_total`: Counter of failed supervised operations, by kind
//! - `toolgate_tool_calls_total`: Counter of tool invocations, by tool and status
//! - `toolgate_tool_duration_seconds`: Histogram of tool invocation wall time
//! - `toolgate_tool_calls_active`: Gauge of tool invocations in flight
//!
//! # Examples
//!
//! ```
//! use toolgate::metrics::ToolCallMetrics;
//!
//! let metrics = ToolCallMetrics::new("echo");
//! metrics.record_completion("success");
//! ```

use std::cell::Cell;
use std::time::{Duration, Instant};

use metrics::{decrement_gauge, histogram, increment_counter, increment_gauge};

use crate::error::ErrorKind;

/// Count one outbound JSON-RPC request.
pub fn record_request(method: &str) {
    increment_counter!("toolgate_requests_total", "method" => method.to_string());
}

/// Count one failed supervised operation.
pub fn record_error(kind: ErrorKind) {
    increment_counter!("toolgate_errors_total", "kind" => kind.as_str());
}

/// Metrics for a single tool invocation
///
/// Increments the active gauge on creation; the first call to
/// [`ToolCallMetrics::record_completion`] records duration and status and
/// decrements the gauge. Dropping an unrecorded tracker counts as
/// `"cancelled"`, so a caller dropping the future mid-call is still
/// accounted for.
#[derive(Debug)]
pub struct ToolCallMetrics {
    tool: String,
    start: Instant,
    recorded: Cell<bool>,
}

impl ToolCallMetrics {
    /// Start tracking an invocation of `tool`.
    pub fn new(tool: impl Into<String>) -> Self {
        let tool = tool.into();
        increment_gauge!("toolgate_tool_calls_active", 1.0, "tool" => tool.clone());
        Self {
            tool,
            start: Instant::now(),
            recorded: Cell::new(false),
        }
    }

    /// Record the outcome of the invocation.
    ///
    /// # Arguments
    ///
    /// * `status` - `"success"`, `"tool_error"`, `"invalid_arguments"`, ...
    ///
    /// # Returns
    ///
    /// Wall-clock time since the tracker was created.
    pub fn record_completion(&self, status: &str) -> Duration {
        let elapsed = self.start.elapsed();
        if self.recorded.replace(true) {
            return elapsed;
        }

        histogram!(
            "toolgate_tool_duration_seconds",
            elapsed.as_secs_f64(),
            "tool" => self.tool.clone()
        );
        increment_counter!(
            "toolgate_tool_calls_total",
            "tool" => self.tool.clone(),
            "status" => status.to_string()
        );
        decrement_gauge!("toolgate_tool_calls_active", 1.0, "tool" => self.tool.clone());
        elapsed
    }

    /// The tool this tracker belongs to.
    pub fn tool(&self) -> &str {
        &self.tool
    }
}

impl Drop for ToolCallMetrics {
    fn drop(&mut self) {
        if !self.recorded.get() {
            self.record_completion("cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_completion_only_once() {
        let metrics = ToolCallMetrics::new("echo");
        let first = metrics.record_completion("success");
        let second = metrics.record_completion("tool_error");
        assert!(second >= first);
        assert!(metrics.recorded.get());
    }

    #[test]
    fn test_tool_label() {
        let metrics = ToolCallMetrics::new("search");
        assert_eq!(metrics.tool(), "search");
    }

    #[test]
    fn test_free_functions_without_recorder() {
        record_request("tools/list");
        record_error(ErrorKind::Timeout);
    }
}
