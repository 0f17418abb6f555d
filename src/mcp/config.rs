//! Gateway connection configuration
//!
//! [`GatewayConfig`] holds every knob the connection supervisor needs. All
//! values are plain data; nothing here touches the network or the
//! environment. Loading from YAML, environment variables, and CLI flags is
//! handled by [`crate::config::Config`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ToolgateError};
use crate::mcp::types::Implementation;

/// Upper bound accepted for `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Which transport to speak to the gateway over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Newline-delimited JSON over a child process's stdio
    Stdio,
    /// Server-Sent Events stream plus POSTs
    Sse,
    /// One POST per message; JSON or event-stream replies
    #[default]
    StreamingHttp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::StreamingHttp => "streaming-http",
        })
    }
}

impl FromStr for TransportKind {
    type Err = ToolgateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "stdio" => Ok(TransportKind::Stdio),
            "sse" => Ok(TransportKind::Sse),
            "streaming-http" | "streaming_http" | "http" => Ok(TransportKind::StreamingHttp),
            other => Err(ToolgateError::Config(format!(
                "Invalid transport: {other}. Must be one of: stdio, sse, streaming-http"
            ))),
        }
    }
}

/// Connection settings for one gateway.
///
/// # Examples
///
/// ```
/// use toolgate::mcp::config::{GatewayConfig, TransportKind};
///
/// let cfg = GatewayConfig::default();
/// assert_eq!(cfg.transport, TransportKind::StreamingHttp);
/// assert_eq!(cfg.max_retries, 3);
/// assert_eq!(cfg.call_timeout().as_secs(), 30);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway URL for `sse` and `streaming-http`
    #[serde(default = "default_url")]
    pub url: String,

    /// Transport to use
    #[serde(default)]
    pub transport: TransportKind,

    /// Program to spawn for `stdio`
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments for `command`
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment for `command`; the child inherits nothing else
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Extra headers sent on every HTTP request
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Cookies sent on every SSE request
    #[serde(default)]
    pub cookies: HashMap<String, String>,

    /// Deadline for each call, in seconds
    #[serde(default = "default_call_timeout_seconds")]
    pub call_timeout_seconds: u64,

    /// Deadline for establishing a connection, in seconds
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,

    /// Connection retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff before the first retry, in milliseconds
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Backoff cap, in seconds
    #[serde(default = "default_max_backoff_seconds")]
    pub max_backoff_seconds: u64,

    /// How long discovered tools stay cached, in seconds
    #[serde(default = "default_tool_cache_ttl_seconds")]
    pub tool_cache_ttl_seconds: u64,

    /// Interval between background health checks, in seconds
    #[serde(default = "default_health_check_interval_seconds")]
    pub health_check_interval_seconds: u64,

    /// Health probes slower than this are reported as degraded
    #[serde(default = "default_health_response_threshold_ms")]
    pub health_response_threshold_ms: u64,

    /// Client name sent in the handshake
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// Client version sent in the handshake
    #[serde(default = "default_client_version")]
    pub client_version: String,
}

fn default_url() -> String {
    "http://localhost:8000/mcp".to_string()
}

fn default_call_timeout_seconds() -> u64 {
    30
}

fn default_connect_timeout_seconds() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_max_backoff_seconds() -> u64 {
    10
}

fn default_tool_cache_ttl_seconds() -> u64 {
    300
}

fn default_health_check_interval_seconds() -> u64 {
    30
}

fn default_health_response_threshold_ms() -> u64 {
    5000
}

fn default_client_name() -> String {
    "toolgate".to_string()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            transport: TransportKind::default(),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            headers: HashMap::new(),
            cookies: HashMap::new(),
            call_timeout_seconds: default_call_timeout_seconds(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            max_backoff_seconds: default_max_backoff_seconds(),
            tool_cache_ttl_seconds: default_tool_cache_ttl_seconds(),
            health_check_interval_seconds: default_health_check_interval_seconds(),
            health_response_threshold_ms: default_health_response_threshold_ms(),
            client_name: default_client_name(),
            client_version: default_client_version(),
        }
    }
}

impl GatewayConfig {
    /// Per-call deadline.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    /// Connection establishment deadline.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Delay before the first retry.
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Backoff cap.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_seconds)
    }

    /// Tool cache lifetime.
    pub fn tool_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.tool_cache_ttl_seconds)
    }

    /// Background health check interval.
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    /// Slowest acceptable health probe.
    pub fn health_response_threshold(&self) -> Duration {
        Duration::from_millis(self.health_response_threshold_ms)
    }

    /// Identity sent in the handshake.
    pub fn client_info(&self) -> Implementation {
        Implementation {
            name: self.client_name.clone(),
            version: self.client_version.clone(),
        }
    }

    /// Parse [`Self::url`].
    ///
    /// # Errors
    ///
    /// [`ToolgateError::Config`] if the URL is malformed.
    pub fn parsed_url(&self) -> Result<url::Url> {
        url::Url::parse(&self.url)
            .map_err(|e| ToolgateError::Config(format!("Invalid gateway url '{}': {e}", self.url)))
    }

    /// Check that the settings are usable.
    ///
    /// # Errors
    ///
    /// [`ToolgateError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        match self.transport {
            TransportKind::Stdio => {
                if self.command.as_deref().map_or(true, |c| c.trim().is_empty()) {
                    return Err(ToolgateError::Config(
                        "gateway.command is required for the stdio transport".to_string(),
                    ));
                }
            }
            TransportKind::Sse | TransportKind::StreamingHttp => {
                let url = self.parsed_url()?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(ToolgateError::Config(format!(
                        "gateway.url must be http or https, got '{}'",
                        url.scheme()
                    )));
                }
            }
        }

        if self.call_timeout_seconds == 0 {
            return Err(ToolgateError::Config(
                "gateway.call_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.connect_timeout_seconds == 0 {
            return Err(ToolgateError::Config(
                "gateway.connect_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ToolgateError::Config(format!(
                "gateway.max_retries must be less than or equal to {MAX_RETRIES_LIMIT}"
            )));
        }
        if self.tool_cache_ttl_seconds == 0 {
            return Err(ToolgateError::Config(
                "gateway.tool_cache_ttl_seconds must be greater than 0".to_string(),
            ));
        }
        if self.health_check_interval_seconds == 0 {
            return Err(ToolgateError::Config(
                "gateway.health_check_interval_seconds must be greater than 0".to_string(),
            ));
        }
        if self.health_response_threshold_ms == 0 {
            return Err(ToolgateError::Config(
                "gateway.health_response_threshold_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(GatewayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_transport_kind_serialization() {
        assert_eq!(
            serde_yaml::to_string(&TransportKind::StreamingHttp).unwrap().trim(),
            "streaming-http"
        );
        let kind: TransportKind = serde_yaml::from_str("sse").unwrap();
        assert_eq!(kind, TransportKind::Sse);
    }

    #[test]
    fn test_transport_kind_from_str() {
        assert_eq!("STDIO".parse::<TransportKind>().unwrap(), TransportKind::Stdio);
        assert_eq!(
            "streaming_http".parse::<TransportKind>().unwrap(),
            TransportKind::StreamingHttp
        );
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
    }

    #[test]
    fn test_stdio_requires_command() {
        let cfg = GatewayConfig {
            transport: TransportKind::Stdio,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = GatewayConfig {
            transport: TransportKind::Stdio,
            command: Some("gateway".to_string()),
            url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_network_transport_requires_http_url() {
        let cfg = GatewayConfig {
            url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = GatewayConfig {
            url: "ftp://gw/mcp".to_string(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_limits() {
        let cfg = GatewayConfig {
            max_retries: 11,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = GatewayConfig {
            call_timeout_seconds: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = GatewayConfig {
            health_response_threshold_ms: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let cfg: GatewayConfig = serde_yaml::from_str("url: http://gw:9/mcp\nmax_retries: 1\n").unwrap();
        assert_eq!(cfg.url, "http://gw:9/mcp");
        assert_eq!(cfg.max_retries, 1);
        assert_eq!(cfg.tool_cache_ttl(), Duration::from_secs(300));
        assert_eq!(cfg.client_name, "toolgate");
    }
}
