//! Configuration management for Toolgate
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//!
//! Precedence, lowest to highest: built-in defaults, YAML file,
//! `TOOLGATE_*` environment variables, command-line flags.

use crate::error::{Result, ToolgateError};
use crate::mcp::config::{GatewayConfig, TransportKind};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Log levels accepted by `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for Toolgate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Gateway connection settings
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level for the `toolgate` target when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed, or if a
    /// CLI override is invalid
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli)?;

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ToolgateError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ToolgateError::Config(format!("Failed to parse config: {}", e)))
    }

    fn apply_env_vars(&mut self) {
        if let Ok(url) = std::env::var("TOOLGATE_URL") {
            self.gateway.url = url;
        }

        if let Ok(transport) = std::env::var("TOOLGATE_TRANSPORT") {
            match transport.parse::<TransportKind>() {
                Ok(kind) => self.gateway.transport = kind,
                Err(_) => tracing::warn!("Invalid TOOLGATE_TRANSPORT: {}", transport),
            }
        }

        if let Ok(timeout) = std::env::var("TOOLGATE_CALL_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.gateway.call_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid TOOLGATE_CALL_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(retries) = std::env::var("TOOLGATE_MAX_RETRIES") {
            if let Ok(value) = retries.parse() {
                self.gateway.max_retries = value;
            } else {
                tracing::warn!("Invalid TOOLGATE_MAX_RETRIES: {}", retries);
            }
        }

        if let Ok(ttl) = std::env::var("TOOLGATE_TOOL_CACHE_TTL_SECONDS") {
            if let Ok(value) = ttl.parse() {
                self.gateway.tool_cache_ttl_seconds = value;
            } else {
                tracing::warn!("Invalid TOOLGATE_TOOL_CACHE_TTL_SECONDS: {}", ttl);
            }
        }

        if let Ok(level) = std::env::var("TOOLGATE_LOG_LEVEL") {
            self.logging.level = level.to_lowercase();
        }

        if let Ok(json) = std::env::var("TOOLGATE_JSON_LOGS") {
            match json.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.logging.json = true,
                "0" | "false" | "no" => self.logging.json = false,
                _ => tracing::warn!("Invalid TOOLGATE_JSON_LOGS: {}", json),
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) -> Result<()> {
        if let Some(url) = &cli.url {
            self.gateway.url = url.clone();
        }
        if let Some(transport) = &cli.transport {
            self.gateway.transport = transport.parse()?;
        }
        if cli.json_logs {
            self.logging.json = true;
        }
        if cli.verbose {
            self.logging.level = "debug".to_string();
            tracing::debug!("Verbose mode enabled");
        }
        Ok(())
    }

    /// Validate the configuration
    ///
    /// # Returns
    ///
    /// Returns Ok if configuration is valid
    ///
    /// # Errors
    ///
    /// Returns [`ToolgateError::Config`] naming the first failing check
    pub fn validate(&self) -> Result<()> {
        self.gateway.validate()?;

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ToolgateError::Config(format!(
                "Invalid logging.level: {}. Must be one of: {}",
                self.logging.level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use serial_test::serial;
    use std::io::Write;

    const ENV_VARS: &[&str] = &[
        "TOOLGATE_URL",
        "TOOLGATE_TRANSPORT",
        "TOOLGATE_CALL_TIMEOUT_SECONDS",
        "TOOLGATE_MAX_RETRIES",
        "TOOLGATE_TOOL_CACHE_TTL_SECONDS",
        "TOOLGATE_LOG_LEVEL",
        "TOOLGATE_JSON_LOGS",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    fn write_yaml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    #[serial]
    fn test_load_nonexistent_file_uses_defaults() {
        clear_env();
        let config = Config::load("nonexistent.yaml", &Cli::default()).unwrap();
        assert_eq!(config.gateway, GatewayConfig::default());
    }

    #[test]
    #[serial]
    fn test_config_from_yaml() {
        clear_env();
        let file = write_yaml(
            r#"
gateway:
  url: http://gateway.internal:9000/mcp
  transport: sse
  max_retries: 5
  headers:
    Authorization: Bearer abc
logging:
  level: debug
  json: true
"#,
        );
        let config = Config::load(file.path().to_str().unwrap(), &Cli::default()).unwrap();
        assert_eq!(config.gateway.url, "http://gateway.internal:9000/mcp");
        assert_eq!(config.gateway.transport, TransportKind::Sse);
        assert_eq!(config.gateway.max_retries, 5);
        assert_eq!(
            config.gateway.headers.get("Authorization").map(String::as_str),
            Some("Bearer abc")
        );
        assert_eq!(config.gateway.call_timeout_seconds, 30);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    #[serial]
    fn test_malformed_yaml_is_config_error() {
        clear_env();
        let file = write_yaml("gateway: [unclosed");
        let err = Config::load(file.path().to_str().unwrap(), &Cli::default()).unwrap_err();
        assert!(matches!(err, ToolgateError::Config(_)));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        clear_env();
        let file = write_yaml("gateway:\n  url: http://from-file/mcp\n  max_retries: 1\n");
        std::env::set_var("TOOLGATE_URL", "http://from-env/mcp");
        std::env::set_var("TOOLGATE_MAX_RETRIES", "7");
        std::env::set_var("TOOLGATE_TRANSPORT", "stdio");
        std::env::set_var("TOOLGATE_JSON_LOGS", "true");

        let config = Config::load(file.path().to_str().unwrap(), &Cli::default()).unwrap();
        clear_env();

        assert_eq!(config.gateway.url, "http://from-env/mcp");
        assert_eq!(config.gateway.max_retries, 7);
        assert_eq!(config.gateway.transport, TransportKind::Stdio);
        assert!(config.logging.json);
    }

    #[test]
    #[serial]
    fn test_invalid_env_values_are_ignored() {
        clear_env();
        std::env::set_var("TOOLGATE_MAX_RETRIES", "many");
        std::env::set_var("TOOLGATE_TRANSPORT", "pigeon");

        let config = Config::load("nonexistent.yaml", &Cli::default()).unwrap();
        clear_env();

        assert_eq!(config.gateway.max_retries, 3);
        assert_eq!(config.gateway.transport, TransportKind::StreamingHttp);
    }

    #[test]
    #[serial]
    fn test_cli_overrides_env() {
        clear_env();
        std::env::set_var("TOOLGATE_URL", "http://from-env/mcp");
        let cli = Cli {
            url: Some("http://from-cli/mcp".to_string()),
            transport: Some("sse".to_string()),
            verbose: true,
            json_logs: true,
            command: Commands::Health { json: false },
            ..Cli::default()
        };

        let config = Config::load("nonexistent.yaml", &cli).unwrap();
        clear_env();

        assert_eq!(config.gateway.url, "http://from-cli/mcp");
        assert_eq!(config.gateway.transport, TransportKind::Sse);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    #[serial]
    fn test_invalid_cli_transport_is_error() {
        clear_env();
        let cli = Cli {
            transport: Some("pigeon".to_string()),
            ..Cli::default()
        };
        assert!(Config::load("nonexistent.yaml", &cli).is_err());
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_propagates_gateway_errors() {
        let mut config = Config::default();
        config.gateway.max_retries = 100;
        assert!(config.validate().is_err());
    }
}
