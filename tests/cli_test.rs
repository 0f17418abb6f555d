//! Command-line integration tests
//!
//! Runs the `toolgate` binary with `assert_cmd`, pointing it at the
//! `mcp_test_server` stdio gateway through a temporary config file.

mod common;

use assert_cmd::Command;
use predicates::prelude::*;

use common::{temp_config_file, test_server_exe};

fn toolgate() -> Command {
    let mut cmd = Command::cargo_bin("toolgate").unwrap();
    for var in [
        "TOOLGATE_URL",
        "TOOLGATE_TRANSPORT",
        "TOOLGATE_CALL_TIMEOUT_SECONDS",
        "TOOLGATE_MAX_RETRIES",
        "TOOLGATE_TOOL_CACHE_TTL_SECONDS",
        "TOOLGATE_LOG_LEVEL",
        "TOOLGATE_JSON_LOGS",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn stdio_config() -> String {
    format!(
        "gateway:\n  transport: stdio\n  command: \"{}\"\n  max_retries: 0\n  call_timeout_seconds: 5\n",
        test_server_exe()
    )
}

#[test]
fn test_help_lists_commands() {
    toolgate()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("tools"))
        .stdout(predicate::str::contains("call"))
        .stdout(predicate::str::contains("health"))
        .stdout(predicate::str::contains("watch"));
}

#[test]
fn test_invalid_transport_flag_fails() {
    toolgate()
        .args(["--config", "does-not-exist.yaml", "--transport", "pigeon", "tools"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid transport"));
}

#[test]
fn test_stdio_without_command_fails_validation() {
    toolgate()
        .args(["--config", "does-not-exist.yaml", "--transport", "stdio", "tools"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("gateway.command"));
}

#[test]
fn test_tools_json_lists_descriptors() {
    let (_dir, path) = temp_config_file(&stdio_config());
    toolgate()
        .args(["--config", path.to_str().unwrap(), "tools", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"name\": \"echo\""))
        .stdout(predicate::str::contains("\"inputSchema\""));
}

#[test]
fn test_call_prints_content() {
    let (_dir, path) = temp_config_file(&stdio_config());
    toolgate()
        .args([
            "--config",
            path.to_str().unwrap(),
            "call",
            "echo",
            "--args",
            r#"{"text":"hello from the cli"}"#,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello from the cli"));
}

#[test]
fn test_call_with_invalid_arguments_fails() {
    let (_dir, path) = temp_config_file(&stdio_config());
    toolgate()
        .args(["--config", path.to_str().unwrap(), "call", "echo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid arguments for tool 'echo'"));
}

#[test]
fn test_call_tool_error_fails() {
    let (_dir, path) = temp_config_file(&stdio_config());
    toolgate()
        .args(["--config", path.to_str().unwrap(), "call", "fail"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("deliberate failure"));
}

#[test]
fn test_health_reports_healthy() {
    let (_dir, path) = temp_config_file(&stdio_config());
    toolgate()
        .args(["--config", path.to_str().unwrap(), "health", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"healthy\""))
        .stdout(predicate::str::contains("\"tool_count\": 4"));
}

#[test]
fn test_health_unreachable_gateway_exits_non_zero() {
    toolgate()
        .args([
            "--config",
            "does-not-exist.yaml",
            "--url",
            "http://127.0.0.1:1/mcp",
            "health",
        ])
        .env("TOOLGATE_MAX_RETRIES", "0")
        .assert()
        .failure()
        .stdout(predicate::str::contains("disconnected"));
}
