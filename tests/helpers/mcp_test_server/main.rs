//! Gateway test server binary for integration tests
//!
//! This binary implements a minimal tool gateway that communicates over
//! stdin/stdout using newline-delimited JSON-RPC. Integration tests launch
//! it through the stdio transport so the whole client stack runs against a
//! real child process.
//!
//! # Handled Methods
//!
//! - `initialize` -- protocol version `2025-03-26`, `tools` capability.
//! - `tools/list` -- four tools:
//!   - `echo` returns its required `text` argument.
//!   - `fail` always answers with `isError: true`.
//!   - `getenv` returns the value of the environment variable `name`.
//!   - `sleep` blocks for `ms` milliseconds before answering.
//! - `tools/call` -- dispatches to the tools above.
//! - `ping` -- empty result.
//! - Notifications (no `id`) are ignored.
//! - All other methods -- `-32601 Method not found`.
//!
//! The server exits when stdin reaches end of file.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use serde_json::{json, Value};

fn main() {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                if !write_line(&mut out, &make_error(&Value::Null, -32700, "Parse error")) {
                    break;
                }
                continue;
            }
        };

        // Notifications carry no id and get no answer
        let Some(id) = request.get("id").cloned() else {
            continue;
        };

        let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
        let response = match method {
            "initialize" => handle_initialize(&id),
            "tools/list" => handle_tools_list(&id),
            "tools/call" => handle_tools_call(&id, &request),
            "ping" => make_result(&id, json!({})),
            _ => make_error(&id, -32601, &format!("Method not found: {}", method)),
        };

        if !write_line(&mut out, &response) {
            break;
        }
    }
}

/// Write one message followed by `\n`; `false` once stdout is gone.
fn write_line(out: &mut impl Write, message: &Value) -> bool {
    let serialized = match serde_json::to_string(message) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("mcp_test_server: failed to serialize response: {}", e);
            return true;
        }
    };
    writeln!(out, "{}", serialized).is_ok() && out.flush().is_ok()
}

fn handle_initialize(id: &Value) -> Value {
    make_result(
        id,
        json!({
            "protocolVersion": "2025-03-26",
            "capabilities": { "tools": { "listChanged": true } },
            "serverInfo": { "name": "mcp-test-server", "version": "0.1.0" }
        }),
    )
}

fn handle_tools_list(id: &Value) -> Value {
    make_result(
        id,
        json!({
            "tools": [
                {
                    "name": "echo",
                    "description": "Echoes the text argument",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "text": { "type": "string" } },
                        "required": ["text"]
                    }
                },
                {
                    "name": "fail",
                    "description": "Always reports a tool error",
                    "inputSchema": { "type": "object" }
                },
                {
                    "name": "getenv",
                    "description": "Returns the value of an environment variable",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "name": { "type": "string" } },
                        "required": ["name"]
                    }
                },
                {
                    "name": "sleep",
                    "description": "Waits before answering",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "ms": { "type": "integer", "minimum": 0 } },
                        "required": ["ms"]
                    }
                }
            ]
        }),
    )
}

fn handle_tools_call(id: &Value, request: &Value) -> Value {
    let params = request.get("params").unwrap_or(&Value::Null);
    let tool_name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
    let arguments = params.get("arguments").unwrap_or(&Value::Null);

    match tool_name {
        "echo" => {
            let text = arguments.get("text").and_then(|t| t.as_str()).unwrap_or("");
            make_result(id, text_content(text, false))
        }
        "fail" => make_result(id, text_content("deliberate failure", true)),
        "getenv" => {
            let name = arguments.get("name").and_then(|n| n.as_str()).unwrap_or("");
            let value = std::env::var(name).unwrap_or_default();
            make_result(id, text_content(&value, false))
        }
        "sleep" => {
            let ms = arguments.get("ms").and_then(|m| m.as_u64()).unwrap_or(0);
            std::thread::sleep(Duration::from_millis(ms));
            make_result(id, text_content("awake", false))
        }
        other => make_error(id, -32602, &format!("Unknown tool: {}", other)),
    }
}

fn text_content(text: &str, is_error: bool) -> Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error
    })
}

fn make_result(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Build a JSON-RPC error response.
fn make_error(id: &Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}
