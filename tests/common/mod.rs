//! Shared fixtures for integration tests.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;

use toolgate::error::{Result, ToolgateError};
use toolgate::mcp::supervisor::TransportFactory;
use toolgate::mcp::transport::fake::{FakeReply, FakeTransport};
use toolgate::mcp::transport::Transport;
use toolgate::mcp::types::JsonRpcError;

/// Path of the stdio gateway binary built alongside the tests.
#[allow(dead_code)]
pub fn test_server_exe() -> String {
    env!("CARGO_BIN_EXE_mcp_test_server").to_string()
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("toolgate.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Valid `initialize` result.
#[allow(dead_code)]
pub fn init_result() -> Value {
    json!({
        "protocolVersion": "2025-03-26",
        "capabilities": { "tools": { "listChanged": true } },
        "serverInfo": { "name": "fake-gateway", "version": "1.0.0" }
    })
}

/// Tool set served by [`gateway_reply`].
#[allow(dead_code)]
pub fn tool_list() -> Value {
    json!({
        "tools": [
            {
                "name": "echo",
                "description": "Echo text",
                "inputSchema": {
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }
            },
            {
                "name": "add",
                "description": "Add two integers",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "a": { "type": "integer" },
                        "b": { "type": "integer" }
                    },
                    "required": ["a", "b"]
                }
            }
        ]
    })
}

/// A well-behaved gateway: handshake, two tools, echo and add.
#[allow(dead_code)]
pub fn gateway_reply(method: &str, params: &Value) -> FakeReply {
    match method {
        "initialize" => FakeReply::Result(init_result()),
        "tools/list" => FakeReply::Result(tool_list()),
        "tools/call" => {
            let args = &params["arguments"];
            let text = match params["name"].as_str() {
                Some("echo") => args["text"].as_str().unwrap_or_default().to_string(),
                Some("add") => {
                    (args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0)).to_string()
                }
                _ => {
                    return FakeReply::Error(JsonRpcError {
                        code: -32602,
                        message: "unknown tool".to_string(),
                        data: None,
                    })
                }
            };
            FakeReply::Result(json!({ "content": [{ "type": "text", "text": text }] }))
        }
        _ => FakeReply::Silent,
    }
}

/// Counts every method a fake gateway receives.
#[derive(Debug, Default, Clone)]
pub struct MethodLog(Arc<Mutex<Vec<String>>>);

#[allow(dead_code)]
impl MethodLog {
    pub fn record(&self, method: &str) {
        self.0.lock().unwrap().push(method.to_string());
    }

    pub fn count(&self, method: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|m| *m == method).count()
    }
}

type Reply = dyn Fn(&str, &Value) -> FakeReply + Send + Sync;

/// Hands out a fresh [`FakeTransport`] per attempt, each served by the same
/// reply function.
///
/// The inbound sender of every transport is kept so tests can push
/// server-initiated messages.
pub struct FakeFactory {
    reply: Arc<Reply>,
    pub log: MethodLog,
    pub created: AtomicUsize,
    pub inbound: Mutex<Vec<mpsc::UnboundedSender<String>>>,
}

impl std::fmt::Debug for FakeFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeFactory")
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}

#[allow(dead_code)]
impl FakeFactory {
    pub fn new<F>(reply: F) -> Arc<Self>
    where
        F: Fn(&str, &Value) -> FakeReply + Send + Sync + 'static,
    {
        Arc::new(Self {
            reply: Arc::new(reply),
            log: MethodLog::default(),
            created: AtomicUsize::new(0),
            inbound: Mutex::new(Vec::new()),
        })
    }

    /// Push a raw message into the most recent transport.
    pub fn inject(&self, message: Value) {
        let inbound = self.inbound.lock().unwrap();
        inbound
            .last()
            .expect("no transport created yet")
            .send(message.to_string())
            .expect("transport dropped");
    }
}

impl TransportFactory for FakeFactory {
    fn create(&self) -> Result<Arc<dyn Transport>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let (transport, handle) = FakeTransport::new();
        self.inbound.lock().unwrap().push(handle.inbound_tx.clone());

        let reply = Arc::clone(&self.reply);
        let log = self.log.clone();
        handle.serve(move |method, params| {
            log.record(method);
            reply(method, params)
        });
        Ok(Arc::new(transport))
    }
}

/// Factory whose every attempt fails with a fixed error.
#[derive(Debug)]
pub struct FailingFactory {
    pub retryable: bool,
    pub attempts: Mutex<Vec<tokio::time::Instant>>,
}

#[allow(dead_code)]
impl FailingFactory {
    pub fn new(retryable: bool) -> Arc<Self> {
        Arc::new(Self {
            retryable,
            attempts: Mutex::new(Vec::new()),
        })
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

impl TransportFactory for FailingFactory {
    fn create(&self) -> Result<Arc<dyn Transport>> {
        self.attempts
            .lock()
            .unwrap()
            .push(tokio::time::Instant::now());
        if self.retryable {
            Err(ToolgateError::Transport("connection refused".to_string()))
        } else {
            Err(ToolgateError::Config("no such gateway".to_string()))
        }
    }
}
