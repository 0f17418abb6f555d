//! In-process fake transport for unit and integration tests
//!
//! [`FakeTransport::new`] returns a `(FakeTransport, FakeTransportHandle)`
//! pair. Wire the transport into the code under test and drive the peer side
//! from the handle:
//!
//! - Read what the client sent: `handle.outbound_rx.recv().await`
//! - Inject server messages: `handle.inbound_tx.send(json_string)`
//! - Simulate the peer hanging up: `handle.close()`
//!
//! For scripted servers, [`FakeTransportHandle::serve`] spawns a task that
//! answers every request through a closure.
//!
//! ```text
//! client send() -----> outbound_tx -----> outbound_rx (handle reads)
//! handle inbound_tx -> inbox       -----> receive()   (client reads)
//! ```
//!
//! # Example
//!
//! ```
//! use toolgate::mcp::transport::fake::FakeTransport;
//! use toolgate::mcp::transport::Transport;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (transport, mut handle) = FakeTransport::new();
//! transport.connect().await.unwrap();
//!
//! transport.send(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_string()).await.unwrap();
//! let sent = handle.outbound_rx.recv().await.unwrap();
//! assert!(sent.contains("ping"));
//!
//! handle.inbound_tx.send(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#.to_string()).unwrap();
//! let received = transport.receive().await.unwrap();
//! assert!(received.contains("result"));
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, ToolgateError};
use crate::mcp::transport::{Inbox, Transport};
use crate::mcp::types::JsonRpcError;

/// In-process fake transport.
#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbox: Arc<Inbox>,
    connected: AtomicBool,
    disconnected: Arc<AtomicBool>,
}

/// The test-side handle for a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Receives messages the client sent via [`Transport::send`].
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Sends raw messages into the client's [`Transport::receive`].
    pub inbound_tx: mpsc::UnboundedSender<String>,
    inbox: Arc<Inbox>,
    disconnected: Arc<AtomicBool>,
}

/// How a scripted fake server answers one request.
#[derive(Debug, Clone)]
pub enum FakeReply {
    /// Respond with this `result`.
    Result(serde_json::Value),
    /// Respond with a JSON-RPC error.
    Error(JsonRpcError),
    /// Send this exact raw line instead of a well-formed response.
    Raw(String),
    /// Do not respond at all.
    Silent,
    /// Wait, then answer with the inner reply.
    Delayed(std::time::Duration, Box<FakeReply>),
}

impl FakeTransport {
    /// Create a new `(FakeTransport, FakeTransportHandle)` pair.
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<String>();
        let inbox = Arc::new(Inbox::new());
        let disconnected = Arc::new(AtomicBool::new(false));

        let forward = Arc::clone(&inbox);
        tokio::spawn(async move {
            while let Some(message) = inbound_rx.recv().await {
                forward.push(message);
            }
        });

        let transport = Self {
            outbound_tx,
            inbox: Arc::clone(&inbox),
            connected: AtomicBool::new(false),
            disconnected: Arc::clone(&disconnected),
        };
        let handle = FakeTransportHandle {
            outbound_rx,
            inbound_tx,
            inbox,
            disconnected,
        };
        (transport, handle)
    }
}

impl FakeTransportHandle {
    /// Simulate the peer closing the stream.
    pub fn close(&self) {
        self.inbox.close();
    }

    /// Whether the client called [`Transport::disconnect`].
    pub fn was_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Answer every inbound request with `reply(method, params)`.
    ///
    /// Notifications are passed to the closure too, but any reply to a
    /// message without an `id` is discarded. The task ends when the client
    /// side drops its sender.
    pub fn serve<F>(self, mut reply: F) -> JoinHandle<()>
    where
        F: FnMut(&str, &serde_json::Value) -> FakeReply + Send + 'static,
    {
        let FakeTransportHandle {
            mut outbound_rx,
            inbound_tx,
            ..
        } = self;

        tokio::spawn(async move {
            while let Some(raw) = outbound_rx.recv().await {
                let Ok(request) = serde_json::from_str::<serde_json::Value>(&raw) else {
                    continue;
                };
                let method = request["method"].as_str().unwrap_or_default().to_string();
                let params = request
                    .get("params")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                let mut answer = reply(&method, &params);
                while let FakeReply::Delayed(delay, inner) = answer {
                    tokio::time::sleep(delay).await;
                    answer = *inner;
                }

                let Some(id) = request.get("id").filter(|id| !id.is_null()).cloned() else {
                    continue;
                };
                let line = match answer {
                    FakeReply::Result(result) => serde_json::json!({
                        "jsonrpc": "2.0", "id": id, "result": result
                    })
                    .to_string(),
                    FakeReply::Error(error) => serde_json::json!({
                        "jsonrpc": "2.0", "id": id, "error": error
                    })
                    .to_string(),
                    FakeReply::Raw(line) => line,
                    FakeReply::Silent | FakeReply::Delayed(..) => continue,
                };
                if inbound_tx.send(line).is_err() {
                    break;
                }
            }
        })
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn connect(&self) -> Result<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(ToolgateError::Transport(
                "fake transport already closed".to_string(),
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ToolgateError::Transport(
                "fake transport not connected".to_string(),
            ));
        }
        self.outbound_tx
            .send(message)
            .map_err(|_| ToolgateError::Transport("fake peer dropped".to_string()))
    }

    async fn receive(&self) -> Result<String> {
        self.inbox.recv().await
    }

    async fn disconnect(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.disconnected.store(true, Ordering::SeqCst);
            self.inbox.close();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let (transport, _handle) = FakeTransport::new();
        let result = transport.send("{}".to_string()).await;
        assert!(matches!(result, Err(ToolgateError::Transport(_))));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_yields_eof() {
        let (transport, handle) = FakeTransport::new();
        transport.connect().await.unwrap();
        transport.disconnect().await.unwrap();
        transport.disconnect().await.unwrap();

        assert!(!transport.is_connected());
        assert!(handle.was_disconnected());
        assert!(matches!(
            transport.receive().await,
            Err(ToolgateError::Eof)
        ));
    }

    #[tokio::test]
    async fn test_serve_answers_requests_and_skips_notifications() {
        let (transport, handle) = FakeTransport::new();
        transport.connect().await.unwrap();
        let _server = handle.serve(|method, _| FakeReply::Result(serde_json::json!({ "m": method })));

        transport
            .send(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#.to_string())
            .await
            .unwrap();
        transport
            .send(r#"{"jsonrpc":"2.0","id":9,"method":"tools/list"}"#.to_string())
            .await
            .unwrap();

        let reply: serde_json::Value =
            serde_json::from_str(&transport.receive().await.unwrap()).unwrap();
        assert_eq!(reply["id"], 9);
        assert_eq!(reply["result"]["m"], "tools/list");
    }
}
