//! Transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait that every channel
//! implementation satisfies. Concrete implementations live in submodules:
//!
//! - [`stdio::StdioTransport`] -- newline-delimited JSON over a child
//!   process's stdin/stdout, or over any caller-supplied reader/writer pair.
//! - [`sse::SseTransport`] -- Server-Sent Events with redirect or
//!   `endpoint`-based session establishment.
//! - [`http::HttpTransport`] -- streaming HTTP, where every message is a
//!   POST whose response is JSON or a chunked event stream.
//! - [`fake::FakeTransport`] -- in-process double used by tests.
//!
//! # Design
//!
//! Callers `send` one serialized JSON-RPC string and `receive` one
//! serialized JSON-RPC string at a time. Framing, session bookkeeping, and
//! connection setup belong to each implementation. Exactly one task (the
//! client read loop) calls `receive`; implementations may rely on that.
//!
//! Transports are single-use: once disconnected they do not reconnect.
//! The connection supervisor builds a fresh transport for every attempt.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, Mutex};

use crate::error::{Result, ToolgateError};

pub mod event_stream;
pub mod fake;
pub mod http;
pub mod sse;
pub mod stdio;

/// Abstraction over the channels a protocol engine can speak through.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use toolgate::mcp::transport::{Transport, stdio::StdioTransport};
///
/// # async fn demo() -> toolgate::Result<()> {
/// let transport: Arc<dyn Transport> =
///     Arc::new(StdioTransport::command("my-gateway", vec![], Default::default()));
/// transport.connect().await?;
/// transport.send(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#.to_string()).await?;
/// let reply = transport.receive().await?;
/// # let _ = reply;
/// transport.disconnect().await?;
/// # Ok(())
/// # }
/// ```
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Open the underlying channel.
    ///
    /// # Errors
    ///
    /// Returns [`ToolgateError::Transport`] if the channel cannot be opened
    /// within the connect timeout, or if the transport was already used.
    async fn connect(&self) -> Result<()>;

    /// Send one complete JSON-RPC message.
    ///
    /// # Errors
    ///
    /// Returns [`ToolgateError::Transport`] if the write fails or the
    /// transport is not connected.
    async fn send(&self, message: String) -> Result<()>;

    /// Wait for the next complete inbound message.
    ///
    /// Idle streams never time out here; callers that need a deadline wrap
    /// the call themselves.
    ///
    /// # Errors
    ///
    /// Returns [`ToolgateError::Eof`] once the peer has closed the stream,
    /// and [`ToolgateError::Transport`] if reading failed.
    async fn receive(&self) -> Result<String>;

    /// Close the channel. Calling this more than once is a no-op.
    async fn disconnect(&self) -> Result<()>;

    /// Whether the channel is currently open.
    fn is_connected(&self) -> bool;

    /// Session identifier negotiated with the peer, if the transport has one.
    fn session_id(&self) -> Option<String> {
        None
    }
}

/// Sending half of an [`Inbox`], handed to background reader tasks.
pub(crate) type InboxSender = mpsc::UnboundedSender<Result<String>>;

/// Inbound message queue shared by the concrete transports.
///
/// Background tasks push `Ok(message)` as frames arrive and a single `Err`
/// when the stream ends. After the first error every further `recv` returns
/// [`ToolgateError::Eof`] immediately.
#[derive(Debug)]
pub(crate) struct Inbox {
    tx: InboxSender,
    rx: Mutex<mpsc::UnboundedReceiver<Result<String>>>,
    closed: AtomicBool,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn sender(&self) -> InboxSender {
        self.tx.clone()
    }

    /// Queue a message for the reader.
    pub(crate) fn push(&self, message: String) {
        let _ = self.tx.send(Ok(message));
    }

    /// Signal end of stream. Messages queued earlier are still delivered.
    pub(crate) fn close(&self) {
        let _ = self.tx.send(Err(ToolgateError::Eof));
    }

    pub(crate) async fn recv(&self) -> Result<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ToolgateError::Eof);
        }
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(Ok(message)) => Ok(message),
            Some(Err(e)) => {
                self.closed.store(true, Ordering::SeqCst);
                Err(e)
            }
            None => {
                self.closed.store(true, Ordering::SeqCst);
                Err(ToolgateError::Eof)
            }
        }
    }
}
