//! Protocol engine: the handshake and request/response lifecycle over one
//! transport
//!
//! [`ProtocolEngine`] wraps a [`Transport`] and a [`JsonRpcClient`]:
//!
//! - [`ProtocolEngine::connect`] opens the transport and starts the read
//!   loop.
//! - [`ProtocolEngine::initialize`] performs the `initialize` /
//!   `notifications/initialized` exchange exactly once; later calls return
//!   the cached capabilities.
//! - [`ProtocolEngine::call`] issues a request on an initialized engine.
//! - [`ProtocolEngine::shutdown`] sends a best-effort `shutdown`
//!   notification, clears the negotiated state, and stops the read loop.
//!
//! Components that only need to issue calls (the tool registry) hold the
//! engine as an `Arc<dyn RpcCaller>`, which cannot connect or disconnect it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ToolgateError};
use crate::mcp::client::{start_read_loop, JsonRpcClient};
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    ClientCapabilities, Implementation, InitializeParams, InitializeResult, ServerCapabilities,
    METHOD_INITIALIZE, NOTIF_INITIALIZED, NOTIF_SHUTDOWN, PROTOCOL_VERSION,
};

/// Issue JSON-RPC calls without owning the connection.
#[async_trait::async_trait]
pub trait RpcCaller: Send + Sync + std::fmt::Debug {
    /// Send `method` with `params` and await the result.
    ///
    /// `timeout` of `None` uses the implementation's default.
    ///
    /// # Errors
    ///
    /// Any classified [`ToolgateError`] from the request.
    async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value>;
}

/// Protocol engine for one connection.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use toolgate::mcp::protocol::ProtocolEngine;
/// use toolgate::mcp::transport::fake::{FakeReply, FakeTransport};
/// use toolgate::mcp::types::Implementation;
///
/// # #[tokio::main]
/// # async fn main() -> toolgate::Result<()> {
/// let (transport, handle) = FakeTransport::new();
/// let _server = handle.serve(|method, _| match method {
///     "initialize" => FakeReply::Result(serde_json::json!({
///         "protocolVersion": "2025-03-26",
///         "capabilities": {"tools": {}},
///         "serverInfo": {"name": "demo", "version": "1.0"}
///     })),
///     _ => FakeReply::Silent,
/// });
///
/// let engine = ProtocolEngine::new(
///     Arc::new(transport),
///     Implementation { name: "toolgate".into(), version: "0.1.0".into() },
///     Duration::from_secs(5),
/// );
/// engine.connect().await?;
/// engine.initialize().await?;
/// assert!(engine.has_capability("tools"));
/// engine.shutdown().await;
/// engine.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct ProtocolEngine {
    transport: Arc<dyn Transport>,
    client: Arc<JsonRpcClient>,
    client_info: Implementation,
    default_timeout: Duration,
    handshake: tokio::sync::Mutex<()>,
    state: std::sync::RwLock<Option<InitializeResult>>,
    reader: std::sync::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl std::fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("client_info", &self.client_info)
            .field("default_timeout", &self.default_timeout)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl ProtocolEngine {
    /// Create an engine over `transport`. No I/O happens here.
    ///
    /// # Arguments
    ///
    /// * `transport` - An unconnected, unused transport
    /// * `client_info` - Identity sent in the handshake
    /// * `default_timeout` - Deadline for calls that do not pass one
    pub fn new(
        transport: Arc<dyn Transport>,
        client_info: Implementation,
        default_timeout: Duration,
    ) -> Self {
        let client = Arc::new(JsonRpcClient::new(Arc::clone(&transport)));
        Self {
            transport,
            client,
            client_info,
            default_timeout,
            handshake: tokio::sync::Mutex::new(()),
            state: std::sync::RwLock::new(None),
            reader: std::sync::Mutex::new(None),
        }
    }

    /// Open the transport and start the read loop.
    ///
    /// # Errors
    ///
    /// Returns the transport's connect error.
    pub async fn connect(&self) -> Result<()> {
        self.transport.connect().await?;

        let mut reader = self
            .reader
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if reader.is_none() {
            let token = CancellationToken::new();
            let handle = start_read_loop(Arc::clone(&self.client), token.clone());
            *reader = Some((token, handle));
        }
        Ok(())
    }

    /// Perform the handshake, or return the cached capabilities if it
    /// already succeeded.
    ///
    /// Concurrent first calls are serialized so only one `initialize`
    /// request is ever sent.
    ///
    /// # Errors
    ///
    /// - [`ToolgateError::SessionInactive`] if [`Self::connect`] was not
    ///   called.
    /// - [`ToolgateError::Handshake`] if the server's reply is missing a
    ///   required field, is a JSON-RPC error, or does not arrive in time.
    /// - Transport errors from the write.
    pub async fn initialize(&self) -> Result<ServerCapabilities> {
        if let Some(capabilities) = self.capabilities() {
            tracing::debug!("initialize called on an initialized engine; returning cached capabilities");
            return Ok(capabilities);
        }

        let _guard = self.handshake.lock().await;
        if let Some(capabilities) = self.capabilities() {
            tracing::debug!("handshake completed concurrently; returning cached capabilities");
            return Ok(capabilities);
        }

        if !self.reader_running() {
            return Err(ToolgateError::SessionInactive(
                "initialize requires a connected engine".to_string(),
            ));
        }

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: self.client_info.clone(),
        };
        let raw = self
            .client
            .request(
                METHOD_INITIALIZE,
                Some(serde_json::to_value(params)?),
                self.default_timeout,
            )
            .await
            .map_err(into_handshake_error)?;
        let result = InitializeResult::from_value(raw)?;

        tracing::info!(
            server = %result.server_info.name,
            server_version = %result.server_info.version,
            protocol = %result.protocol_version,
            capabilities = ?result.capabilities.names(),
            "handshake complete"
        );

        let capabilities = result.capabilities.clone();
        *self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(result);

        if let Err(e) = self.client.notify(NOTIF_INITIALIZED, None).await {
            tracing::warn!(error = %e, "failed to send initialized notification");
        }

        Ok(capabilities)
    }

    /// Send a request on an initialized engine.
    ///
    /// # Errors
    ///
    /// [`ToolgateError::SessionInactive`] before the handshake; otherwise any
    /// error from [`JsonRpcClient::request`].
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        if !self.is_initialized() {
            return Err(ToolgateError::SessionInactive(format!(
                "'{method}' requires an initialized session"
            )));
        }
        self.client
            .request(method, params, timeout.unwrap_or(self.default_timeout))
            .await
    }

    /// Send a notification on an initialized engine.
    ///
    /// # Errors
    ///
    /// [`ToolgateError::SessionInactive`] before the handshake, or the
    /// transport's write error.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if !self.is_initialized() {
            return Err(ToolgateError::SessionInactive(format!(
                "'{method}' requires an initialized session"
            )));
        }
        self.client.notify(method, params).await
    }

    /// Best-effort protocol shutdown.
    ///
    /// Sends the `shutdown` notification, clears the negotiated state and
    /// stops the read loop. Failures are logged, never raised. Does nothing
    /// on an engine that never completed the handshake.
    pub async fn shutdown(&self) {
        let previous = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if previous.is_none() {
            tracing::debug!("shutdown on uninitialized engine; nothing to do");
            return;
        }

        if let Err(e) = self.client.notify(NOTIF_SHUTDOWN, None).await {
            tracing::warn!(error = %e, "shutdown notification failed");
        }
        self.stop_reader().await;
    }

    /// Stop the read loop and close the transport.
    ///
    /// # Errors
    ///
    /// Returns the transport's disconnect error.
    pub async fn disconnect(&self) -> Result<()> {
        self.stop_reader().await;
        self.transport.disconnect().await
    }

    /// Synchronously stop the read loop without any I/O.
    ///
    /// In-flight calls fail with [`ToolgateError::SessionInactive`].
    pub fn abort(&self) {
        *self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        if let Some((token, _)) = self
            .reader
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }

    async fn stop_reader(&self) {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some((token, handle)) = reader {
            token.cancel();
            if let Err(e) = handle.await {
                tracing::debug!(error = %e, "read loop task ended abnormally");
            }
        }
    }

    fn reader_running(&self) -> bool {
        self.reader
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map_or(false, |(token, handle)| {
                !token.is_cancelled() && !handle.is_finished()
            })
    }

    /// Register a handler for a server notification.
    pub fn on_notification(
        &self,
        method: impl Into<String>,
        f: impl Fn(Value) + Send + Sync + 'static,
    ) {
        self.client.on_notification(method, f);
    }

    /// Whether the handshake has completed and not been shut down.
    pub fn is_initialized(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some()
    }

    /// Whether the transport is open and the read loop is still running.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected() && self.reader_running() && !self.client.is_closed()
    }

    /// Capabilities negotiated during the handshake.
    pub fn capabilities(&self) -> Option<ServerCapabilities> {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(|r| r.capabilities.clone())
    }

    /// Whether the server advertised capability `name`.
    pub fn has_capability(&self, name: &str) -> bool {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map_or(false, |r| r.capabilities.has(name))
    }

    /// Server identity from the handshake.
    pub fn server_info(&self) -> Option<Implementation> {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(|r| r.server_info.clone())
    }

    /// Session identifier negotiated by the transport, if any.
    pub fn session_id(&self) -> Option<String> {
        self.transport.session_id()
    }

    /// Number of requests awaiting a response.
    pub async fn in_flight(&self) -> usize {
        self.client.in_flight().await
    }
}

impl Drop for ProtocolEngine {
    fn drop(&mut self) {
        if let Ok(mut reader) = self.reader.lock() {
            if let Some((token, _)) = reader.take() {
                token.cancel();
            }
        }
    }
}

#[async_trait::async_trait]
impl RpcCaller for ProtocolEngine {
    async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        ProtocolEngine::call(self, method, params, timeout).await
    }
}

/// Failures of the `initialize` request itself count as handshake failures
/// so that the supervisor retries them.
fn into_handshake_error(err: ToolgateError) -> ToolgateError {
    match err {
        ToolgateError::Timeout { timeout, .. } => {
            ToolgateError::Handshake(format!("no initialize response within {timeout:?}"))
        }
        ToolgateError::Rpc { code, message, .. } => {
            ToolgateError::Handshake(format!("server rejected initialize ({code}): {message}"))
        }
        other => other,
    }
}
