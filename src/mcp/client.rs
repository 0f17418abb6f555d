//! Transport-backed async JSON-RPC 2.0 client
//!
//! [`JsonRpcClient`] owns request ID allocation and response correlation on
//! top of any [`Transport`]. Call [`start_read_loop`] once per client to
//! process inbound messages; issue requests with [`JsonRpcClient::request`]
//! and notifications with [`JsonRpcClient::notify`].
//!
//! # Design
//!
//! - IDs come from one `AtomicU64` starting at 1 and are never reused.
//! - Each request registers a `oneshot::Sender` in the `pending` map
//!   *before* the message is written, so a fast response cannot be missed.
//! - The read loop is the only caller of [`Transport::receive`]. It
//!   classifies each message as a response, a server-initiated request, or
//!   a notification.
//! - A response whose `id` matches no in-flight request is a protocol
//!   violation: every pending call fails with [`ToolgateError::Protocol`]
//!   rather than resynchronising silently. The one exception is the ID of a
//!   call that already timed out, whose late response is discarded.
//! - Cancelling the loop fails every pending call with
//!   [`ToolgateError::SessionInactive`]; end of stream fails them with
//!   [`ToolgateError::Eof`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ToolgateError};
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION, METHOD_NOT_FOUND,
};

/// How many timed-out request IDs are remembered for late-response
/// filtering.
pub const ABANDONED_ID_CAPACITY: usize = 1024;

/// What a pending request eventually receives from the read loop.
type Outcome = Result<std::result::Result<Value, JsonRpcError>>;

/// The pending-response map type: maps request ID to the oneshot sender.
type PendingMap = HashMap<u64, oneshot::Sender<Outcome>>;

/// A notification handler: called with the raw `params` value.
type NotificationHandler = Arc<dyn Fn(Value) + Send + Sync + 'static>;

/// Async JSON-RPC 2.0 client bound to one transport.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
/// use toolgate::mcp::client::{start_read_loop, JsonRpcClient};
/// use toolgate::mcp::transport::fake::{FakeReply, FakeTransport};
/// use toolgate::mcp::transport::Transport;
///
/// # #[tokio::main]
/// # async fn main() -> toolgate::Result<()> {
/// let (transport, handle) = FakeTransport::new();
/// transport.connect().await?;
/// let _server = handle.serve(|_, _| FakeReply::Result(serde_json::json!({"ok": true})));
///
/// let client = Arc::new(JsonRpcClient::new(Arc::new(transport)));
/// let token = CancellationToken::new();
/// let _reader = start_read_loop(Arc::clone(&client), token.clone());
///
/// let result = client.request("ping", None, Duration::from_secs(1)).await?;
/// assert_eq!(result["ok"], true);
/// token.cancel();
/// # Ok(())
/// # }
/// ```
pub struct JsonRpcClient {
    next_id: AtomicU64,
    pending: Mutex<PendingMap>,
    abandoned: std::sync::Mutex<VecDeque<u64>>,
    transport: Arc<dyn Transport>,
    notification_handlers: std::sync::RwLock<HashMap<String, NotificationHandler>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("transport", &self.transport)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl JsonRpcClient {
    /// Create a client over an already-connected transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            abandoned: std::sync::Mutex::new(VecDeque::new()),
            transport,
            notification_handlers: std::sync::RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// The transport this client writes to.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// The ID the next request will use.
    pub fn peek_next_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Number of requests currently awaiting a response.
    pub async fn in_flight(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Whether the read loop has stopped.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a JSON-RPC request and await its result.
    ///
    /// # Arguments
    ///
    /// * `method` - The JSON-RPC method name
    /// * `params` - Optional `params` value
    /// * `timeout` - Deadline for the response
    ///
    /// # Errors
    ///
    /// - [`ToolgateError::Transport`] if the write fails.
    /// - [`ToolgateError::Timeout`] if the write and the response together
    ///   outlast `timeout`; the ID is remembered so a late reply is discarded.
    /// - [`ToolgateError::SessionInactive`] / [`ToolgateError::Eof`] if the
    ///   read loop stops first.
    /// - [`ToolgateError::Protocol`] on a mismatched or malformed response.
    /// - The classified server error when the response carries `error`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // Register the pending slot before sending so the response can never
        // arrive before we are ready to receive it.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self.is_closed() {
            self.pending.lock().await.remove(&id);
            return Err(ToolgateError::SessionInactive(format!(
                "cannot send '{method}': connection closed"
            )));
        }

        let message = match serde_json::to_string(&JsonRpcRequest::new(id, method, params)) {
            Ok(message) => message,
            Err(e) => {
                self.pending.lock().await.remove(&id);
                return Err(e.into());
            }
        };

        // One deadline covers the write and the wait: request/response
        // transports deliver the reply from inside `send`.
        let deadline = tokio::time::Instant::now() + timeout;

        tracing::debug!(id, method, "sending request");
        match tokio::time::timeout_at(deadline, self.transport.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.pending.lock().await.remove(&id);
                return Err(e);
            }
            Err(_) => {
                crate::metrics::record_request(method);
                return Err(self.expire(id, method, timeout).await);
            }
        }
        crate::metrics::record_request(method);

        match tokio::time::timeout_at(deadline, rx).await {
            Err(_) => Err(self.expire(id, method, timeout).await),
            Ok(Err(_)) => Err(ToolgateError::SessionInactive(format!(
                "connection closed before '{method}' completed"
            ))),
            Ok(Ok(outcome)) => outcome?.map_err(|e| e.into_error(method)),
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    ///
    /// # Errors
    ///
    /// Returns [`ToolgateError::Transport`] if the write fails.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let message = serde_json::to_string(&JsonRpcRequest::notification(method, params))?;
        tracing::debug!(method, "sending notification");
        self.transport.send(message).await
    }

    /// Register a handler for a server-sent notification.
    ///
    /// The handler receives the notification's `params`
    /// (`Value::Null` when absent). Registering a second handler for the same
    /// method replaces the first.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use toolgate::mcp::client::JsonRpcClient;
    /// use toolgate::mcp::transport::fake::FakeTransport;
    /// use toolgate::mcp::types::NOTIF_TOOLS_LIST_CHANGED;
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let (transport, _handle) = FakeTransport::new();
    /// let client = JsonRpcClient::new(Arc::new(transport));
    /// client.on_notification(NOTIF_TOOLS_LIST_CHANGED, |_params| {
    ///     // invalidate cached tools
    /// });
    /// # }
    /// ```
    pub fn on_notification(
        &self,
        method: impl Into<String>,
        f: impl Fn(Value) + Send + Sync + 'static,
    ) {
        self.notification_handlers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(method.into(), Arc::new(f));
    }

    /// Drop the waiter for a request that ran out of time.
    async fn expire(&self, id: u64, method: &str, timeout: Duration) -> ToolgateError {
        if self.pending.lock().await.remove(&id).is_some() {
            self.abandon(id);
        }
        tracing::warn!(id, method, ?timeout, "request timed out");
        ToolgateError::Timeout {
            method: method.to_string(),
            timeout,
        }
    }

    fn abandon(&self, id: u64) {
        let mut abandoned = self
            .abandoned
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if abandoned.len() >= ABANDONED_ID_CAPACITY {
            abandoned.pop_front();
        }
        abandoned.push_back(id);
    }

    fn take_abandoned(&self, id: u64) -> bool {
        let mut abandoned = self
            .abandoned
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match abandoned.iter().position(|a| *a == id) {
            Some(pos) => {
                abandoned.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Fail every pending request with an error built by `make`.
    async fn fail_pending(&self, make: impl Fn() -> ToolgateError) {
        let drained: Vec<_> = self.pending.lock().await.drain().collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "failing pending requests");
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(make()));
        }
    }

    async fn shut(&self, make: impl Fn() -> ToolgateError) {
        self.closed.store(true, Ordering::SeqCst);
        self.fail_pending(make).await;
    }

    // -----------------------------------------------------------------------
    // Inbound dispatch
    // -----------------------------------------------------------------------

    async fn dispatch(&self, raw: &str) {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "skipping inbound message that is not JSON");
                return;
            }
        };

        let id = value.get("id").filter(|id| !id.is_null()).cloned();
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string);

        match (id, method) {
            (Some(id), Some(method)) => self.answer_server_request(id, &method).await,
            (None, Some(method)) => {
                let params = value.get("params").cloned().unwrap_or(Value::Null);
                self.handle_notification(&method, params);
            }
            (Some(id), None) => self.handle_response(id, value).await,
            (None, None) => {
                tracing::warn!(message = %raw, "ignoring inbound message with neither id nor method");
            }
        }
    }

    async fn handle_response(&self, id_value: Value, value: Value) {
        let id = id_value
            .as_u64()
            .or_else(|| id_value.as_str().and_then(|s| s.parse::<u64>().ok()));
        let Some(id) = id else {
            let violation = format!("response id {id_value} is not a request id");
            tracing::error!(%violation, "protocol violation");
            self.fail_pending(|| ToolgateError::Protocol(violation.clone()))
                .await;
            return;
        };

        let tx = self.pending.lock().await.remove(&id);
        let Some(tx) = tx else {
            if self.take_abandoned(id) {
                tracing::debug!(id, "discarding late response for timed-out request");
                return;
            }
            let violation = format!("response id {id} matches no in-flight request");
            tracing::error!(%violation, "protocol violation");
            self.fail_pending(|| ToolgateError::Protocol(violation.clone()))
                .await;
            return;
        };

        let outcome = serde_json::from_value::<JsonRpcResponse>(value)
            .map_err(|e| ToolgateError::Protocol(format!("malformed response envelope: {e}")))
            .and_then(JsonRpcResponse::into_outcome);

        // The caller may already have given up; nothing to do then.
        let _ = tx.send(outcome);
    }

    async fn answer_server_request(&self, id: Value, method: &str) {
        let reply = if method == "ping" {
            serde_json::json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": {} })
        } else {
            tracing::debug!(method, "rejecting unsupported server request");
            let error = JsonRpcError {
                code: METHOD_NOT_FOUND,
                message: format!("Method not found: {method}"),
                data: None,
            };
            match serde_json::to_value(JsonRpcResponse::error(id, error)) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode error reply");
                    return;
                }
            }
        };

        if let Err(e) = self.transport.send(reply.to_string()).await {
            tracing::warn!(method, error = %e, "failed to answer server request");
        }
    }

    fn handle_notification(&self, method: &str, params: Value) {
        let handler = self
            .notification_handlers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(method)
            .cloned();
        match handler {
            Some(handler) => handler(params),
            None => tracing::debug!(method, "no handler for notification"),
        }
    }
}

/// Start the read loop for `client` as a background task.
///
/// The loop runs until `cancellation` fires or the transport reports end of
/// stream or a read failure. In every case the pending map is drained so no
/// caller waits forever.
///
/// # Returns
///
/// The [`JoinHandle`] of the spawned task.
pub fn start_read_loop(
    client: Arc<JsonRpcClient>,
    cancellation: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => {
                    client
                        .shut(|| ToolgateError::SessionInactive("session closed".to_string()))
                        .await;
                    break;
                }

                received = client.transport.receive() => match received {
                    Ok(raw) => client.dispatch(&raw).await,
                    Err(ToolgateError::Eof) => {
                        tracing::info!("gateway closed the connection");
                        client.shut(|| ToolgateError::Eof).await;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "read loop stopped");
                        let reason = e.to_string();
                        client
                            .shut(|| ToolgateError::Transport(reason.clone()))
                            .await;
                        break;
                    }
                },
            }
        }
        tracing::debug!("read loop exited");
    })
}
