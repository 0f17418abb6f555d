//! Streaming HTTP transport
//!
//! Every outbound JSON-RPC message is sent as an HTTP POST to a fixed
//! endpoint. The server may reply with:
//!
//! - `application/json` -- a direct JSON response body
//! - `text/event-stream` -- a chunked SSE body carrying one or more
//!   messages
//! - `202 Accepted` -- an acknowledgement with no body (notifications)
//!
//! # Session management
//!
//! The server MAY return an `Mcp-Session-Id` response header. The first one
//! seen is stored, attached to every later request, and exposed through
//! [`Transport::session_id`]. A `404` while a session is active means the
//! server forgot it: the session is cleared and a transport error raised.
//! On disconnect a best-effort `DELETE` releases the session.
//!
//! # Timeouts
//!
//! The connect timeout bounds establishing a TCP/TLS connection. There is no
//! total request timeout, since event-stream replies may stay open for as
//! long as a tool runs; per-call deadlines are enforced by the client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::error::{Result, ToolgateError};
use crate::mcp::transport::event_stream::parse_sse_stream;
use crate::mcp::transport::{Inbox, Transport};
use crate::mcp::types::PROTOCOL_VERSION;

/// Header carrying the server-assigned session.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Header carrying the negotiated protocol revision.
pub const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";

/// `Accept` value sent on every request.
pub const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Streaming HTTP transport.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::time::Duration;
/// use url::Url;
/// use toolgate::mcp::transport::http::HttpTransport;
///
/// let transport = HttpTransport::new(
///     Url::parse("http://localhost:3000/mcp").unwrap(),
///     HashMap::new(),
///     Duration::from_secs(10),
/// )
/// .unwrap();
/// ```
#[derive(Debug)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    endpoint: url::Url,
    headers: HashMap<String, String>,
    session_id: Arc<RwLock<Option<String>>>,
    last_event_id: Arc<std::sync::Mutex<Option<String>>>,
    inbox: Arc<Inbox>,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl HttpTransport {
    /// Construct a transport targeting `endpoint`.
    ///
    /// No network I/O happens here.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - The gateway URL every message is POSTed to
    /// * `headers` - Extra headers added to every request
    /// * `connect_timeout` - Bound on establishing each connection
    ///
    /// # Errors
    ///
    /// Returns [`ToolgateError::Transport`] if the HTTP client cannot be
    /// built (TLS backend initialisation failure).
    pub fn new(
        endpoint: url::Url,
        headers: HashMap<String, String>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ToolgateError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            endpoint,
            headers,
            session_id: Arc::new(RwLock::new(None)),
            last_event_id: Arc::new(std::sync::Mutex::new(None)),
            inbox: Arc::new(Inbox::new()),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// The endpoint this transport posts to.
    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    fn current_session(&self) -> Option<String> {
        self.session_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_session(&self) -> Option<String> {
        self.session_id
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn apply_common_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req = req.header(PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION);
        if let Some(id) = self.current_session() {
            req = req.header(SESSION_HEADER, id);
        }
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }

    fn spawn_event_stream(&self, response: reqwest::Response) {
        let inbox = Arc::clone(&self.inbox);
        let last_event_id = Arc::clone(&self.last_event_id);
        tokio::spawn(async move {
            let outcome = parse_sse_stream(response.bytes_stream(), |event| {
                if event.kind() == "message" {
                    inbox.push(event.data);
                } else {
                    tracing::debug!(event = event.kind(), "ignoring non-message SSE event");
                }
            })
            .await;
            match outcome {
                Ok(Some(id)) => {
                    *last_event_id
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = Some(id);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "streaming HTTP response ended abnormally"),
            }
        });
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    /// Mark the transport usable.
    ///
    /// Streaming HTTP has no standing connection; the first POST (the
    /// handshake) is what proves the endpoint is reachable.
    async fn connect(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ToolgateError::Transport(
                "HTTP transport already closed".to_string(),
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!(endpoint = %self.endpoint, "streaming HTTP transport ready");
        Ok(())
    }

    /// POST one message and route whatever comes back into the inbox.
    ///
    /// - `202 Accepted`: no-op (notification ACK).
    /// - `404` with an active session: session cleared, transport error.
    /// - any other non-success status: transport error.
    /// - `text/event-stream`: a task decodes events as they arrive.
    /// - otherwise: the body, if non-empty, is one inbound message.
    async fn send(&self, message: String) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ToolgateError::Transport(
                "HTTP transport not connected".to_string(),
            ));
        }

        let req = self
            .http_client
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .header("Accept", ACCEPT_BOTH)
            .body(message);
        let req = self.apply_common_headers(req);

        let response = req
            .send()
            .await
            .map_err(|e| ToolgateError::Transport(format!("HTTP POST failed: {e}")))?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            if self.take_session().is_some() {
                return Err(ToolgateError::Transport(
                    "gateway session expired (HTTP 404)".into(),
                ));
            }
            return Err(ToolgateError::Transport("HTTP 404 Not Found".into()));
        }

        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        if !status.is_success() {
            return Err(ToolgateError::Transport(format!(
                "HTTP POST returned status {status}"
            )));
        }

        if let Some(new_session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
        {
            let mut sid = self
                .session_id
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if sid.is_none() {
                tracing::debug!(session_id = %new_session_id, "captured gateway session");
                *sid = Some(new_session_id);
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            self.spawn_event_stream(response);
        } else {
            let body = response.text().await.map_err(|e| {
                ToolgateError::Transport(format!("failed to read response body: {e}"))
            })?;
            if !body.trim().is_empty() {
                self.inbox.push(body);
            }
        }

        Ok(())
    }

    async fn receive(&self) -> Result<String> {
        self.inbox.recv().await
    }

    async fn disconnect(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(sid) = self.take_session() {
            let mut req = self
                .http_client
                .delete(self.endpoint.as_str())
                .header(SESSION_HEADER, sid.as_str())
                .timeout(Duration::from_secs(5));
            for (k, v) in &self.headers {
                req = req.header(k.as_str(), v.as_str());
            }
            match req.send().await {
                Ok(resp) => tracing::debug!(status = %resp.status(), "released gateway session"),
                Err(e) => tracing::debug!(error = %e, "session release failed"),
            }
        }

        self.inbox.close();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn session_id(&self) -> Option<String> {
        self.current_session()
    }
}
