//! Server-Sent Events transport
//!
//! Inbound messages arrive on one long-lived `text/event-stream` GET;
//! outbound messages are individual POSTs.
//!
//! # Session establishment
//!
//! [`Transport::connect`] issues a GET to the configured URL. Redirects are
//! not followed automatically so that the client can inspect every hop:
//!
//! - `3xx` with `Location`: the target is the stream endpoint. Cookies set
//!   on the redirect are captured. Up to [`MAX_REDIRECTS`] hops are
//!   followed.
//! - `200` with a JSON body `{"endpoint": "..."}`: the named URL is the
//!   stream endpoint.
//! - `200` with `text/event-stream`: the response is already the stream and
//!   the server announces the POST target with an `endpoint` event, which is
//!   awaited before `connect` returns.
//!
//! The session identifier is read from the endpoint's query string
//! (`session_id` or `sessionId`) or from a session cookie (`session_id`,
//! `sessionId`, `mcp_session`). When both exist and differ the query string
//! wins and a warning is logged.
//!
//! Captured cookies and caller headers are replayed on the stream request
//! and on every POST. An `endpoint` event received at any time redirects
//! subsequent POSTs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

use crate::error::{Result, ToolgateError};
use crate::mcp::transport::event_stream::parse_sse_stream;
use crate::mcp::transport::{Inbox, Transport};

/// Maximum redirect hops followed during session establishment.
pub const MAX_REDIRECTS: usize = 5;

/// Query parameters that may carry the session identifier.
const SESSION_QUERY_KEYS: &[&str] = &["session_id", "sessionId"];

/// Cookie names that may carry the session identifier, in priority order.
const SESSION_COOKIE_NAMES: &[&str] = &["session_id", "sessionId", "mcp_session"];

/// SSE transport.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::time::Duration;
/// use url::Url;
/// use toolgate::mcp::transport::{sse::SseTransport, Transport};
///
/// # async fn demo() -> toolgate::Result<()> {
/// let transport = SseTransport::new(
///     Url::parse("http://localhost:8000/sse").unwrap(),
///     HashMap::new(),
///     HashMap::new(),
///     Duration::from_secs(10),
/// )?;
/// transport.connect().await?;
/// println!("session: {:?}", transport.session_id());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SseTransport {
    http_client: reqwest::Client,
    url: Url,
    headers: HashMap<String, String>,
    cookies: Arc<std::sync::Mutex<BTreeMap<String, String>>>,
    post_endpoint: watch::Sender<Option<Url>>,
    session_id: Arc<std::sync::RwLock<Option<String>>>,
    inbox: Arc<Inbox>,
    connected: Arc<AtomicBool>,
    used: AtomicBool,
    connect_timeout: Duration,
    stream_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    /// Construct a transport for the SSE entry point at `url`.
    ///
    /// # Arguments
    ///
    /// * `url` - Entry point; may redirect to the real stream endpoint
    /// * `headers` - Extra headers replayed on every request
    /// * `cookies` - Caller-supplied cookies, merged with captured ones
    /// * `connect_timeout` - Bound on each establishment step
    ///
    /// # Errors
    ///
    /// Returns [`ToolgateError::Transport`] if the HTTP client cannot be
    /// built.
    pub fn new(
        url: Url,
        headers: HashMap<String, String>,
        cookies: HashMap<String, String>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ToolgateError::Transport(format!("failed to build HTTP client: {e}")))?;

        let (post_endpoint, _) = watch::channel(None);

        Ok(Self {
            http_client,
            url,
            headers,
            cookies: Arc::new(std::sync::Mutex::new(cookies.into_iter().collect())),
            post_endpoint,
            session_id: Arc::new(std::sync::RwLock::new(None)),
            inbox: Arc::new(Inbox::new()),
            connected: Arc::new(AtomicBool::new(false)),
            used: AtomicBool::new(false),
            connect_timeout,
            stream_task: std::sync::Mutex::new(None),
        })
    }

    /// The URL outbound messages are currently POSTed to.
    pub fn post_endpoint(&self) -> Option<Url> {
        self.post_endpoint.borrow().clone()
    }

    fn cookie_header(&self) -> Option<String> {
        let cookies = self
            .cookies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        format_cookie_header(&cookies)
    }

    fn capture_cookies(&self, response: &reqwest::Response) {
        let mut cookies = self
            .cookies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for value in response
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
        {
            if let Some((name, value)) = parse_set_cookie(value) {
                tracing::debug!(cookie = %name, "captured cookie during SSE handshake");
                cookies.insert(name, value);
            }
        }
    }

    fn decorate(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(cookie) = self.cookie_header() {
            req = req.header(reqwest::header::COOKIE, cookie);
        }
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response> {
        let req = self
            .http_client
            .get(url.as_str())
            .header(
                reqwest::header::ACCEPT,
                "text/event-stream, application/json",
            );
        let req = self.decorate(req);
        match tokio::time::timeout(self.connect_timeout, req.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(ToolgateError::Transport(format!("GET {url} failed: {e}"))),
            Err(_) => Err(ToolgateError::Transport(format!(
                "GET {url} timed out after {:?}",
                self.connect_timeout
            ))),
        }
    }

    /// Walk redirects and JSON endpoint announcements until a response that
    /// is the event stream itself.
    async fn open_stream(&self) -> Result<(Url, reqwest::Response, bool)> {
        let mut target = self.url.clone();
        let mut resolved = false;

        for _ in 0..=MAX_REDIRECTS {
            let response = self.get(&target).await?;
            self.capture_cookies(&response);
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        ToolgateError::Transport(format!(
                            "HTTP {status} redirect without Location header"
                        ))
                    })?;
                target = target.join(location).map_err(|e| {
                    ToolgateError::Transport(format!("invalid redirect target '{location}': {e}"))
                })?;
                tracing::debug!(%target, %status, "following SSE redirect");
                resolved = true;
                continue;
            }

            if !status.is_success() {
                return Err(ToolgateError::Transport(format!(
                    "SSE handshake returned HTTP {status}"
                )));
            }

            if is_event_stream(&response) {
                return Ok((target, response, resolved));
            }

            let body: serde_json::Value = response.json().await.map_err(|e| {
                ToolgateError::Transport(format!("SSE handshake body is not JSON: {e}"))
            })?;
            let endpoint = body
                .get("endpoint")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    ToolgateError::Transport("SSE handshake JSON has no 'endpoint'".to_string())
                })?;
            target = target.join(endpoint).map_err(|e| {
                ToolgateError::Transport(format!("invalid endpoint '{endpoint}': {e}"))
            })?;
            tracing::debug!(%target, "SSE handshake announced endpoint");
            resolved = true;
        }

        Err(ToolgateError::Transport(format!(
            "SSE handshake exceeded {MAX_REDIRECTS} redirects"
        )))
    }

    fn spawn_reader(&self, stream_url: Url, response: reqwest::Response) -> JoinHandle<()> {
        let inbox = Arc::clone(&self.inbox);
        let connected = Arc::clone(&self.connected);
        let session_id = Arc::clone(&self.session_id);
        let cookies = Arc::clone(&self.cookies);
        let post_endpoint = self.post_endpoint.clone();

        tokio::spawn(async move {
            let outcome = parse_sse_stream(response.bytes_stream(), |event| {
                match event.kind() {
                    "endpoint" => match stream_url.join(event.data.trim()) {
                        Ok(endpoint) => {
                            let cookies = cookies
                                .lock()
                                .unwrap_or_else(std::sync::PoisonError::into_inner);
                            if let Some(sid) = resolve_session_id(&endpoint, &cookies) {
                                *session_id
                                    .write()
                                    .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(sid);
                            }
                            tracing::debug!(%endpoint, "SSE endpoint announced");
                            post_endpoint.send_replace(Some(endpoint));
                        }
                        Err(e) => tracing::warn!(data = %event.data, error = %e, "ignoring malformed endpoint event"),
                    },
                    "message" => inbox.push(event.data),
                    other => tracing::debug!(event = other, "ignoring SSE event"),
                }
            })
            .await;

            connected.store(false, Ordering::SeqCst);
            match outcome {
                Ok(_) => {
                    tracing::info!("SSE stream closed by gateway");
                    inbox.close();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "SSE stream failed");
                    let _ = inbox.sender().send(Err(e));
                }
            }
        })
    }
}

fn is_event_stream(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |ct| ct.contains("text/event-stream"))
}

/// Extract `(name, value)` from a `Set-Cookie` header value.
///
/// # Examples
///
/// ```
/// use toolgate::mcp::transport::sse::parse_set_cookie;
///
/// assert_eq!(
///     parse_set_cookie("mcp_session=abc; Path=/; HttpOnly"),
///     Some(("mcp_session".to_string(), "abc".to_string()))
/// );
/// assert_eq!(parse_set_cookie("garbage"), None);
/// ```
pub fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().trim_matches('"').to_string()))
}

fn format_cookie_header(cookies: &BTreeMap<String, String>) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Pick the session identifier from an endpoint URL and captured cookies.
///
/// The query string takes precedence; a disagreeing cookie is logged.
pub fn resolve_session_id(endpoint: &Url, cookies: &BTreeMap<String, String>) -> Option<String> {
    let from_query = endpoint
        .query_pairs()
        .find(|(k, _)| SESSION_QUERY_KEYS.contains(&k.as_ref()))
        .map(|(_, v)| v.into_owned());
    let from_cookie = SESSION_COOKIE_NAMES
        .iter()
        .find_map(|name| cookies.get(*name))
        .cloned();

    match (from_query, from_cookie) {
        (Some(query), Some(cookie)) if query != cookie => {
            tracing::warn!(
                query = %query,
                cookie = %cookie,
                "session id in endpoint query differs from session cookie; using query value"
            );
            Some(query)
        }
        (Some(query), _) => Some(query),
        (None, cookie) => cookie,
    }
}

#[async_trait::async_trait]
impl Transport for SseTransport {
    async fn connect(&self) -> Result<()> {
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(ToolgateError::Transport(
                "SSE transport already connected or closed".to_string(),
            ));
        }

        let (stream_url, response, resolved) = self.open_stream().await?;

        {
            let cookies = self
                .cookies
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let sid = resolve_session_id(&stream_url, &cookies);
            *self
                .session_id
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = sid;
        }

        let mut endpoint_rx = self.post_endpoint.subscribe();
        if resolved {
            self.post_endpoint.send_replace(Some(stream_url.clone()));
        }

        self.connected.store(true, Ordering::SeqCst);
        let task = self.spawn_reader(stream_url.clone(), response);
        *self
            .stream_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(task);

        if !resolved {
            // The watch guard is not Send; only the verdict may cross the await below.
            let announced = tokio::time::timeout(
                self.connect_timeout,
                endpoint_rx.wait_for(|endpoint| endpoint.is_some()),
            )
            .await
            .map_or(false, |seen| seen.is_ok());
            if !announced {
                self.disconnect().await?;
                return Err(ToolgateError::Transport(format!(
                    "SSE stream at {stream_url} never announced an endpoint"
                )));
            }
        }

        tracing::info!(
            url = %stream_url,
            session_id = ?self.session_id(),
            "SSE stream established"
        );
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ToolgateError::Transport(
                "SSE transport not connected".to_string(),
            ));
        }
        let endpoint = self.post_endpoint().ok_or_else(|| {
            ToolgateError::Transport("SSE transport has no POST endpoint".to_string())
        })?;

        let req = self
            .http_client
            .post(endpoint.as_str())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(message);
        let response = self
            .decorate(req)
            .send()
            .await
            .map_err(|e| ToolgateError::Transport(format!("POST {endpoint} failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ToolgateError::Transport(
                "gateway rejected the session (HTTP 404)".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(ToolgateError::Transport(format!(
                "POST {endpoint} returned HTTP {status}"
            )));
        }

        // Some gateways answer inline as well as on the stream.
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |ct| ct.contains("application/json"));
        if is_json {
            let body = response.text().await.map_err(|e| {
                ToolgateError::Transport(format!("failed to read POST response: {e}"))
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
        self.used.store(true, Ordering::SeqCst);
        let task = self
            .stream_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if let Some(task) = task {
            task.abort();
            self.inbox.close();
            tracing::debug!(was_connected, "SSE transport disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn session_id(&self) -> Option<String> {
        self.session_id
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookies(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_session_from_query() {
        let url = Url::parse("http://gw/messages?session_id=abc").unwrap();
        assert_eq!(
            resolve_session_id(&url, &BTreeMap::new()).as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn test_session_from_camel_case_query() {
        let url = Url::parse("http://gw/messages?sessionId=abc").unwrap();
        assert_eq!(
            resolve_session_id(&url, &BTreeMap::new()).as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn test_session_from_cookie_only() {
        let url = Url::parse("http://gw/messages").unwrap();
        let jar = cookies(&[("mcp_session", "xyz"), ("theme", "dark")]);
        assert_eq!(resolve_session_id(&url, &jar).as_deref(), Some("xyz"));
    }

    #[test]
    fn test_query_wins_over_disagreeing_cookie() {
        let url = Url::parse("http://gw/messages?session_id=from-query").unwrap();
        let jar = cookies(&[("session_id", "from-cookie")]);
        assert_eq!(
            resolve_session_id(&url, &jar).as_deref(),
            Some("from-query")
        );
    }

    #[test]
    fn test_no_session_anywhere() {
        let url = Url::parse("http://gw/messages").unwrap();
        assert!(resolve_session_id(&url, &cookies(&[("theme", "dark")])).is_none());
    }

    #[test]
    fn test_parse_set_cookie_variants() {
        assert_eq!(
            parse_set_cookie("session_id=\"q1\"; Secure"),
            Some(("session_id".to_string(), "q1".to_string()))
        );
        assert_eq!(parse_set_cookie("=novalue"), None);
        assert_eq!(
            parse_set_cookie("empty="),
            Some(("empty".to_string(), String::new()))
        );
    }

    #[test]
    fn test_cookie_header_format() {
        let jar = cookies(&[("b", "2"), ("a", "1")]);
        assert_eq!(format_cookie_header(&jar).as_deref(), Some("a=1; b=2"));
        assert!(format_cookie_header(&BTreeMap::new()).is_none());
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let t = SseTransport::new(
            Url::parse("http://localhost:9/sse").unwrap(),
            HashMap::new(),
            HashMap::new(),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(t.send("{}".to_string()).await.is_err());
        assert!(t.post_endpoint().is_none());
    }

    #[test]
    fn test_connect_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        let t = SseTransport::new(
            Url::parse("http://localhost:9/sse").unwrap(),
            HashMap::new(),
            HashMap::new(),
            Duration::from_secs(1),
        )
        .unwrap();
        let fut = t.connect();
        assert_send(&fut);
    }
}
