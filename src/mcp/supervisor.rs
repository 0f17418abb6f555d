//! Connection supervisor
//!
//! [`ConnectionSupervisor`] is the entry point applications use. It owns
//! the current [`Session`] and its [`ToolRegistry`], establishes them with
//! retry and exponential backoff, keeps request/error counters, and reports
//! health.
//!
//! # Retry policy
//!
//! `connect` makes up to `max_retries + 1` attempts. Only errors for which
//! [`ToolgateError::is_retryable`] holds (transport and handshake failures)
//! are retried; anything else is returned immediately. The delay before
//! retry `n` is `min(base * 2^(n-1), max_backoff)`.
//!
//! Every attempt builds a fresh transport through a [`TransportFactory`],
//! since transports are single-use.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ToolgateError};
use crate::mcp::config::{GatewayConfig, TransportKind};
use crate::mcp::protocol::{ProtocolEngine, RpcCaller};
use crate::mcp::registry::{ToolOutcome, ToolRegistry};
use crate::mcp::session::{Session, SessionState};
use crate::mcp::transport::http::HttpTransport;
use crate::mcp::transport::sse::SseTransport;
use crate::mcp::transport::stdio::StdioTransport;
use crate::mcp::transport::Transport;
use crate::mcp::types::{Implementation, ToolDescriptor, NOTIF_TOOLS_LIST_CHANGED};

// ---------------------------------------------------------------------------
// Transport construction
// ---------------------------------------------------------------------------

/// Builds a new, unconnected transport for each connection attempt.
pub trait TransportFactory: Send + Sync + std::fmt::Debug {
    /// Create a transport.
    ///
    /// # Errors
    ///
    /// [`ToolgateError::Config`] when the settings cannot describe a
    /// transport, or [`ToolgateError::Transport`] if construction fails.
    fn create(&self) -> Result<Arc<dyn Transport>>;
}

/// Factory that builds the transport named by a [`GatewayConfig`].
#[derive(Debug, Clone)]
pub struct ConfigTransportFactory {
    config: GatewayConfig,
}

impl ConfigTransportFactory {
    /// Wrap `config`.
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for ConfigTransportFactory {
    fn create(&self) -> Result<Arc<dyn Transport>> {
        build_transport(&self.config)
    }
}

/// Build the transport described by `config`.
///
/// # Errors
///
/// [`ToolgateError::Config`] for a stdio config without a command or a
/// network config with a malformed URL.
pub fn build_transport(config: &GatewayConfig) -> Result<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match config.transport {
        TransportKind::Stdio => {
            let program = config.command.clone().ok_or_else(|| {
                ToolgateError::Config("gateway.command is required for stdio".to_string())
            })?;
            Arc::new(StdioTransport::command(
                program,
                config.args.clone(),
                config.env.clone(),
            ))
        }
        TransportKind::Sse => Arc::new(SseTransport::new(
            config.parsed_url()?,
            config.headers.clone(),
            config.cookies.clone(),
            config.connect_timeout(),
        )?),
        TransportKind::StreamingHttp => Arc::new(HttpTransport::new(
            config.parsed_url()?,
            config.headers.clone(),
            config.connect_timeout(),
        )?),
    };
    Ok(transport)
}

/// Delay before retry number `attempt` (1-based).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use toolgate::mcp::supervisor::backoff_delay;
///
/// let base = Duration::from_secs(1);
/// let cap = Duration::from_secs(10);
/// assert_eq!(backoff_delay(1, base, cap), Duration::from_secs(1));
/// assert_eq!(backoff_delay(3, base, cap), Duration::from_secs(4));
/// assert_eq!(backoff_delay(9, base, cap), Duration::from_secs(10));
/// ```
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.max(1) - 1;
    let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}

// ---------------------------------------------------------------------------
// Health reporting
// ---------------------------------------------------------------------------

/// Outcome class of a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Connected, and the probe succeeded within the threshold.
    Healthy,
    /// Connected, but the probe failed or was slow.
    Degraded,
    /// No active session.
    Disconnected,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Disconnected => "disconnected",
        })
    }
}

/// Result of [`ConnectionSupervisor::health_check`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Overall status
    pub status: HealthStatus,
    /// Probe round-trip time, when a probe ran
    pub response_time_ms: Option<u64>,
    /// Tools discovered by the probe
    pub tool_count: Option<usize>,
    /// `errors / max(requests, 1)` after the probe
    pub error_rate: f64,
    /// Explanation for a non-healthy status
    pub message: Option<String>,
    /// When the check ran
    pub checked_at: DateTime<Utc>,
}

/// Snapshot of the supervisor's counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SupervisorStats {
    /// Supervised operations attempted
    pub requests: u64,
    /// Supervised operations that failed
    pub errors: u64,
    /// `errors / max(requests, 1)`
    pub error_rate: f64,
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Connection {
    session: Arc<Session>,
    registry: Arc<ToolRegistry>,
}

/// Owns the gateway connection and everything built on it.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use toolgate::mcp::config::GatewayConfig;
/// use toolgate::mcp::supervisor::ConnectionSupervisor;
///
/// # async fn demo() -> toolgate::Result<()> {
/// let supervisor = Arc::new(ConnectionSupervisor::new(GatewayConfig::default()));
/// supervisor.connect().await?;
/// for tool in supervisor.list_tools().await? {
///     println!("{}: {}", tool.name, tool.description);
/// }
/// let outcome = supervisor.execute("echo", serde_json::json!({"text": "hi"})).await?;
/// println!("{}", outcome.result.content);
/// supervisor.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConnectionSupervisor {
    config: GatewayConfig,
    factory: Arc<dyn TransportFactory>,
    connection: std::sync::RwLock<Option<Connection>>,
    connect_lock: tokio::sync::Mutex<()>,
    requests: AtomicU64,
    errors: AtomicU64,
}

impl ConnectionSupervisor {
    /// Supervisor that builds transports from `config`.
    pub fn new(config: GatewayConfig) -> Self {
        let factory = Arc::new(ConfigTransportFactory::new(config.clone()));
        Self::with_factory(config, factory)
    }

    /// Supervisor with a custom transport factory.
    ///
    /// Timing, retry, and identity settings still come from `config`.
    pub fn with_factory(config: GatewayConfig, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            config,
            factory,
            connection: std::sync::RwLock::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// The configuration in use.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn current(&self) -> Option<Connection> {
        self.connection
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn require(&self) -> Result<Connection> {
        self.current()
            .filter(|c| c.session.is_active())
            .ok_or_else(|| ToolgateError::SessionInactive("not connected to a gateway".to_string()))
    }

    /// Whether there is an active session with a live connection.
    pub fn is_connected(&self) -> bool {
        self.current().map_or(false, |c| {
            c.session.is_active() && c.session.engine().is_connected()
        })
    }

    /// State of the current session, if any.
    pub fn session_state(&self) -> Option<SessionState> {
        self.current().map(|c| c.session.state())
    }

    /// Server identity of the current session.
    pub fn server_info(&self) -> Option<Implementation> {
        self.current().and_then(|c| c.session.engine().server_info())
    }

    /// Session identifier negotiated by the current transport.
    pub fn session_id(&self) -> Option<String> {
        self.current().and_then(|c| c.session.engine().session_id())
    }

    /// The current tool registry.
    pub fn registry(&self) -> Option<Arc<ToolRegistry>> {
        self.current().map(|c| c.registry)
    }

    /// Establish a session, retrying transient failures.
    ///
    /// Does nothing when already connected.
    ///
    /// # Errors
    ///
    /// The first non-retryable error, or the last error once every attempt
    /// has failed.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            tracing::debug!("already connected");
            return Ok(());
        }
        // A dead session left behind by a dropped connection.
        self.teardown().await;

        let attempts = self.config.max_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::info!(
                attempt,
                attempts,
                transport = %self.config.transport,
                "connecting to gateway"
            );
            match self.establish().await {
                Ok(connection) => {
                    *self
                        .connection
                        .write()
                        .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(connection);
                    tracing::info!(attempt, "connected to gateway");
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = backoff_delay(
                        attempt,
                        self.config.retry_base_delay(),
                        self.config.max_backoff(),
                    );
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "connection attempt failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    crate::metrics::record_error(e.kind());
                    tracing::error!(attempt, error = %e, "giving up on gateway connection");
                    return Err(e);
                }
            }
        }
    }

    async fn establish(&self) -> Result<Connection> {
        let transport = self.factory.create()?;
        let engine = ProtocolEngine::new(
            transport,
            self.config.client_info(),
            self.config.call_timeout(),
        );
        let session = Arc::new(Session::new(engine));

        let engine = Arc::clone(session.engine());
        let registry = Arc::new(ToolRegistry::new(
            engine.clone() as Arc<dyn RpcCaller>,
            self.config.tool_cache_ttl(),
            self.config.call_timeout(),
        ));
        // Registered before the handshake so a change announced right after
        // `notifications/initialized` is not missed.
        let weak = Arc::downgrade(&registry);
        engine.on_notification(NOTIF_TOOLS_LIST_CHANGED, move |_| {
            if let Some(registry) = weak.upgrade() {
                tracing::info!("gateway tool list changed");
                registry.clear();
            }
        });

        session.enter().await?;
        Ok(Connection { session, registry })
    }

    async fn teardown(&self) {
        let previous = self
            .connection
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(connection) = previous {
            connection.registry.clear();
            connection.session.exit().await;
        }
    }

    /// End the current session. Safe to call repeatedly.
    pub async fn close(&self) {
        let _guard = self.connect_lock.lock().await;
        self.teardown().await;
        tracing::info!("gateway connection closed");
    }

    /// Close, discard cached tools, and connect again.
    ///
    /// # Errors
    ///
    /// Same as [`Self::connect`].
    pub async fn reconnect(&self) -> Result<()> {
        self.close().await;
        self.connect().await
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = &result {
            self.errors.fetch_add(1, Ordering::SeqCst);
            crate::metrics::record_error(e.kind());
        }
        result
    }

    /// Every tool the gateway offers, sorted by name.
    ///
    /// # Errors
    ///
    /// [`ToolgateError::SessionInactive`] when not connected, or any
    /// discovery error.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let result = match self.require() {
            Ok(connection) => connection.registry.list().await,
            Err(e) => Err(e),
        };
        self.track(result)
    }

    /// Validate arguments and invoke a tool.
    ///
    /// # Errors
    ///
    /// [`ToolgateError::SessionInactive`] when not connected, or any error
    /// from [`ToolRegistry::execute`].
    pub async fn execute(&self, name: &str, args: Value) -> Result<ToolOutcome> {
        let result = match self.require() {
            Ok(connection) => connection.registry.execute(name, args).await,
            Err(e) => Err(e),
        };
        self.track(result)
    }

    /// `errors / max(requests, 1)`.
    pub fn error_rate(&self) -> f64 {
        self.stats().error_rate
    }

    /// Counter snapshot.
    pub fn stats(&self) -> SupervisorStats {
        let requests = self.requests.load(Ordering::SeqCst);
        let errors = self.errors.load(Ordering::SeqCst);
        SupervisorStats {
            requests,
            errors,
            error_rate: errors as f64 / requests.max(1) as f64,
        }
    }

    /// Probe the gateway with a forced tool discovery.
    ///
    /// - Not connected: [`HealthStatus::Disconnected`], no probe.
    /// - Probe succeeded within the response threshold:
    ///   [`HealthStatus::Healthy`].
    /// - Probe failed or was slower than the threshold:
    ///   [`HealthStatus::Degraded`].
    pub async fn health_check(&self) -> HealthReport {
        let checked_at = Utc::now();
        let Some(connection) = self.current().filter(|_| self.is_connected()) else {
            return HealthReport {
                status: HealthStatus::Disconnected,
                response_time_ms: None,
                tool_count: None,
                error_rate: self.error_rate(),
                message: Some("not connected to a gateway".to_string()),
                checked_at,
            };
        };

        let threshold = self.config.health_response_threshold();
        let start = Instant::now();
        let probe = self.track(connection.registry.refresh().await);
        let elapsed = start.elapsed();

        let (status, tool_count, message) = match probe {
            Ok(tools) if elapsed <= threshold => (HealthStatus::Healthy, Some(tools.len()), None),
            Ok(tools) => (
                HealthStatus::Degraded,
                Some(tools.len()),
                Some(format!(
                    "probe took {}ms, threshold is {}ms",
                    elapsed.as_millis(),
                    threshold.as_millis()
                )),
            ),
            Err(e) => (HealthStatus::Degraded, None, Some(e.to_string())),
        };

        HealthReport {
            status,
            response_time_ms: Some(elapsed.as_millis() as u64),
            tool_count,
            error_rate: self.error_rate(),
            message,
            checked_at,
        }
    }

    /// Run [`Self::health_check`] every `interval` until `cancellation`
    /// fires.
    pub fn spawn_health_monitor(
        self: &Arc<Self>,
        interval: Duration,
        cancellation: CancellationToken,
    ) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;

                    _ = cancellation.cancelled() => break,

                    _ = ticker.tick() => {
                        let report = supervisor.health_check().await;
                        match report.status {
                            HealthStatus::Healthy => tracing::info!(
                                response_time_ms = ?report.response_time_ms,
                                tool_count = ?report.tool_count,
                                "gateway healthy"
                            ),
                            status => tracing::warn!(
                                %status,
                                message = report.message.as_deref().unwrap_or(""),
                                error_rate = report.error_rate,
                                "gateway not healthy"
                            ),
                        }
                    }
                }
            }
            tracing::debug!("health monitor stopped");
        })
    }
}
