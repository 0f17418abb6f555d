//! Session lifecycle
//!
//! A [`Session`] owns exactly one [`ProtocolEngine`] for one connection
//! attempt and walks it through:
//!
//! ```text
//! Unstarted -> Connecting -> Handshaking -> Active -> Ending -> Ended
//!                   \______________\_____________________________/^
//!                          (failure: cleanup, then Ended)
//! ```
//!
//! Sessions are single-use. Entering one that is not `Unstarted` fails with
//! [`ToolgateError::SessionReentry`]; reconnecting means building a new
//! session.

use std::fmt;
use std::sync::Arc;

use crate::error::{Result, ToolgateError};
use crate::mcp::protocol::ProtocolEngine;
use crate::mcp::types::ServerCapabilities;

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet entered.
    Unstarted,
    /// Opening the transport.
    Connecting,
    /// Transport open, handshake in progress.
    Handshaking,
    /// Handshake complete; calls allowed.
    Active,
    /// Shutting down.
    Ending,
    /// Finished; terminal.
    Ended,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Unstarted => "unstarted",
            SessionState::Connecting => "connecting",
            SessionState::Handshaking => "handshaking",
            SessionState::Active => "active",
            SessionState::Ending => "ending",
            SessionState::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// One connection attempt and its protocol engine.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use toolgate::mcp::protocol::ProtocolEngine;
/// use toolgate::mcp::session::{Session, SessionState};
/// use toolgate::mcp::transport::fake::{FakeReply, FakeTransport};
/// use toolgate::mcp::types::Implementation;
///
/// # #[tokio::main]
/// # async fn main() -> toolgate::Result<()> {
/// let (transport, handle) = FakeTransport::new();
/// let _server = handle.serve(|method, _| match method {
///     "initialize" => FakeReply::Result(serde_json::json!({
///         "protocolVersion": "2025-03-26",
///         "capabilities": {},
///         "serverInfo": {"name": "demo"}
///     })),
///     _ => FakeReply::Silent,
/// });
/// let engine = ProtocolEngine::new(
///     Arc::new(transport),
///     Implementation { name: "toolgate".into(), version: "0.1.0".into() },
///     Duration::from_secs(5),
/// );
///
/// let session = Session::new(engine);
/// session.enter().await?;
/// assert_eq!(session.state(), SessionState::Active);
/// session.exit().await;
/// assert_eq!(session.state(), SessionState::Ended);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Session {
    engine: Arc<ProtocolEngine>,
    state: std::sync::Mutex<SessionState>,
}

impl Session {
    /// Wrap an unconnected engine.
    pub fn new(engine: ProtocolEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            state: std::sync::Mutex::new(SessionState::Unstarted),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// True only in [`SessionState::Active`].
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// The engine this session owns.
    pub fn engine(&self) -> &Arc<ProtocolEngine> {
        &self.engine
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let from = *state;
        tracing::debug!(%from, to = %next, "session state change");
        *state = next;
    }

    /// Connect and handshake.
    ///
    /// On failure the engine is torn down, the session ends in
    /// [`SessionState::Ended`], and the original error is returned.
    ///
    /// # Errors
    ///
    /// - [`ToolgateError::SessionReentry`] if the session was entered before.
    /// - The transport or handshake error that stopped establishment.
    pub async fn enter(&self) -> Result<ServerCapabilities> {
        {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if *state != SessionState::Unstarted {
                return Err(ToolgateError::SessionReentry(state.to_string()));
            }
            *state = SessionState::Connecting;
        }

        if let Err(e) = self.engine.connect().await {
            tracing::warn!(error = %e, "session failed while connecting");
            self.fail().await;
            return Err(e);
        }

        self.set_state(SessionState::Handshaking);
        match self.engine.initialize().await {
            Ok(capabilities) => {
                self.set_state(SessionState::Active);
                tracing::info!(session_id = ?self.engine.session_id(), "session active");
                Ok(capabilities)
            }
            Err(e) => {
                tracing::warn!(error = %e, "session failed during handshake");
                self.fail().await;
                Err(e)
            }
        }
    }

    async fn fail(&self) {
        self.engine.shutdown().await;
        if let Err(e) = self.engine.disconnect().await {
            tracing::debug!(error = %e, "cleanup after failed establishment also failed");
        }
        self.set_state(SessionState::Ended);
    }

    /// End the session: best-effort shutdown, then disconnect.
    ///
    /// Errors are logged and swallowed. Calling this on a session that is
    /// not active only marks it ended.
    pub async fn exit(&self) {
        {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            match *state {
                SessionState::Active => *state = SessionState::Ending,
                SessionState::Ended | SessionState::Ending => return,
                _ => {
                    *state = SessionState::Ended;
                    return;
                }
            }
        }

        self.engine.shutdown().await;
        if let Err(e) = self.engine.disconnect().await {
            tracing::warn!(error = %e, "transport disconnect failed during session exit");
        }
        self.set_state(SessionState::Ended);
        tracing::info!("session ended");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state() == SessionState::Active {
            tracing::warn!("active session dropped without exit; aborting");
            self.engine.abort();
        }
    }
}
