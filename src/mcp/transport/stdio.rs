//! Stdio transport: newline-delimited JSON over byte streams
//!
//! [`StdioTransport`] speaks to a gateway through two byte streams, one JSON
//! message per line. The streams are either the stdin/stdout pipes of a
//! child process spawned on [`Transport::connect`] (see
//! [`StdioTransport::command`]) or any reader/writer pair supplied by the
//! caller (see [`StdioTransport::from_streams`]).
//!
//! # Protocol
//!
//! - Outbound messages are written as a single JSON object followed by
//!   `\n`, then flushed.
//! - Inbound lines are trimmed; blank lines are skipped.
//! - A child's stderr is diagnostic only and is logged at debug level.
//!
//! # Lifecycle
//!
//! On disconnect, or when dropped while still running, the child receives
//! SIGTERM (Unix) and is killed if it has not exited within a short grace
//! period.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::{Result, ToolgateError};
use crate::mcp::transport::{Inbox, InboxSender, Transport};

/// Grace period between SIGTERM and a hard kill.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

enum StdioSource {
    Command {
        program: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    Streams {
        reader: BoxedReader,
        writer: BoxedWriter,
    },
}

impl std::fmt::Debug for StdioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StdioSource::Command { program, args, .. } => f
                .debug_struct("Command")
                .field("program", program)
                .field("args", args)
                .finish_non_exhaustive(),
            StdioSource::Streams { .. } => f.write_str("Streams"),
        }
    }
}

/// Stdio-based transport.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use toolgate::mcp::transport::{stdio::StdioTransport, Transport};
///
/// # async fn demo() -> toolgate::Result<()> {
/// let transport = StdioTransport::command(
///     "npx",
///     vec!["-y".into(), "@modelcontextprotocol/server-everything".into()],
///     HashMap::new(),
/// );
/// transport.connect().await?;
/// # Ok(())
/// # }
/// ```
pub struct StdioTransport {
    source: std::sync::Mutex<Option<StdioSource>>,
    writer: Mutex<Option<BoxedWriter>>,
    child: Arc<Mutex<Option<Child>>>,
    inbox: Arc<Inbox>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl StdioTransport {
    /// Describe a child process to spawn on connect.
    ///
    /// The child's environment is cleared before `env` is applied, so
    /// gateway processes only see what the configuration grants them. Pass
    /// `PATH` explicitly when the program is not an absolute path.
    ///
    /// # Arguments
    ///
    /// * `program` - Executable name or path
    /// * `args` - Command-line arguments
    /// * `env` - Complete environment for the child
    pub fn command(
        program: impl Into<String>,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> Self {
        Self::with_source(StdioSource::Command {
            program: program.into(),
            args,
            env,
        })
    }

    /// Use an existing reader/writer pair, for example an in-memory duplex.
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_source(StdioSource::Streams {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }

    fn with_source(source: StdioSource) -> Self {
        Self {
            source: std::sync::Mutex::new(Some(source)),
            writer: Mutex::new(None),
            child: Arc::new(Mutex::new(None)),
            inbox: Arc::new(Inbox::new()),
            tasks: std::sync::Mutex::new(Vec::new()),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    fn take_source(&self) -> Option<StdioSource> {
        self.source
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(handle);
    }

    fn spawn_child(
        program: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<(Child, BoxedReader, BoxedWriter, tokio::process::ChildStderr)> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .envs(env);

        let mut child = cmd.spawn().map_err(|e| {
            ToolgateError::Transport(format!("failed to spawn gateway `{program}`: {e}"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolgateError::Transport("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolgateError::Transport("child stdout unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ToolgateError::Transport("child stderr unavailable".into()))?;

        tracing::info!(program, pid = ?child.id(), "spawned stdio gateway");
        Ok((child, Box::new(stdout), Box::new(stdin), stderr))
    }

    async fn terminate_child(child: &mut Child) {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                // SAFETY: pid is a live process ID obtained from tokio::process::Child.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
            }
            if let Ok(Ok(status)) = tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
                tracing::debug!(%status, "stdio gateway exited");
                return;
            }
        }
        if let Err(e) = child.kill().await {
            tracing::debug!(error = %e, "failed to kill stdio gateway");
        }
    }
}

async fn read_lines(reader: BoxedReader, inbox: InboxSender, connected: Arc<AtomicBool>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if inbox.send(Ok(line.to_string())).is_err() {
                    break;
                }
            }
            Ok(None) => {
                tracing::debug!("stdio gateway closed its output");
                connected.store(false, Ordering::SeqCst);
                let _ = inbox.send(Err(ToolgateError::Eof));
                break;
            }
            Err(e) => {
                connected.store(false, Ordering::SeqCst);
                let _ = inbox.send(Err(ToolgateError::Transport(format!(
                    "stdio read failed: {e}"
                ))));
                break;
            }
        }
    }
}

async fn log_stderr(stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "toolgate::mcp::transport::stdio", "gateway stderr: {}", line);
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> Result<()> {
        let source = self.take_source().ok_or_else(|| {
            ToolgateError::Transport("stdio transport already connected or closed".to_string())
        })?;

        let (reader, writer) = match source {
            StdioSource::Command { program, args, env } => {
                let (child, reader, writer, stderr) = Self::spawn_child(&program, &args, &env)?;
                *self.child.lock().await = Some(child);
                self.track(tokio::spawn(log_stderr(stderr)));
                (reader, writer)
            }
            StdioSource::Streams { reader, writer } => (reader, writer),
        };

        *self.writer.lock().await = Some(writer);
        self.connected.store(true, Ordering::SeqCst);
        self.track(tokio::spawn(read_lines(
            reader,
            self.inbox.sender(),
            Arc::clone(&self.connected),
        )));
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| ToolgateError::Transport("stdio transport not connected".to_string()))?;

        let mut line = message;
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ToolgateError::Transport(format!("stdio write failed: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| ToolgateError::Transport(format!("stdio flush failed: {e}")))
    }

    async fn receive(&self) -> Result<String> {
        self.inbox.recv().await
    }

    async fn disconnect(&self) -> Result<()> {
        // Never-connected transports can still hold a source; drop it so a
        // later connect fails instead of spawning.
        let _ = self.take_source();

        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        let writer = self.writer.lock().await.take();
        let child = self.child.lock().await.take();
        if !was_connected && writer.is_none() && child.is_none() {
            return Ok(());
        }

        // Closing stdin is the polite shutdown signal for most gateways.
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }
        if let Some(mut child) = child {
            Self::terminate_child(&mut child).await;
        }

        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            handle.abort();
        }
        self.inbox.close();
        tracing::debug!("stdio transport disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for StdioTransport {
    /// Best-effort termination of a still-running child.
    ///
    /// Must not block: on Unix SIGTERM is delivered directly, elsewhere
    /// `start_kill` is used.
    fn drop(&mut self) {
        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(child) = guard.as_mut() {
                #[cfg(unix)]
                {
                    if let Some(pid) = child.id() {
                        // SAFETY: pid is a live process ID obtained from tokio::process::Child.
                        unsafe {
                            libc::kill(pid as libc::pid_t, libc::SIGTERM);
                        }
                    }
                }
                #[cfg(not(unix))]
                {
                    let _ = child.start_kill();
                }
            }
        }
    }
}
