//! Local channel listener for same-host clients.
//!
//! [`LocalChannelListener`] accepts connections on a named pipe (Windows)
//! or Unix domain socket (Linux/macOS) using the `interprocess` crate.
//! Each connection carries one request: the client writes a message, the
//! listener queues it for the consumer, and the consumer's reply (sent
//! through the message's [`ReplySlot`]) is written back before the
//! connection closes.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use interprocess::local_socket::{tokio::prelude::*, GenericFilePath, ListenerOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::net::{default_channel_path, LifecycleState, DEFAULT_QUEUE_CAPACITY};
use crate::{AppError, Result};

/// Default application name, used to derive the channel path when no
/// explicit path is configured.
pub const DEFAULT_APP_NAME: &str = "relaycast";

/// Default maximum bytes read from a single channel connection.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Response written to a client whose message was rejected because the
/// inbound queue was full.
pub const BUSY_RESPONSE: &str = "ERROR: Server busy";

/// Configuration for a [`LocalChannelListener`], set once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Explicit channel path. When `None`, the path is derived from
    /// `app_name` per platform convention.
    pub path: Option<PathBuf>,
    /// Application name used to derive the default channel path.
    pub app_name: String,
    /// Maximum bytes read per connection; longer messages are truncated.
    pub read_buffer_size: usize,
    /// Inbound queue capacity in messages.
    pub queue_capacity: usize,
}

impl ChannelOptions {
    /// Options with every field at its default ([`DEFAULT_APP_NAME`],
    /// derived path).
    #[must_use]
    pub fn new() -> Self {
        Self::for_app(DEFAULT_APP_NAME)
    }

    /// Options for an application name, with the path derived from it.
    #[must_use]
    pub fn for_app(app_name: impl Into<String>) -> Self {
        Self {
            path: None,
            app_name: app_name.into(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Options bound to an explicit channel path.
    #[must_use]
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new()
        }
    }

    /// Validate the options without touching the filesystem.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no path can be derived or any numeric
    /// field is zero.
    pub fn validate(&self) -> Result<()> {
        if self.path.is_none() && self.app_name.is_empty() {
            return Err(AppError::Config(
                "app_name must not be empty when no channel path is set".into(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(AppError::Config(
                "read_buffer_size must be greater than zero".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(AppError::Config(
                "queue_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// The path the listener will bind: the explicit path when set,
    /// otherwise the platform default for `app_name`.
    #[must_use]
    pub fn resolve_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| default_channel_path(&self.app_name))
    }
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot reply handle carried by every [`ChannelMessage`].
///
/// The consumer calls [`reply`](Self::reply) at most once; dropping the
/// slot unanswered closes the client connection without a response.
#[derive(Debug)]
pub struct ReplySlot(oneshot::Sender<String>);

impl ReplySlot {
    /// Create a slot and the receiving end the connection handler waits on.
    #[must_use]
    pub fn new() -> (Self, oneshot::Receiver<String>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    /// Send the response text back to the waiting client.
    ///
    /// The client may already be gone; that case is ignored.
    pub fn reply(self, text: impl Into<String>) {
        let _ = self.0.send(text.into());
    }
}

/// A message received over the local channel.
#[derive(Debug)]
pub struct ChannelMessage {
    /// Message text, decoded as UTF-8 (lossy) and whitespace-trimmed.
    pub content: String,
    /// Receipt timestamp.
    pub received_at: DateTime<Utc>,
    /// Reply handle for the originating connection.
    pub reply: ReplySlot,
}

/// Guarded mutable state; the lock is never held across an await.
#[derive(Debug)]
struct Inner {
    state: LifecycleState,
    queue_tx: Option<mpsc::Sender<ChannelMessage>>,
    queue_rx: Option<mpsc::Receiver<ChannelMessage>>,
    loop_handle: Option<JoinHandle<()>>,
}

/// Local IPC listener with a start/accept-loop/stop lifecycle.
///
/// `start` binds the channel path and spawns the accept loop as a
/// background task; each accepted connection is handled on its own task
/// so a slow client never blocks the loop. Like the multicast client,
/// the listener is one-shot: once stopped it cannot be started again.
#[derive(Debug)]
pub struct LocalChannelListener {
    options: ChannelOptions,
    bind_path: PathBuf,
    inner: Mutex<Inner>,
    cancel: CancellationToken,
}

impl LocalChannelListener {
    /// Construct a listener from validated options. Touches no sockets.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the options fail validation.
    pub fn new(options: ChannelOptions) -> Result<Self> {
        options.validate()?;
        let bind_path = options.resolve_path();
        let (queue_tx, queue_rx) = mpsc::channel(options.queue_capacity);
        Ok(Self {
            options,
            bind_path,
            inner: Mutex::new(Inner {
                state: LifecycleState::Created,
                queue_tx: Some(queue_tx),
                queue_rx: Some(queue_rx),
                loop_handle: None,
            }),
            cancel: CancellationToken::new(),
        })
    }

    /// Bind the channel path and spawn the accept loop.
    ///
    /// On Unix a stale socket file left by a crashed process is removed
    /// before binding. On error the listener's state is unchanged.
    ///
    /// # Errors
    ///
    /// - `AppError::AlreadyRunning` if the listener is already running.
    /// - `AppError::Stopped` if the listener has already been stopped.
    /// - `AppError::Io` if a stale socket file exists but cannot be removed.
    /// - `AppError::Channel` if the bind itself fails.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            LifecycleState::Running | LifecycleState::Stopping => {
                return Err(AppError::AlreadyRunning("local channel listener".into()));
            }
            LifecycleState::Stopped => {
                return Err(AppError::Stopped(
                    "local channel listener cannot be restarted".into(),
                ));
            }
            LifecycleState::Created => {}
        }

        // A crashed process leaves its socket file behind and the bind
        // would fail with "address in use".
        #[cfg(unix)]
        if let Err(err) = std::fs::remove_file(&self.bind_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                return Err(AppError::Io(format!(
                    "failed to remove stale socket {}: {err}",
                    self.bind_path.display()
                )));
            }
        }

        let name = self
            .bind_path
            .clone()
            .to_fs_name::<GenericFilePath>()
            .map_err(|err| {
                AppError::Channel(format!(
                    "invalid channel path '{}': {err}",
                    self.bind_path.display()
                ))
            })?;
        let listener = ListenerOptions::new()
            .name(name)
            .create_tokio()
            .map_err(|err| {
                AppError::Channel(format!(
                    "failed to bind channel path '{}': {err}",
                    self.bind_path.display()
                ))
            })?;

        let queue_tx = inner
            .queue_tx
            .take()
            .ok_or_else(|| AppError::Channel("inbound queue sender missing".into()))?;

        info!(path = %self.bind_path.display(), "local channel listening");

        let handle = tokio::spawn(
            Self::accept_loop(
                listener,
                queue_tx,
                self.cancel.clone(),
                self.options.read_buffer_size,
            )
            .instrument(info_span!("local_channel", path = %self.bind_path.display())),
        );

        inner.loop_handle = Some(handle);
        inner.state = LifecycleState::Running;
        Ok(())
    }

    /// Take the inbound queue receiver. Consumable once: the first call
    /// returns the receiver, every later call returns `None`.
    ///
    /// The sequence ends once the accept loop has exited and every
    /// in-flight connection handler has finished.
    #[must_use]
    pub fn messages(&self) -> Option<mpsc::Receiver<ChannelMessage>> {
        self.lock().queue_rx.take()
    }

    /// Signal the accept loop to exit and wait for it to finish, then
    /// remove the socket file.
    ///
    /// In-flight connection handlers are not interrupted; their replies
    /// still reach the client. A no-op when the listener is not running.
    pub async fn stop(&self) {
        let handle = {
            let mut inner = self.lock();
            if inner.state != LifecycleState::Running {
                return;
            }
            inner.state = LifecycleState::Stopping;
            inner.loop_handle.take()
        };

        self.cancel.cancel();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        // The listener may already have reclaimed the file on drop.
        #[cfg(unix)]
        if let Err(err) = std::fs::remove_file(&self.bind_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %self.bind_path.display(), %err, "failed to remove socket file");
            }
        }

        self.lock().state = LifecycleState::Stopped;
    }

    /// The path this listener binds (or bound).
    #[must_use]
    pub fn bind_path(&self) -> &Path {
        &self.bind_path
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    /// Whether the accept loop is currently active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock().state == LifecycleState::Running
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Core accept loop: every accepted connection gets its own task.
    async fn accept_loop(
        listener: interprocess::local_socket::tokio::Listener,
        queue: mpsc::Sender<ChannelMessage>,
        cancel: CancellationToken,
        read_buffer_size: usize,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("local channel shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok(stream) => {
                            let queue = queue.clone();
                            tokio::spawn(
                                Self::handle_connection(stream, queue, read_buffer_size)
                                    .instrument(info_span!("channel_conn")),
                            );
                        }
                        Err(err) => {
                            if cancel.is_cancelled() {
                                break;
                            }
                            warn!(%err, "failed to accept channel connection");
                        }
                    }
                }
            }
        }
        // The queue closes once this sender and every in-flight
        // connection handler's clone have been dropped.
    }

    /// Handle a single client connection: one read, one queued message,
    /// one written reply.
    async fn handle_connection(
        stream: interprocess::local_socket::tokio::Stream,
        queue: mpsc::Sender<ChannelMessage>,
        read_buffer_size: usize,
    ) {
        let (mut recver, mut sender) = stream.split();

        let mut buf = vec![0_u8; read_buffer_size];
        let len = match recver.read(&mut buf).await {
            Ok(0) => return, // peer closed without sending
            Ok(len) => len,
            Err(err) => {
                debug!(%err, "channel read failed");
                return;
            }
        };

        let content = String::from_utf8_lossy(&buf[..len]).trim().to_owned();
        let (reply, reply_rx) = ReplySlot::new();
        let message = ChannelMessage {
            content,
            received_at: Utc::now(),
            reply,
        };

        match queue.try_send(message) {
            Ok(()) => {
                // A dropped slot means the connection closes without a
                // response.
                if let Ok(response) = reply_rx.await {
                    if let Err(err) = sender.write_all(response.as_bytes()).await {
                        debug!(%err, "failed to write channel response");
                    }
                }
            }
            Err(TrySendError::Full(_)) => {
                warn!("inbound queue full, rejecting channel message");
                if let Err(err) = sender.write_all(BUSY_RESPONSE.as_bytes()).await {
                    debug!(%err, "failed to write busy response");
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!("inbound queue consumer gone, dropping channel message");
            }
        }
    }
}
