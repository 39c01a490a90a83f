//! Multicast group client for cross-host LAN notifications.
//!
//! [`MulticastClient`] joins an IPv4 UDP multicast group, continuously
//! receives datagrams into a bounded queue, and broadcasts outbound
//! payloads to the group. Delivery is best-effort: datagrams may be lost,
//! and a full inbound queue drops the newest message rather than stalling
//! the receive loop.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::net::{LifecycleState, DEFAULT_QUEUE_CAPACITY};
use crate::{AppError, Result};

/// Default multicast group address shared by all cooperating hosts.
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 192, 0, 1);

/// Default maximum datagram size in bytes. Also requested as the socket
/// receive-buffer size at start.
pub const DEFAULT_DATAGRAM_SIZE: usize = 8192;

/// Configuration for a [`MulticastClient`], set once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastOptions {
    /// IPv4 multicast group address to join.
    pub group: Ipv4Addr,
    /// UDP port the group communicates on.
    pub port: u16,
    /// Maximum bytes read per datagram; larger payloads are truncated.
    pub datagram_size: usize,
    /// Inbound queue capacity in messages.
    pub queue_capacity: usize,
    /// Drop received datagrams whose sender IP matches this host's own.
    ///
    /// The comparison is by IP address only, so two distinct processes on
    /// the same host are indistinguishable from self when filtering is on.
    pub filter_self: bool,
}

impl MulticastOptions {
    /// Options for the given port with all other fields at their defaults
    /// (group [`DEFAULT_MULTICAST_GROUP`], self-filtering off).
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            group: DEFAULT_MULTICAST_GROUP,
            port,
            datagram_size: DEFAULT_DATAGRAM_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            filter_self: false,
        }
    }

    /// Validate the options without touching the network.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the group address is not an IPv4
    /// multicast address or any numeric field is zero.
    pub fn validate(&self) -> Result<()> {
        if !self.group.is_multicast() {
            return Err(AppError::Config(format!(
                "group address {} is not an IPv4 multicast address",
                self.group
            )));
        }
        if self.port == 0 {
            return Err(AppError::Config("port must be greater than zero".into()));
        }
        if self.datagram_size == 0 {
            return Err(AppError::Config(
                "datagram_size must be greater than zero".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(AppError::Config(
                "queue_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// A datagram received from the multicast group.
#[derive(Debug, Clone)]
pub struct GroupMessage {
    /// Message text, decoded from the datagram bytes as UTF-8 (lossy).
    pub content: String,
    /// Peer address the datagram arrived from.
    pub sender: SocketAddr,
    /// Receipt timestamp.
    pub received_at: DateTime<Utc>,
}

/// Guarded mutable state; the lock is never held across an await.
#[derive(Debug)]
struct Inner {
    state: LifecycleState,
    socket: Option<Arc<UdpSocket>>,
    local_addr: Option<SocketAddr>,
    queue_tx: Option<mpsc::Sender<GroupMessage>>,
    queue_rx: Option<mpsc::Receiver<GroupMessage>>,
    loop_handle: Option<JoinHandle<()>>,
}

/// UDP multicast client with a start/listen-loop/stop lifecycle.
///
/// `start` joins the group and spawns the receive loop as a background
/// task; received datagrams are consumed via [`messages`](Self::messages)
/// and outbound payloads sent via [`broadcast`](Self::broadcast). The
/// client is one-shot: once stopped it cannot be started again, so the
/// inbound queue closes exactly once.
#[derive(Debug)]
pub struct MulticastClient {
    options: MulticastOptions,
    group_addr: SocketAddr,
    inner: Mutex<Inner>,
    cancel: CancellationToken,
}

impl MulticastClient {
    /// Construct a client from validated options. Touches no sockets.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the options fail validation.
    pub fn new(options: MulticastOptions) -> Result<Self> {
        options.validate()?;
        let group_addr = SocketAddr::from((options.group, options.port));
        let (queue_tx, queue_rx) = mpsc::channel(options.queue_capacity);
        Ok(Self {
            options,
            group_addr,
            inner: Mutex::new(Inner {
                state: LifecycleState::Created,
                socket: None,
                local_addr: None,
                queue_tx: Some(queue_tx),
                queue_rx: Some(queue_rx),
                loop_handle: None,
            }),
            cancel: CancellationToken::new(),
        })
    }

    /// Join the multicast group and spawn the receive loop.
    ///
    /// Binds a UDP endpoint capable of both receiving group traffic and
    /// sending, records the locally bound address, and requests the
    /// configured receive-buffer size (failure is logged, not fatal).
    /// On error the client's state is unchanged.
    ///
    /// # Errors
    ///
    /// - `AppError::AlreadyRunning` if the client is already running.
    /// - `AppError::Stopped` if the client has already been stopped.
    /// - `AppError::Multicast` if socket setup or the group join fails.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            LifecycleState::Running | LifecycleState::Stopping => {
                return Err(AppError::AlreadyRunning("multicast client".into()));
            }
            LifecycleState::Stopped => {
                return Err(AppError::Stopped(
                    "multicast client cannot be restarted".into(),
                ));
            }
            LifecycleState::Created => {}
        }

        let socket = join_group_socket(
            self.options.group,
            self.options.port,
            self.options.datagram_size,
        )?;
        let socket = UdpSocket::from_std(socket).map_err(|err| {
            AppError::Multicast(format!("failed to register socket with the runtime: {err}"))
        })?;
        let local_addr = socket
            .local_addr()
            .map_err(|err| AppError::Multicast(format!("failed to read local address: {err}")))?;

        // The socket binds the wildcard address, so the bound address alone
        // cannot identify this host. Resolve the outbound IP once instead.
        let identity = if self.options.filter_self {
            match local_identity(self.group_addr) {
                Ok(ip) => Some(ip),
                Err(err) => {
                    warn!(%err, "failed to resolve local identity, self-filtering disabled");
                    None
                }
            }
        } else {
            None
        };

        let queue_tx = inner
            .queue_tx
            .take()
            .ok_or_else(|| AppError::Multicast("inbound queue sender missing".into()))?;

        info!(group = %self.group_addr, local = %local_addr, "multicast client listening");

        let socket = Arc::new(socket);
        let handle = tokio::spawn(
            Self::receive_loop(
                Arc::clone(&socket),
                queue_tx,
                self.cancel.clone(),
                self.options.datagram_size,
                identity,
            )
            .instrument(info_span!("multicast_client", group = %self.group_addr)),
        );

        inner.socket = Some(socket);
        inner.local_addr = Some(local_addr);
        inner.loop_handle = Some(handle);
        inner.state = LifecycleState::Running;
        Ok(())
    }

    /// Take the inbound queue receiver. Consumable once: the first call
    /// returns the receiver, every later call returns `None`.
    ///
    /// The sequence yields [`GroupMessage`]s in receive order and ends
    /// once the receive loop exits.
    #[must_use]
    pub fn messages(&self) -> Option<mpsc::Receiver<GroupMessage>> {
        self.lock().queue_rx.take()
    }

    /// Send `payload` as a single datagram to the group address.
    ///
    /// Fire-and-forget: no acknowledgment, no retry, no fragmentation
    /// handling. Payloads exceeding the configured datagram size are the
    /// caller's responsibility.
    ///
    /// # Errors
    ///
    /// - `AppError::NotRunning` if called before `start` or after `stop`.
    /// - `AppError::Multicast` if the send itself fails.
    pub async fn broadcast(&self, payload: &[u8]) -> Result<()> {
        let socket = {
            let inner = self.lock();
            if inner.state != LifecycleState::Running {
                return Err(AppError::NotRunning("multicast client".into()));
            }
            // Running implies the socket exists.
            inner
                .socket
                .clone()
                .ok_or_else(|| AppError::NotRunning("multicast client".into()))?
        };

        socket
            .send_to(payload, self.group_addr)
            .await
            .map_err(|err| AppError::Multicast(format!("failed to broadcast: {err}")))?;
        Ok(())
    }

    /// Signal the receive loop to exit and wait for it to finish.
    ///
    /// The loop drops the queue sender on exit, which closes the inbound
    /// queue; the socket is released afterwards. A no-op when the client
    /// is not running.
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

        let mut inner = self.lock();
        inner.socket = None;
        inner.state = LifecycleState::Stopped;
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    /// Whether the receive loop is currently active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock().state == LifecycleState::Running
    }

    /// The locally bound address, recorded at `start`.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().local_addr
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Core receive loop: blocks on the socket, filters own broadcasts,
    /// and enqueues without ever blocking on the queue.
    async fn receive_loop(
        socket: Arc<UdpSocket>,
        queue: mpsc::Sender<GroupMessage>,
        cancel: CancellationToken,
        datagram_size: usize,
        identity: Option<IpAddr>,
    ) {
        let mut buf = vec![0_u8; datagram_size];

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("multicast client shutting down");
                    break;
                }
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, sender)) => {
                            if identity.is_some_and(|ip| ip == sender.ip()) {
                                debug!(%sender, "dropping own broadcast");
                                continue;
                            }
                            let message = GroupMessage {
                                content: String::from_utf8_lossy(&buf[..len]).into_owned(),
                                sender,
                                received_at: Utc::now(),
                            };
                            match queue.try_send(message) {
                                Ok(()) => {}
                                Err(TrySendError::Full(_)) => {
                                    warn!(%sender, "inbound queue full, dropping message");
                                }
                                Err(TrySendError::Closed(_)) => {
                                    debug!(%sender, "inbound queue consumer gone, dropping message");
                                }
                            }
                        }
                        Err(err) => {
                            if cancel.is_cancelled() {
                                break;
                            }
                            warn!(%err, "multicast read failed");
                        }
                    }
                }
            }
        }
        // Dropping the queue sender here closes the inbound queue.
    }
}

/// Build the group socket: reusable address (and port on Unix) so several
/// same-host processes can share the group port, bound to the wildcard
/// address, joined to `group` on the default interface.
fn join_group_socket(
    group: Ipv4Addr,
    port: u16,
    recv_buffer_size: usize,
) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|err| AppError::Multicast(format!("failed to create socket: {err}")))?;
    socket
        .set_reuse_address(true)
        .map_err(|err| AppError::Multicast(format!("failed to set SO_REUSEADDR: {err}")))?;
    #[cfg(unix)]
    socket
        .set_reuse_port(true)
        .map_err(|err| AppError::Multicast(format!("failed to set SO_REUSEPORT: {err}")))?;

    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket
        .bind(&bind_addr.into())
        .map_err(|err| AppError::Multicast(format!("failed to bind port {port}: {err}")))?;
    socket
        .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
        .map_err(|err| AppError::Multicast(format!("failed to join group {group}: {err}")))?;

    if let Err(err) = socket.set_recv_buffer_size(recv_buffer_size) {
        warn!(%err, "failed to set socket receive buffer size");
    }

    socket
        .set_nonblocking(true)
        .map_err(|err| AppError::Multicast(format!("failed to set nonblocking: {err}")))?;

    Ok(socket.into())
}

/// Resolve the IP this host would send to the group from, by connecting a
/// throwaway UDP socket to the group address and reading its local address.
fn local_identity(group_addr: SocketAddr) -> std::io::Result<IpAddr> {
    let probe = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    probe.connect(group_addr)?;
    Ok(probe.local_addr()?.ip())
}
