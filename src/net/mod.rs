//! Dual-transport messaging layer.
//!
//! Two peer components with the same lifecycle shape, composed by the daemon:
//! - [`multicast::MulticastClient`]: joins a UDP multicast group, receives
//!   datagrams into a bounded queue, and broadcasts to the group.
//! - [`channel::LocalChannelListener`]: accepts local socket connections,
//!   reads one message per connection, and writes back a single reply.
//!
//! Neither component depends on the other. Each exposes received messages
//! through a bounded `mpsc` queue consumed by the owner; neither ever runs
//! owner code on its network task.

pub mod channel;
pub mod multicast;

/// Default inbound queue capacity (messages) for both transports.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Lifecycle phase of a transport component.
///
/// Transitions are owner-driven: `Created → Running` via `start`,
/// `Running → Stopping → Stopped` via `stop`. A stopped component is not
/// restartable; its inbound queue closes exactly once.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LifecycleState {
    /// Constructed; no socket opened yet.
    Created,
    /// Receive/accept loop is active.
    Running,
    /// Stop requested; loop winding down.
    Stopping,
    /// Loop exited and resources released. Terminal.
    Stopped,
}

/// Derive the OS-appropriate local channel path for an application name:
/// a Unix domain socket under `/tmp` on POSIX, a named pipe elsewhere.
#[must_use]
pub fn default_channel_path(app_name: &str) -> std::path::PathBuf {
    #[cfg(unix)]
    {
        std::path::PathBuf::from(format!("/tmp/{app_name}.sock"))
    }
    #[cfg(not(unix))]
    {
        std::path::PathBuf::from(format!(r"\\.\pipe\{app_name}"))
    }
}
