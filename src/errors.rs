//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Multicast socket setup or send failure.
    Multicast(String),
    /// Local channel setup or connection failure.
    Channel(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// `start` was called while the component is already running.
    AlreadyRunning(String),
    /// An operation that requires a running component was called while it
    /// is not running.
    NotRunning(String),
    /// `start` was called on a component that has already run and stopped.
    Stopped(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Multicast(msg) => write!(f, "multicast: {msg}"),
            Self::Channel(msg) => write!(f, "channel: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::AlreadyRunning(msg) => write!(f, "already running: {msg}"),
            Self::NotRunning(msg) => write!(f, "not running: {msg}"),
            Self::Stopped(msg) => write!(f, "stopped: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}
