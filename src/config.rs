//! Global configuration parsing and validation.

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::net::channel::{ChannelOptions, DEFAULT_APP_NAME, DEFAULT_READ_BUFFER_SIZE};
use crate::net::multicast::{MulticastOptions, DEFAULT_DATAGRAM_SIZE, DEFAULT_MULTICAST_GROUP};
use crate::net::DEFAULT_QUEUE_CAPACITY;
use crate::notify::NotifyCommand;
use crate::{AppError, Result};

/// Default UDP port for the multicast group.
pub const DEFAULT_PORT: u16 = 9999;

/// Global configuration parsed from `config.toml`.
///
/// Every field has a default, so an empty file (or no file at all) yields
/// a working configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// UDP port the multicast group communicates on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// IPv4 multicast group address to join.
    #[serde(default = "default_group")]
    pub group: Ipv4Addr,
    /// Application name; derives the channel path when none is set.
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Explicit local channel path (Unix socket path or pipe name).
    #[serde(default)]
    pub channel_path: Option<PathBuf>,
    /// Maximum multicast datagram size in bytes.
    #[serde(default = "default_datagram_size")]
    pub datagram_size: usize,
    /// Inbound queue capacity, shared by both transports.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Drop multicast datagrams that originated from this host.
    #[serde(default = "default_true")]
    pub filter_self: bool,
    /// Program to run for each received group message.
    #[serde(default)]
    pub notify_command: Option<String>,
    /// Arguments for `notify_command`; `{message}` expands to the
    /// message text.
    #[serde(default)]
    pub notify_args: Vec<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_group() -> Ipv4Addr {
    DEFAULT_MULTICAST_GROUP
}

fn default_app_name() -> String {
    DEFAULT_APP_NAME.into()
}

fn default_datagram_size() -> usize {
    DEFAULT_DATAGRAM_SIZE
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_true() -> bool {
    true
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            group: default_group(),
            app_name: default_app_name(),
            channel_path: None,
            datagram_size: default_datagram_size(),
            queue_capacity: default_queue_capacity(),
            filter_self: true,
            notify_command: None,
            notify_args: Vec::new(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration, including values overridden after load.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` on a non-multicast group address, a zero
    /// port, size, or capacity, or an empty `app_name` with no explicit
    /// channel path.
    pub fn validate(&self) -> Result<()> {
        self.multicast_options().validate()?;
        self.channel_options().validate()?;
        Ok(())
    }

    /// Multicast client options derived from this configuration.
    #[must_use]
    pub fn multicast_options(&self) -> MulticastOptions {
        MulticastOptions {
            group: self.group,
            port: self.port,
            datagram_size: self.datagram_size,
            queue_capacity: self.queue_capacity,
            filter_self: self.filter_self,
        }
    }

    /// Local channel options derived from this configuration.
    #[must_use]
    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            path: self.channel_path.clone(),
            app_name: self.app_name.clone(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            queue_capacity: self.queue_capacity,
        }
    }

    /// The notify command to run per received group message, when one is
    /// configured.
    #[must_use]
    pub fn notifier(&self) -> Option<NotifyCommand> {
        self.notify_command
            .as_ref()
            .map(|program| NotifyCommand::new(program, self.notify_args.clone()))
    }
}
