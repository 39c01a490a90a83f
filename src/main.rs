#![forbid(unsafe_code)]

//! `relaycast` — dual-transport LAN notifier daemon.
//!
//! Bridges a local IPC channel onto a UDP multicast group: messages
//! submitted through `relaycast-ctl` (or any local client) are broadcast
//! to the group, and messages received from the group are logged and
//! optionally handed to a notify command.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use relaycast::net::channel::{ChannelMessage, LocalChannelListener};
use relaycast::net::multicast::{GroupMessage, MulticastClient};
use relaycast::notify::NotifyCommand;
use relaycast::{AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "relaycast", about = "Dual-transport LAN notifier", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the multicast UDP port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the IPv4 multicast group address.
    #[arg(long)]
    group: Option<Ipv4Addr>,

    /// Override the application name (derives the channel path).
    #[arg(long)]
    app_name: Option<String>,

    /// Override the local channel path.
    #[arg(long)]
    socket_path: Option<PathBuf>,

    /// Deliver this host's own broadcasts instead of dropping them.
    #[arg(long)]
    no_filter_self: bool,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("relaycast bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    apply_cli_overrides(&mut config, &args);
    config.validate()?;
    info!(port = config.port, group = %config.group, "configuration loaded");

    // ── Start transports ────────────────────────────────
    let multicast = MulticastClient::new(config.multicast_options())?;
    let listener = LocalChannelListener::new(config.channel_options())?;

    multicast.start()?;
    if let Err(err) = listener.start() {
        multicast.stop().await;
        return Err(err);
    }

    let mut group_rx = multicast
        .messages()
        .ok_or_else(|| AppError::Multicast("inbound queue already consumed".into()))?;
    let mut channel_rx = listener
        .messages()
        .ok_or_else(|| AppError::Channel("inbound queue already consumed".into()))?;

    let notifier = config.notifier().map(Arc::new);
    info!(path = %listener.bind_path().display(), "relaycast ready");

    // ── Pump both queues until shutdown ─────────────────
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            message = channel_rx.recv() => {
                match message {
                    Some(message) => handle_channel_message(&multicast, message).await,
                    None => {
                        warn!("local channel queue closed");
                        break;
                    }
                }
            }
            message = group_rx.recv() => {
                match message {
                    Some(message) => handle_group_message(notifier.as_ref(), &message),
                    None => {
                        warn!("multicast queue closed");
                        break;
                    }
                }
            }
        }
    }

    // ── Graceful shutdown ───────────────────────────────
    listener.stop().await;
    multicast.stop().await;
    info!("relaycast shut down");

    Ok(())
}

fn apply_cli_overrides(config: &mut GlobalConfig, args: &Cli) {
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(group) = args.group {
        config.group = group;
    }
    if let Some(ref app_name) = args.app_name {
        config.app_name = app_name.clone();
    }
    if let Some(ref path) = args.socket_path {
        config.channel_path = Some(path.clone());
    }
    if args.no_filter_self {
        config.filter_self = false;
    }
}

/// Broadcast a locally submitted message and answer the waiting client.
async fn handle_channel_message(multicast: &MulticastClient, message: ChannelMessage) {
    info!(content = %message.content, "channel message received");

    match multicast.broadcast(message.content.as_bytes()).await {
        Ok(()) => message.reply.reply("OK"),
        Err(err) => {
            error!(%err, "broadcast failed");
            message.reply.reply(format!("ERROR: {err}"));
        }
    }
}

/// Log a group message and hand it to the notify command when configured.
fn handle_group_message(notifier: Option<&Arc<NotifyCommand>>, message: &GroupMessage) {
    info!(sender = %message.sender, content = %message.content, "group message received");

    if let Some(notifier) = notifier {
        let notifier = Arc::clone(notifier);
        let content = message.content.clone();
        tokio::spawn(async move {
            if let Err(err) = notifier.run(&content).await {
                warn!(%err, "notify command failed");
            }
        });
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
