#![forbid(unsafe_code)]

//! `relaycast-ctl` — local CLI companion for `relaycast`.
//!
//! Connects to the daemon's local channel and submits a message for
//! broadcast to the multicast group.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericFilePath, Stream, ToFsName};

#[derive(Debug, Parser)]
#[command(
    name = "relaycast-ctl",
    about = "Local CLI for the relaycast daemon",
    version,
    long_about = None
)]
struct Cli {
    /// Application name the daemon runs under (derives the channel path).
    #[arg(long, default_value = "relaycast")]
    app_name: String,

    /// Explicit channel path (overrides the derived one).
    #[arg(long)]
    socket_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Resolve the effective channel path.
    ///
    /// If `--socket-path` was explicitly provided, use it as-is. Otherwise
    /// derive from `--app-name` the same way the daemon does; the logic is
    /// duplicated locally because the ctl binary does not depend on the
    /// library crate.
    fn effective_path(&self) -> PathBuf {
        if let Some(ref path) = self.socket_path {
            path.clone()
        } else if cfg!(unix) {
            PathBuf::from(format!("/tmp/{}.sock", self.app_name))
        } else {
            PathBuf::from(format!(r"\\.\pipe\{}", self.app_name))
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a message to the daemon for broadcast to the group.
    Send {
        /// Message text to broadcast.
        message: String,
    },
}

fn main() {
    let args = Cli::parse();
    let path = args.effective_path();

    let Command::Send { ref message } = args.command;

    match send_channel_message(&path, message) {
        Ok(response) => {
            let response = response.trim();
            println!("{response}");
            if response.starts_with("ERROR:") {
                std::process::exit(1);
            }
        }
        Err(err) => {
            eprintln!("Failed to connect to daemon: {err}");
            eprintln!(
                "Is relaycast running with channel path '{}'?",
                path.display()
            );
            std::process::exit(1);
        }
    }
}

/// Connect to the channel, write the message, and read the response.
///
/// The daemon replies once and closes the connection, so the read runs
/// until end-of-stream.
fn send_channel_message(
    path: &Path,
    message: &str,
) -> std::result::Result<String, Box<dyn std::error::Error>> {
    let name = path.to_fs_name::<GenericFilePath>()?;
    let mut stream = Stream::connect(name)?;

    stream.write_all(message.as_bytes())?;
    stream.flush()?;

    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    Ok(response)
}
