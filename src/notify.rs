//! External notification command execution.
//!
//! Runs a user-configured program (a desktop notifier, a script) once per
//! received group message, substituting the message text into the
//! configured arguments.

use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::{AppError, Result};

/// Placeholder in notify arguments replaced with the message text.
const MESSAGE_PLACEHOLDER: &str = "{message}";

/// An external command run once per received group message.
#[derive(Debug, Clone)]
pub struct NotifyCommand {
    program: String,
    args: Vec<String>,
}

impl NotifyCommand {
    /// A command with its argument template.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Run the command for `message` and wait for it to exit.
    ///
    /// Each `{message}` occurrence in the arguments is replaced with the
    /// message text; when no argument contains the placeholder, the text
    /// is appended as the final argument.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the command cannot be spawned or exits
    /// with a non-zero status.
    pub async fn run(&self, message: &str) -> Result<()> {
        let args = substitute_args(&self.args, message);
        debug!(program = %self.program, "running notify command");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| AppError::Io(format!("failed to run {}: {err}", self.program)))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            Err(AppError::Io(format!(
                "{} exited with {}",
                self.program, output.status
            )))
        } else {
            Err(AppError::Io(format!(
                "{} exited with {}: {stderr}",
                self.program, output.status
            )))
        }
    }
}

/// Expand the message placeholder; append the message when no argument
/// carries one.
fn substitute_args(args: &[String], message: &str) -> Vec<String> {
    let mut substituted = false;
    let mut out: Vec<String> = args
        .iter()
        .map(|arg| {
            if arg.contains(MESSAGE_PLACEHOLDER) {
                substituted = true;
                arg.replace(MESSAGE_PLACEHOLDER, message)
            } else {
                arg.clone()
            }
        })
        .collect();
    if !substituted {
        out.push(message.to_owned());
    }
    out
}
