// External command execution with a bounded timeout

//! External command execution
//!
//! Every call to `service`, `systemctl`, `whereis` or `apt` goes through a
//! [`CommandRunner`]. The system implementation kills the child once the
//! configured timeout expires, so a hung service manager cannot block the
//! whole activation sequence.

use crate::error::{Error, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Validates that a name (interface or driver) is safe to pass to external commands
/// and to write into daemon configuration files.
/// Only allows alphanumeric characters, hyphens, and underscores.
pub fn validate_name(name: &str, field_name: &'static str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidSettings {
            field: field_name,
            reason: "cannot be empty".to_string(),
        });
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::InvalidSettings {
            field: field_name,
            reason: format!(
                "contains invalid characters: '{}'. Only alphanumeric, hyphens, and underscores are allowed",
                name
            ),
        });
    }

    Ok(())
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&self.stderr);
        }
        text
    }

    /// Human readable exit description for error messages
    pub fn status_text(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {}", code),
            None => "termination by signal".to_string(),
        }
    }

    /// Turn a non-zero exit into [`Error::DaemonCommandFailure`]
    pub fn into_checked(self, command: String) -> Result<CommandOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::DaemonCommandFailure {
                command,
                status: self.status_text(),
                output: self.combined().trim().to_string(),
            })
        }
    }
}

/// Render a program and its arguments for logs and errors
pub fn render_command(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Executes external programs
///
/// Returns the captured output for any exit status. Errors are reserved for
/// spawn failures and timeouts, so callers decide what a non-zero exit means.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run `program args...` to completion
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

/// Runs real processes via tokio
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    /// Create a runner that kills commands running longer than `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let rendered = render_command(program, args);
        log::debug!("Executing `{}`", rendered);

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            // Keep terminal signals away from apt and the service manager
            .process_group(0)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(result) => result.map_err(|source| Error::CommandSpawn {
                command: rendered.clone(),
                source,
            })?,
            Err(_) => {
                log::warn!("`{}` did not finish within {:?}", rendered, self.timeout);
                return Err(Error::DaemonCommandTimeout {
                    command: rendered,
                    timeout: self.timeout,
                });
            }
        };

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
