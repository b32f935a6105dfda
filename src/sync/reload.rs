//! Proxy reload trigger.

use std::future::Future;
use tokio::process::Command;

use crate::config::ReloadConfig;

/// Tells the running proxy to pick up the configuration on disk.
pub trait Reloader: Send + Sync {
    /// Returns a description of the failure when the proxy did not reload.
    fn reload(&self) -> impl Future<Output = Result<(), String>> + Send;
}

/// Runs an external command; exit status zero means reloaded.
#[derive(Debug, Clone)]
pub struct CommandReloader {
    program: String,
    args: Vec<String>,
}

impl CommandReloader {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from `reload.command`; the first element is the program.
    pub fn from_config(config: &ReloadConfig) -> Self {
        let mut parts = config.command.iter().cloned();
        let program = parts.next().unwrap_or_default();
        Self::new(program, parts.collect())
    }

    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Reloader for CommandReloader {
    async fn reload(&self) -> Result<(), String> {
        let command = self.describe();
        tracing::debug!(command = %command, "Running reload command");

        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("could not run `{}`: {}", command, e))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            Err(format!("`{}` exited with {}", command, output.status))
        } else {
            Err(format!("`{}` exited with {}: {}", command, output.status, stderr))
        }
    }
}
