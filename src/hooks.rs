/// Shutdown hook: the license teardown that runs once while the watchdog stops.
///
/// The watchdog bounds every hook with `release_timeout_secs` and logs any
/// failure; a hook can never keep the service from reaching `Stopped`.
use crate::config::LicenseConfig;
use crate::error::ShutdownHookError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

#[async_trait]
pub trait ShutdownHook: Send + Sync {
    /// Short label for log lines.
    fn describe(&self) -> String;

    async fn run(&self) -> Result<(), ShutdownHookError>;
}

/// Used when no release command is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

#[async_trait]
impl ShutdownHook for NoopHook {
    fn describe(&self) -> String {
        "none".to_string()
    }

    async fn run(&self) -> Result<(), ShutdownHookError> {
        tracing::debug!("no license release command configured");
        Ok(())
    }
}

/// Runs a shell command (`sh -c`) and waits for it to exit successfully.
#[derive(Debug, Clone)]
pub struct CommandHook {
    command: String,
}

impl CommandHook {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl ShutdownHook for CommandHook {
    fn describe(&self) -> String {
        self.command.clone()
    }

    async fn run(&self) -> Result<(), ShutdownHookError> {
        tracing::info!(command = %self.command, "running license release command");

        // kill_on_drop: a timed-out hook must not outlive the watchdog.
        let status = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| ShutdownHookError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(ShutdownHookError::Failed {
                command: self.command.clone(),
                status: status.to_string(),
            })
        }
    }
}

/// Pick the hook for the `[license]` section.
pub fn from_config(config: &LicenseConfig) -> Box<dyn ShutdownHook> {
    let command = config.release_command.trim();
    if command.is_empty() {
        Box::new(NoopHook)
    } else {
        Box::new(CommandHook::new(command))
    }
}
