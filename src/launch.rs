/// Relaunching the target executable.
///
/// The child is started in its own process group so terminal signals aimed
/// at the watchdog do not reach it, and it is never waited on by the caller.
/// The dropped `Child` is reaped by the tokio runtime, so `start` must be
/// called from within one (the poll loop calls it on the blocking pool).
use crate::error::LaunchError;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Starts a new OS process from an executable path.
pub trait ProcessLauncher: Send + Sync {
    /// Spawn `executable` and return its pid without waiting for it.
    fn start(&self, executable: &Path, working_dir: Option<&Path>) -> Result<u32, LaunchError>;
}

/// Spawns real processes with `tokio::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn start(&self, executable: &Path, working_dir: Option<&Path>) -> Result<u32, LaunchError> {
        let mut command = Command::new(executable);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);

        if let Some(dir) = working_dir {
            if !dir.is_dir() {
                return Err(LaunchError::Spawn {
                    path: executable.to_path_buf(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("working directory {} does not exist", dir.display()),
                    ),
                });
            }
            command.current_dir(dir);
        }

        let child = command
            .spawn()
            .map_err(|source| classify_spawn_error(executable, source))?;
        let pid = child.id().ok_or_else(|| LaunchError::Spawn {
            path: executable.to_path_buf(),
            source: std::io::Error::other("process exited before its pid was read"),
        })?;
        tracing::debug!(pid, executable = %executable.display(), "spawned process");

        // Not kill_on_drop: the runtime reaps it in the background once it exits.
        drop(child);
        Ok(pid)
    }
}

fn classify_spawn_error(executable: &Path, source: std::io::Error) -> LaunchError {
    let path = executable.to_path_buf();
    match source.kind() {
        std::io::ErrorKind::NotFound => LaunchError::NotFound { path },
        std::io::ErrorKind::PermissionDenied => LaunchError::PermissionDenied { path },
        _ => LaunchError::Spawn { path, source },
    }
}
