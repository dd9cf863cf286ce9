/// Error kinds for the watchdog.
///
/// Only `ConfigError` is fatal. Everything else is raised inside the poll
/// loop or the shutdown sequence, logged there, and never escapes it.
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Startup-only failure: the service never enters the poll loop.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("required setting '{0}' is missing or empty")]
    Missing(&'static str),

    #[error("invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// The OS process-table query failed.
#[derive(Debug, Error)]
pub enum InspectionError {
    #[error("process inspection is not supported on this platform")]
    Unsupported,

    #[error("process inspection for '{name}' did not finish within {limit:?}")]
    TimedOut { name: String, limit: Duration },

    #[error("process inspection for '{name}' panicked: {message}")]
    Panicked { name: String, message: String },
}

/// Spawning the target executable failed.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("executable not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("permission denied launching {}", .path.display())]
    PermissionDenied { path: PathBuf },

    #[error("failed to launch {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("launch of {} did not finish within {limit:?}", .path.display())]
    TimedOut { path: PathBuf, limit: Duration },

    #[error("launch of {} panicked: {message}", .path.display())]
    Panicked { path: PathBuf, message: String },
}

/// The shutdown hook (license release) failed. Never blocks shutdown.
#[derive(Debug, Error)]
pub enum ShutdownHookError {
    #[error("failed to run shutdown hook '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("shutdown hook '{command}' exited with {status}")]
    Failed { command: String, status: String },

    #[error("shutdown hook did not finish within {0:?}")]
    TimedOut(Duration),
}

/// Force-stopping the managed process during shutdown failed.
#[derive(Debug, Error)]
pub enum KillError {
    #[error("failed to signal pid {pid}: {source}")]
    Signal { pid: u32, source: nix::errno::Errno },

    #[error(transparent)]
    Inspection(#[from] InspectionError),

    #[error("force stop of '{name}' did not finish within {limit:?}")]
    TimedOut { name: String, limit: Duration },

    #[error("force stop of '{name}' panicked: {message}")]
    Panicked { name: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Missing("WorkerService.Process");
        assert_eq!(
            err.to_string(),
            "required setting 'WorkerService.Process' is missing or empty"
        );

        let err = ConfigError::Invalid {
            key: "WorkerService.LoopTime",
            reason: "must be >= 0, got -5".to_string(),
        };
        assert!(err.to_string().contains("LoopTime"));
        assert!(err.to_string().contains("-5"));
    }

    #[test]
    fn test_launch_error_display_includes_path() {
        let err = LaunchError::NotFound {
            path: PathBuf::from("/bin/app"),
        };
        assert_eq!(err.to_string(), "executable not found: /bin/app");
    }

    #[test]
    fn test_kill_error_wraps_inspection_error() {
        let err: KillError = InspectionError::Unsupported.into();
        assert!(matches!(err, KillError::Inspection(_)));
        assert!(err.to_string().contains("not supported"));
    }
}
