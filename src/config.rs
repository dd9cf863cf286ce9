use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from watchkeeper.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct WatchkeeperConfig {
    #[serde(rename = "WorkerService")]
    pub worker: WorkerServiceConfig,
    pub license: LicenseConfig,
    pub shutdown: ShutdownConfig,
    pub status: StatusConfig,
}

/// The `[WorkerService]` section. Keys are PascalCase by convention
/// (`Process`, `Executable`, `Path`, `LoopTime`, `CallTimeoutMs`).
#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct WorkerServiceConfig {
    pub process: String,
    pub executable: String,
    pub path: Option<PathBuf>,
    /// Poll interval in milliseconds. Signed so a negative value can be
    /// reported as a configuration error instead of a parse error.
    pub loop_time: i64,
    pub call_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LicenseConfig {
    pub release_command: String,
    pub release_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub stop_file: PathBuf,
    pub kill_on_stop: bool,
    pub kill_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub enabled: bool,
    pub file: PathBuf,
}

// --- Default implementations ---

// An absent `LoopTime` keeps the historical fixed one-second poll.
impl Default for WorkerServiceConfig {
    fn default() -> Self {
        Self {
            process: String::new(),
            executable: String::new(),
            path: None,
            loop_time: 1000,
            call_timeout_ms: 10_000,
        }
    }
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            release_command: String::new(),
            release_timeout_secs: 30,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            stop_file: PathBuf::from("STOP"),
            kill_on_stop: true,
            kill_timeout_secs: 5,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: PathBuf::from("watchkeeper.status"),
        }
    }
}

/// Values given on the command line that take precedence over the file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub process: Option<String>,
    pub executable: Option<String>,
    pub interval_ms: Option<i64>,
}

/// Validated, read-only settings for one watchdog instance.
///
/// Built once at startup; per-cycle data lives in `watchdog::RuntimeState`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSettings {
    pub process_name: String,
    pub executable: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub interval: Duration,
    pub call_timeout: Duration,
    pub hook_timeout: Duration,
    pub kill_on_stop: bool,
    pub kill_timeout: Duration,
}

impl WatchkeeperConfig {
    /// Load config from `path`. A missing file yields the defaults so that a
    /// fully CLI-driven invocation still works; validation happens later.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents, path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Parse config text. `origin` is only used in error messages.
    pub fn from_toml(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(process) = &overrides.process {
            self.worker.process = process.clone();
        }
        if let Some(executable) = &overrides.executable {
            self.worker.executable = executable.clone();
        }
        if let Some(interval_ms) = overrides.interval_ms {
            self.worker.loop_time = interval_ms;
        }
    }

    /// Validate the bound values and produce the settings the loop runs on.
    pub fn settings(&self) -> Result<WatchSettings, ConfigError> {
        let worker = &self.worker;

        let process_name = worker.process.trim();
        if process_name.is_empty() {
            return Err(ConfigError::Missing("WorkerService.Process"));
        }
        let executable = worker.executable.trim();
        if executable.is_empty() {
            return Err(ConfigError::Missing("WorkerService.Executable"));
        }

        let interval_ms = u64::try_from(worker.loop_time).map_err(|_| ConfigError::Invalid {
            key: "WorkerService.LoopTime",
            reason: format!("must be >= 0, got {}", worker.loop_time),
        })?;

        if worker.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "WorkerService.CallTimeoutMs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.license.release_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "license.release_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.shutdown.kill_on_stop && self.shutdown.kill_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "shutdown.kill_timeout_secs",
                reason: "must be greater than zero when kill_on_stop is set".to_string(),
            });
        }

        let working_dir = worker
            .path
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
            .cloned();

        Ok(WatchSettings {
            process_name: process_name.to_string(),
            executable: PathBuf::from(executable),
            working_dir,
            interval: Duration::from_millis(interval_ms),
            call_timeout: Duration::from_millis(worker.call_timeout_ms),
            hook_timeout: Duration::from_secs(self.license.release_timeout_secs),
            kill_on_stop: self.shutdown.kill_on_stop,
            kill_timeout: Duration::from_secs(self.shutdown.kill_timeout_secs),
        })
    }
}
