/// Status file: writes `watchkeeper.status` as JSON on every phase transition
/// and after every poll cycle.
///
/// Uses atomic write pattern: write to temp file then rename.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Lifecycle phases of a watchdog instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogState {
    Starting,
    Polling,
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for WatchdogState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            WatchdogState::Starting => "starting",
            WatchdogState::Polling => "polling",
            WatchdogState::ShuttingDown => "shutting_down",
            WatchdogState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// The JSON payload written to the status file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusData {
    pub pid: u32,
    pub state: WatchdogState,
    pub process: String,
    pub executable: String,
    pub interval_ms: u64,
    /// Result of the most recent successful inspection.
    pub is_running: Option<bool>,
    pub cycles: u64,
    pub launches: u64,
    pub failures: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub last_launch: Option<DateTime<Utc>>,
    pub last_update: DateTime<Utc>,
}

/// Manages the status file lifecycle.
#[derive(Debug, Clone)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    /// Create a new StatusFile writer for the given path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Atomically write status data to the status file.
    ///
    /// Writes to a temporary file in the same directory, then renames
    /// so readers never see a partial write.
    pub fn write(&self, data: &StatusData) -> Result<(), StatusError> {
        let json = serde_json::to_string_pretty(data)?;

        let tmp_path = self.tmp_path();
        std::fs::write(&tmp_path, json.as_bytes()).map_err(|source| StatusError::Write {
            path: tmp_path.clone(),
            source,
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|source| StatusError::Rename {
            from: tmp_path,
            to: self.path.clone(),
            source,
        })?;

        Ok(())
    }

    /// Read back the last written status.
    pub fn read(&self) -> Result<StatusData, StatusError> {
        let contents = std::fs::read_to_string(&self.path).map_err(|source| StatusError::Read {
            path: self.path.clone(),
            source,
        })?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Remove the status file (on clean shutdown).
    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }

    /// Path to the status file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "watchkeeper.status".to_string());
        dir.join(format!(".{name}.tmp.{}", std::process::id()))
    }
}

/// Errors from status file operations.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("failed to (de)serialize status: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write temp status file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to rename {} -> {}: {source}", .from.display(), .to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read status file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(state: WatchdogState) -> StatusData {
        StatusData {
            pid: 12345,
            state,
            process: "app".to_string(),
            executable: "/bin/app".to_string(),
            interval_ms: 1000,
            is_running: None,
            cycles: 0,
            launches: 0,
            failures: 0,
            last_check: None,
            last_launch: None,
            last_update: Utc::now(),
        }
    }

    #[test]
    fn test_status_file_atomic_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("watchkeeper.status");
        let sf = StatusFile::new(path.clone());

        let mut data = sample(WatchdogState::Polling);
        data.is_running = Some(false);
        data.cycles = 7;
        data.launches = 2;
        data.last_check = Some(Utc::now());

        sf.write(&data).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["pid"], 12345);
        assert_eq!(parsed["state"], "polling");
        assert_eq!(parsed["process"], "app");
        assert_eq!(parsed["executable"], "/bin/app");
        assert_eq!(parsed["interval_ms"], 1000);
        assert_eq!(parsed["is_running"], false);
        assert_eq!(parsed["cycles"], 7);
        assert_eq!(parsed["launches"], 2);
        assert!(parsed["last_check"].is_string());
        assert!(parsed["last_launch"].is_null());

        let tmp_path = dir
            .path()
            .join(format!(".watchkeeper.status.tmp.{}", std::process::id()));
        assert!(
            !tmp_path.exists(),
            "temp file should be cleaned up by rename"
        );
    }

    #[test]
    fn test_status_file_overwrite_and_read_back() {
        let dir = tempdir().unwrap();
        let sf = StatusFile::new(dir.path().join("watchkeeper.status"));

        let mut data = sample(WatchdogState::Starting);
        sf.write(&data).unwrap();

        data.state = WatchdogState::ShuttingDown;
        data.cycles = 3;
        sf.write(&data).unwrap();

        let read = sf.read().unwrap();
        assert_eq!(read.state, WatchdogState::ShuttingDown);
        assert_eq!(read.cycles, 3);
        assert_eq!(read, data);
    }

    #[test]
    fn test_status_file_remove() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("watchkeeper.status");
        let sf = StatusFile::new(path.clone());

        sf.write(&sample(WatchdogState::Starting)).unwrap();
        assert!(path.exists());

        sf.remove();
        assert!(!path.exists());
    }

    #[test]
    fn test_all_states_serialize() {
        let states = vec![
            (WatchdogState::Starting, "starting"),
            (WatchdogState::Polling, "polling"),
            (WatchdogState::ShuttingDown, "shutting_down"),
            (WatchdogState::Stopped, "stopped"),
        ];

        for (state, expected_str) in states {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", expected_str));
            assert_eq!(state.to_string(), expected_str);
        }
    }

    #[test]
    fn test_status_file_write_to_nonexistent_dir_fails() {
        let sf = StatusFile::new(PathBuf::from("/nonexistent/dir/watchkeeper.status"));
        let result = sf.write(&sample(WatchdogState::Starting));
        assert!(matches!(result, Err(StatusError::Write { .. })));
    }

    #[test]
    fn test_read_missing_status_file_fails() {
        let dir = tempdir().unwrap();
        let sf = StatusFile::new(dir.path().join("absent.status"));
        assert!(matches!(sf.read(), Err(StatusError::Read { .. })));
    }

    #[test]
    fn test_status_error_display() {
        let err = StatusError::Write {
            path: PathBuf::from("/tmp/test"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no perms"),
        };
        let msg = err.to_string();
        assert!(msg.contains("failed to write temp status file"));
        assert!(msg.contains("no perms"));
    }
}
