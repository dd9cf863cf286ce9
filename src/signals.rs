/// Signal handling for graceful shutdown.
///
/// SIGINT (Ctrl-C), SIGTERM, and STOP file detection all request the same
/// cooperative stop: the watchdog finishes the cycle in progress, runs the
/// shutdown hook and exits. A second SIGINT while shutting down exits at once.
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};

/// How often the STOP file is checked for.
pub const STOP_FILE_POLL: Duration = Duration::from_secs(1);

/// What asked the service to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    StopFile(PathBuf),
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::Interrupt => f.write_str("SIGINT"),
            ShutdownReason::Terminate => f.write_str("SIGTERM"),
            ShutdownReason::StopFile(path) => write!(f, "stop file {}", path.display()),
        }
    }
}

/// Wait until SIGINT, SIGTERM, or the STOP file appears.
pub async fn wait_for_shutdown(stop_file: &Path) -> std::io::Result<ShutdownReason> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let reason = tokio::select! {
        _ = sigint.recv() => ShutdownReason::Interrupt,
        _ = sigterm.recv() => ShutdownReason::Terminate,
        path = wait_for_stop_file(stop_file, STOP_FILE_POLL) => ShutdownReason::StopFile(path),
    };
    Ok(reason)
}

/// Resolve once `path` exists. The file is consumed.
pub async fn wait_for_stop_file(path: &Path, poll: Duration) -> PathBuf {
    loop {
        if consume_stop_file(path) {
            return path.to_path_buf();
        }
        tokio::time::sleep(poll).await;
    }
}

/// Returns true if the STOP file exists, removing it so the next start is
/// not stopped immediately.
pub fn consume_stop_file(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(error = %e, path = %path.display(), "failed to remove stop file");
    }
    true
}
