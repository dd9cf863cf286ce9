/// The poll loop: wait for the interval, check whether the target process
/// exists, relaunch it if not, repeat until asked to stop.
///
/// Cancellation is cooperative. It interrupts the interval wait immediately
/// and is otherwise honored at cycle boundaries; a cycle that already started
/// runs to completion. Inspection, launch and force-stop calls run on the
/// blocking pool under a timeout so a hung OS call costs one cycle, not the
/// whole watchdog (the stuck thread itself is abandoned).
use crate::config::WatchSettings;
use crate::error::{InspectionError, KillError, LaunchError, ShutdownHookError};
use crate::hooks::ShutdownHook;
use crate::inspect::{ProcessInspector, ProcessTerminator};
use crate::launch::ProcessLauncher;
use crate::status::{StatusData, StatusFile, WatchdogState};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

/// Mutable per-cycle data, kept apart from the read-only `WatchSettings`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeState {
    /// Last observed running state; `None` until an inspection succeeds.
    pub is_running: Option<bool>,
    pub cycles: u64,
    pub launches: u64,
    pub failures: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub last_launch: Option<DateTime<Utc>>,
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The process was found; nothing launched.
    Running,
    /// The process was missing and a new one was started.
    Launched { pid: u32 },
    InspectionFailed,
    LaunchFailed,
}

/// Result of the force-stop step of the shutdown sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillOutcome {
    Disabled,
    Killed(usize),
    Failed(String),
}

/// Summary handed to shutdown listeners and returned from `WatchdogHandle::stop`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub cycles: u64,
    pub launches: u64,
    pub failures: u64,
    /// `None` when the shutdown hook succeeded.
    pub hook_error: Option<String>,
    pub kill: KillOutcome,
}

/// Called exactly once, after the shutdown hook and force stop have finished.
pub type ShutdownListener = Box<dyn FnOnce(&ShutdownReport) + Send>;

enum BlockingFailure {
    TimedOut,
    Panicked(String),
}

/// Run a synchronous OS call on the blocking pool, giving up after `limit`.
async fn run_bounded<T, F>(limit: Duration, f: F) -> Result<T, BlockingFailure>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join_error)) => Err(BlockingFailure::Panicked(join_error.to_string())),
        Err(_) => Err(BlockingFailure::TimedOut),
    }
}

/// True once stop was requested or the controlling handle was dropped.
fn stop_requested(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow() || cancel.has_changed().is_err()
}

/// One watchdog instance: owns its settings, runtime state and collaborators.
pub struct Watchdog {
    settings: WatchSettings,
    runtime: RuntimeState,
    state: WatchdogState,
    inspector: Arc<dyn ProcessInspector>,
    launcher: Arc<dyn ProcessLauncher>,
    terminator: Option<Arc<dyn ProcessTerminator>>,
    hook: Box<dyn ShutdownHook>,
    listeners: Vec<ShutdownListener>,
    status: Option<StatusFile>,
}

impl Watchdog {
    pub fn new(
        settings: WatchSettings,
        inspector: Arc<dyn ProcessInspector>,
        launcher: Arc<dyn ProcessLauncher>,
        hook: Box<dyn ShutdownHook>,
    ) -> Self {
        Self {
            settings,
            runtime: RuntimeState::default(),
            state: WatchdogState::Starting,
            inspector,
            launcher,
            terminator: None,
            hook,
            listeners: Vec::new(),
            status: None,
        }
    }

    /// Used by the shutdown sequence when `kill_on_stop` is set.
    pub fn with_terminator(mut self, terminator: Arc<dyn ProcessTerminator>) -> Self {
        self.terminator = Some(terminator);
        self
    }

    /// Mirror state into `file`, starting with the current phase.
    pub fn with_status_file(mut self, file: StatusFile) -> Self {
        self.status = Some(file);
        self.write_status();
        self
    }

    /// Register a listener for the shutdown notification.
    pub fn on_shutdown(mut self, listener: impl FnOnce(&ShutdownReport) + Send + 'static) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    pub fn settings(&self) -> &WatchSettings {
        &self.settings
    }

    #[cfg(test)]
    pub fn runtime(&self) -> &RuntimeState {
        &self.runtime
    }

    pub fn state(&self) -> WatchdogState {
        self.state
    }

    /// Spawn the loop on the current runtime and return its handle.
    pub fn start(self) -> WatchdogHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(cancel_rx));
        WatchdogHandle {
            cancel: cancel_tx,
            task,
        }
    }

    /// Poll until `cancel` turns true (or its sender is dropped), then run
    /// the shutdown sequence.
    pub async fn run(mut self, mut cancel: watch::Receiver<bool>) -> ShutdownReport {
        self.transition(WatchdogState::Polling);
        tracing::info!(
            process = %self.settings.process_name,
            executable = %self.settings.executable.display(),
            interval_ms = self.settings.interval.as_millis() as u64,
            "watchdog started"
        );

        loop {
            if stop_requested(&cancel) {
                break;
            }

            tracing::debug!(
                cycle = self.runtime.cycles + 1,
                "waiting for next poll cycle"
            );
            tokio::select! {
                biased;
                _ = cancel.changed() => break,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }

            self.run_cycle().await;
        }

        self.shut_down().await
    }

    /// One poll cycle: inspect, relaunch if missing. Never fails; errors are
    /// logged and counted so the next cycle still runs.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.runtime.cycles += 1;
        let cycle = self.runtime.cycles;
        let process = self.settings.process_name.clone();

        let outcome = match self.check().await {
            Ok(true) => {
                tracing::info!(cycle, process = %process, "process is running");
                CycleOutcome::Running
            }
            Ok(false) => {
                tracing::info!(cycle, process = %process, "process is not running, launching");
                match self.launch().await {
                    Ok(pid) => {
                        tracing::info!(cycle, pid, process = %process, "process launched");
                        CycleOutcome::Launched { pid }
                    }
                    Err(e) => {
                        self.runtime.failures += 1;
                        tracing::error!(cycle, error = %e, "launch failed");
                        CycleOutcome::LaunchFailed
                    }
                }
            }
            Err(e) => {
                self.runtime.failures += 1;
                tracing::error!(cycle, error = %e, "process inspection failed");
                CycleOutcome::InspectionFailed
            }
        };

        self.write_status();
        outcome
    }

    async fn check(&mut self) -> Result<bool, InspectionError> {
        let inspector = Arc::clone(&self.inspector);
        let name = self.settings.process_name.clone();
        let limit = self.settings.call_timeout;

        let running = match run_bounded(limit, move || inspector.is_running(&name)).await {
            Ok(result) => result?,
            Err(BlockingFailure::TimedOut) => {
                return Err(InspectionError::TimedOut {
                    name: self.settings.process_name.clone(),
                    limit,
                })
            }
            Err(BlockingFailure::Panicked(message)) => {
                return Err(InspectionError::Panicked {
                    name: self.settings.process_name.clone(),
                    message,
                })
            }
        };

        self.runtime.is_running = Some(running);
        self.runtime.last_check = Some(Utc::now());
        Ok(running)
    }

    async fn launch(&mut self) -> Result<u32, LaunchError> {
        let launcher = Arc::clone(&self.launcher);
        let executable = self.settings.executable.clone();
        let working_dir = self.settings.working_dir.clone();
        let limit = self.settings.call_timeout;

        let pid = match run_bounded(limit, move || {
            launcher.start(&executable, working_dir.as_deref())
        })
        .await
        {
            Ok(result) => result?,
            Err(BlockingFailure::TimedOut) => {
                return Err(LaunchError::TimedOut {
                    path: self.settings.executable.clone(),
                    limit,
                })
            }
            Err(BlockingFailure::Panicked(message)) => {
                return Err(LaunchError::Panicked {
                    path: self.settings.executable.clone(),
                    message,
                })
            }
        };

        self.runtime.launches += 1;
        self.runtime.last_launch = Some(Utc::now());
        Ok(pid)
    }

    /// ShuttingDown: hook, force stop, notify listeners, then Stopped.
    /// Every step is bounded and no failure skips a later step.
    async fn shut_down(mut self) -> ShutdownReport {
        self.transition(WatchdogState::ShuttingDown);
        tracing::info!(process = %self.settings.process_name, "watchdog stopping");

        let hook_error = match self.run_hook().await {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(error = %e, "shutdown hook failed");
                Some(e.to_string())
            }
        };

        let kill = self.force_stop().await;

        let report = ShutdownReport {
            cycles: self.runtime.cycles,
            launches: self.runtime.launches,
            failures: self.runtime.failures,
            hook_error,
            kill,
        };

        for listener in std::mem::take(&mut self.listeners) {
            listener(&report);
        }

        self.transition(WatchdogState::Stopped);
        tracing::info!(
            cycles = report.cycles,
            launches = report.launches,
            failures = report.failures,
            "watchdog stopped"
        );
        report
    }

    async fn run_hook(&mut self) -> Result<(), ShutdownHookError> {
        let limit = self.settings.hook_timeout;
        tracing::info!(hook = %self.hook.describe(), "releasing license");
        match tokio::time::timeout(limit, self.hook.run()).await {
            Ok(result) => result,
            Err(_) => Err(ShutdownHookError::TimedOut(limit)),
        }
    }

    async fn force_stop(&mut self) -> KillOutcome {
        if !self.settings.kill_on_stop {
            return KillOutcome::Disabled;
        }
        let Some(terminator) = self.terminator.clone() else {
            return KillOutcome::Disabled;
        };

        let name = self.settings.process_name.clone();
        let limit = self.settings.kill_timeout;
        let target = name.clone();
        let result = match run_bounded(limit, move || terminator.terminate(&target)).await {
            Ok(result) => result,
            Err(BlockingFailure::TimedOut) => Err(KillError::TimedOut {
                name: name.clone(),
                limit,
            }),
            Err(BlockingFailure::Panicked(message)) => Err(KillError::Panicked {
                name: name.clone(),
                message,
            }),
        };

        match result {
            Ok(killed) => {
                tracing::info!(process = %name, killed, "force-stopped managed process");
                KillOutcome::Killed(killed)
            }
            Err(e) => {
                tracing::error!(process = %name, error = %e, "force stop failed");
                KillOutcome::Failed(e.to_string())
            }
        }
    }

    fn transition(&mut self, state: WatchdogState) {
        tracing::debug!(from = %self.state, to = %state, "watchdog state transition");
        self.state = state;
        if state == WatchdogState::Stopped {
            if let Some(status) = &self.status {
                status.remove();
            }
        } else {
            self.write_status();
        }
    }

    fn write_status(&self) {
        let Some(status) = &self.status else {
            return;
        };
        let data = StatusData {
            pid: std::process::id(),
            state: self.state,
            process: self.settings.process_name.clone(),
            executable: self.settings.executable.display().to_string(),
            interval_ms: self.settings.interval.as_millis() as u64,
            is_running: self.runtime.is_running,
            cycles: self.runtime.cycles,
            launches: self.runtime.launches,
            failures: self.runtime.failures,
            last_check: self.runtime.last_check,
            last_launch: self.runtime.last_launch,
            last_update: Utc::now(),
        };
        if let Err(e) = status.write(&data) {
            tracing::warn!(error = %e, "failed to write status file");
        }
    }
}

/// Controls a running watchdog. Dropping it also requests a stop; the
/// shutdown sequence then still runs in the background task.
pub struct WatchdogHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<ShutdownReport>,
}

impl WatchdogHandle {
    /// Ask the loop to stop at its next checkpoint without waiting.
    pub fn request_stop(&self) {
        self.cancel.send_replace(true);
    }

    /// Request a stop and wait for the shutdown sequence to complete.
    pub async fn stop(self) -> Result<ShutdownReport, JoinError> {
        self.request_stop();
        self.task.await
    }
}
