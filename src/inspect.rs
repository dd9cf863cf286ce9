/// Process-table queries: existence by name, listing, and force stop.
///
/// Every call re-reads the OS process table. Nothing is tracked by pid across
/// calls; a process is identified by name each time.
use crate::error::{InspectionError, KillError};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid as NixPid;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

/// Answers whether a process with a given name exists.
pub trait ProcessInspector: Send + Sync {
    /// True when at least one live process matches `name`. Which one is
    /// irrelevant.
    fn is_running(&self, name: &str) -> Result<bool, InspectionError>;
}

/// Forcibly stops processes by name. Only used while shutting down.
pub trait ProcessTerminator: Send + Sync {
    /// Kill every process matching `name` and return how many were signalled.
    fn terminate(&self, name: &str) -> Result<usize, KillError>;
}

/// One row of the process listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
}

/// `sysinfo`-backed process table.
pub struct SystemProcesses {
    system: Mutex<System>,
}

impl Default for SystemProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProcesses {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn with_refreshed<T>(&self, f: impl FnOnce(&System) -> T) -> Result<T, InspectionError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(InspectionError::Unsupported);
        }
        // A panic mid-refresh leaves nothing worse than a stale table.
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new().with_exe(UpdateKind::OnlyIfNotSet),
        );
        Ok(f(&system))
    }

    /// Pids of all live processes matching `name`, ascending.
    pub fn find(&self, name: &str) -> Result<Vec<u32>, InspectionError> {
        self.with_refreshed(|system| {
            let threads = thread_ids(system);
            let mut pids: Vec<u32> = system
                .processes()
                .values()
                .filter(|p| !threads.contains(&p.pid()))
                .filter(|p| p.status() != ProcessStatus::Zombie)
                .filter(|p| matches_name(p.name(), p.exe(), name))
                .map(|p| p.pid().as_u32())
                .collect();
            pids.sort_unstable();
            pids
        })
    }

    /// Every process in the table, sorted by name then pid.
    pub fn list(&self) -> Result<Vec<ProcessEntry>, InspectionError> {
        self.with_refreshed(|system| {
            let threads = thread_ids(system);
            let mut entries: Vec<ProcessEntry> = system
                .processes()
                .values()
                .filter(|p| !threads.contains(&p.pid()))
                .map(|p| ProcessEntry {
                    pid: p.pid().as_u32(),
                    name: p.name().to_string_lossy().into_owned(),
                })
                .collect();
            entries.sort_by(|a, b| a.name.cmp(&b.name).then(a.pid.cmp(&b.pid)));
            entries
        })
    }
}

impl ProcessInspector for SystemProcesses {
    fn is_running(&self, name: &str) -> Result<bool, InspectionError> {
        Ok(!self.find(name)?.is_empty())
    }
}

impl ProcessTerminator for SystemProcesses {
    fn terminate(&self, name: &str) -> Result<usize, KillError> {
        let own_pid = std::process::id();
        let mut killed = 0;
        let mut first_error = None;

        for pid in self.find(name)?.into_iter().filter(|pid| *pid != own_pid) {
            match kill_pid(pid) {
                Ok(()) => {
                    tracing::info!(pid, process = %name, "killed process");
                    killed += 1;
                }
                Err(KillError::Signal {
                    source: nix::errno::Errno::ESRCH,
                    ..
                }) => {
                    tracing::debug!(pid, "process exited before it could be killed");
                }
                Err(e) => {
                    tracing::error!(pid, error = %e, "failed to kill process");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(killed),
        }
    }
}

/// Ids of non-leader threads. On Linux the table also lists every task of a
/// process, and signalling a task id signals its whole process.
fn thread_ids(system: &System) -> HashSet<Pid> {
    system
        .processes()
        .values()
        .filter_map(|p| p.tasks().map(|tasks| (p.pid(), tasks)))
        .flat_map(|(owner, tasks)| tasks.iter().copied().filter(move |tid| *tid != owner))
        .collect()
}

/// Send SIGKILL to a single pid.
pub fn kill_pid(pid: u32) -> Result<(), KillError> {
    let raw = i32::try_from(pid).map_err(|_| KillError::Signal {
        pid,
        source: nix::errno::Errno::EINVAL,
    })?;
    signal::kill(NixPid::from_raw(raw), Signal::SIGKILL)
        .map_err(|source| KillError::Signal { pid, source })
}

/// A process matches when its reported name equals `target`, or when the file
/// name of its executable does. The second form covers Linux truncating
/// process names to 15 bytes.
pub fn matches_name(process_name: &OsStr, exe: Option<&Path>, target: &str) -> bool {
    let target = OsStr::new(target);
    if process_name == target {
        return true;
    }
    exe.and_then(Path::file_name)
        .is_some_and(|file_name| file_name == target)
}
