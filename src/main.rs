mod config;
mod error;
mod hooks;
mod inspect;
mod launch;
mod signals;
mod status;
mod watchdog;

use clap::Parser;
use config::{Overrides, WatchSettings, WatchkeeperConfig};
use inspect::SystemProcesses;
use launch::SystemLauncher;
use status::StatusFile;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use watchdog::{KillOutcome, Watchdog};

/// Keeps a named process alive: polls the process table on a fixed interval
/// and relaunches the configured executable whenever the process is gone.
#[derive(Parser, Debug)]
#[command(name = "watchkeeper", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "watchkeeper.toml")]
    config: PathBuf,

    /// Process name to watch (overrides config)
    #[arg(long)]
    process: Option<String>,

    /// Executable to relaunch (overrides config)
    #[arg(long)]
    executable: Option<String>,

    /// Poll interval in milliseconds (overrides config)
    #[arg(long, allow_negative_numbers = true)]
    interval_ms: Option<i64>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Print the status of a running instance and exit
    #[arg(long)]
    status: bool,

    /// List running processes and exit
    #[arg(long)]
    list: bool,

    /// Extra logging (wait/checkpoint details, reaped children)
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);
    tracing::debug!(?cli, "parsed CLI arguments");

    if cli.list {
        return list_processes();
    }

    let mut config = match WatchkeeperConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    config.apply_overrides(&Overrides {
        process: cli.process.clone(),
        executable: cli.executable.clone(),
        interval_ms: cli.interval_ms,
    });

    if cli.status {
        return print_status(&config);
    }

    let settings = match config.settings() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    if cli.dry_run {
        print_settings(&settings, &config);
        return ExitCode::SUCCESS;
    }

    run_service(settings, &config).await
}

fn init_tracing(cli: &Cli) {
    let default_filter = if cli.verbose {
        "watchkeeper=debug"
    } else if cli.quiet {
        "watchkeeper=warn"
    } else {
        "watchkeeper=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

/// Start the watchdog, wait for a stop request, then run the shutdown
/// sequence to completion.
async fn run_service(settings: WatchSettings, config: &WatchkeeperConfig) -> ExitCode {
    let stop_file = config.shutdown.stop_file.clone();
    if signals::consume_stop_file(&stop_file) {
        tracing::warn!(path = %stop_file.display(), "removed stale stop file");
    }

    let processes = Arc::new(SystemProcesses::new());
    let mut watchdog = Watchdog::new(
        settings,
        processes.clone(),
        Arc::new(SystemLauncher),
        hooks::from_config(&config.license),
    )
    .with_terminator(processes)
    .on_shutdown(|report| {
        tracing::info!(
            cycles = report.cycles,
            launches = report.launches,
            failures = report.failures,
            "shutdown complete"
        );
    });
    if config.status.enabled {
        watchdog = watchdog.with_status_file(StatusFile::new(config.status.file.clone()));
    }

    tracing::info!(
        process = %watchdog.settings().process_name,
        state = %watchdog.state(),
        pid = std::process::id(),
        "watchkeeper v{} starting",
        env!("CARGO_PKG_VERSION")
    );
    let handle = watchdog.start();

    match signals::wait_for_shutdown(&stop_file).await {
        Ok(reason) => tracing::info!(%reason, "shutdown requested"),
        Err(e) => tracing::error!(error = %e, "failed to install signal handlers, stopping"),
    }

    tokio::select! {
        result = handle.stop() => match result {
            Ok(report) => {
                if let KillOutcome::Killed(count) = report.kill {
                    tracing::debug!(count, "managed processes killed during shutdown");
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!(error = %e, "watchdog task failed");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("second interrupt, exiting without completing shutdown");
            ExitCode::from(130)
        }
    }
}

fn print_settings(settings: &WatchSettings, config: &WatchkeeperConfig) {
    println!("watchkeeper v{}", env!("CARGO_PKG_VERSION"));
    println!("process:        {}", settings.process_name);
    println!("executable:     {}", settings.executable.display());
    match &settings.working_dir {
        Some(dir) => println!("working dir:    {}", dir.display()),
        None => println!("working dir:    (inherited)"),
    }
    println!("interval:       {} ms", settings.interval.as_millis());
    println!("call timeout:   {} ms", settings.call_timeout.as_millis());
    println!("release hook:   {}", hooks::from_config(&config.license).describe());
    println!("hook timeout:   {} s", settings.hook_timeout.as_secs());
    println!("kill on stop:   {}", settings.kill_on_stop);
    println!("stop file:      {}", config.shutdown.stop_file.display());
    if config.status.enabled {
        println!("status file:    {}", config.status.file.display());
    } else {
        println!("status file:    (disabled)");
    }
    println!("Dry run mode: config validated, not running.");
}

fn print_status(config: &WatchkeeperConfig) -> ExitCode {
    let file = StatusFile::new(config.status.file.clone());
    match file.read() {
        Ok(data) => {
            println!("pid:         {}", data.pid);
            println!("state:       {}", data.state);
            println!("process:     {}", data.process);
            println!("executable:  {}", data.executable);
            let running = match data.is_running {
                Some(true) => "yes",
                Some(false) => "no",
                None => "unknown",
            };
            println!("running:     {running}");
            println!("cycles:      {}", data.cycles);
            println!("launches:    {}", data.launches);
            println!("failures:    {}", data.failures);
            if let Some(at) = data.last_check {
                println!("last check:  {}", at.to_rfc3339());
            }
            if let Some(at) = data.last_launch {
                println!("last launch: {}", at.to_rfc3339());
            }
            println!("updated:     {}", data.last_update.to_rfc3339());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("No running watchkeeper found at {}", file.path().display());
            tracing::debug!(error = %e, "status file unreadable");
            ExitCode::FAILURE
        }
    }
}

fn list_processes() -> ExitCode {
    match SystemProcesses::new().list() {
        Ok(entries) => {
            println!("{:>8}  NAME", "PID");
            for entry in entries {
                println!("{:>8}  {}", entry.pid, entry.name);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to list processes");
            ExitCode::FAILURE
        }
    }
}
