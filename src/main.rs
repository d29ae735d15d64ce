mod config;
mod daemon;
mod error;
mod executor;
mod input;
mod models;
mod notify;
mod probe;
mod report;
mod scheduler;
mod signal;
mod storage;
mod system;
mod tui;
mod utils;
mod windmouse;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::Config;
use daemon::StatusObserver;
use executor::YdotoolInjector;
use fd_lock::RwLock;
use models::{ExecMode, ProbeBackend};
use probe::ActivityProbe;
use report::Reporter;
use scheduler::ActionScheduler;
use signal::Shutdown;
use std::fs::OpenOptions;
use std::path::Path;
use std::time::Duration;
use storage::StateFile;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use utils::format_millis;

const LOCK_FILE: &str = "idlewind.lock";

#[derive(Parser)]
#[command(name = "idlewind")]
#[command(
    about = "Keeps your presence status green with human-like mouse movement",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Start {
        /// Replay each step with its own delay instead of in a fast batch
        #[arg(long)]
        smooth: bool,
        /// Show a live dashboard instead of logging to stderr
        #[arg(long)]
        watch: bool,
        /// Where idle time comes from
        #[arg(long, value_enum)]
        backend: Option<BackendArg>,
        /// Idle time before the warning state (e.g. 30s)
        #[arg(long, value_parser = humantime::parse_duration)]
        warning: Option<Duration>,
        /// Lower bound of the randomized action threshold (e.g. 87s)
        #[arg(long, value_parser = humantime::parse_duration)]
        min_action: Option<Duration>,
        /// Upper bound of the randomized action threshold (e.g. 3m)
        #[arg(long, value_parser = humantime::parse_duration)]
        max_action: Option<Duration>,
    },
    /// Show the status of the running daemon
    Status,
    /// Ask the running daemon to stop
    Stop,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum BackendArg {
    Local,
    Mutter,
}

impl From<BackendArg> for ProbeBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Local => ProbeBackend::Local,
            BackendArg::Mutter => ProbeBackend::Mutter,
        }
    }
}

struct StartArgs {
    smooth: bool,
    watch: bool,
    backend: Option<BackendArg>,
    warning: Option<Duration>,
    min_action: Option<Duration>,
    max_action: Option<Duration>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let base_dir = config::base_dir()?;
    let state_file = StateFile::in_dir(&base_dir)?;
    let lock_path = base_dir.join(LOCK_FILE);

    match cli.command {
        Commands::Start {
            smooth,
            watch,
            backend,
            warning,
            min_action,
            max_action,
        } => {
            let args = StartArgs {
                smooth,
                watch,
                backend,
                warning,
                min_action,
                max_action,
            };
            start(&base_dir, &lock_path, state_file, args)?;
        }
        Commands::Status => {
            Reporter::new(state_file, lock_path).report()?;
        }
        Commands::Stop => {
            Reporter::new(state_file, lock_path).stop()?;
        }
    }

    Ok(())
}

fn apply_overrides(config: &mut Config, args: &StartArgs) {
    if args.smooth {
        config.executor.mode = ExecMode::Smooth;
    }
    if let Some(backend) = args.backend {
        config.backend = backend.into();
    }
    if let Some(warning) = args.warning {
        config.timing.warning_limit_ms = warning.as_millis() as u64;
    }
    if let Some(min_action) = args.min_action {
        config.timing.min_action_ms = min_action.as_millis() as u64;
    }
    if let Some(max_action) = args.max_action {
        config.timing.max_action_ms = max_action.as_millis() as u64;
    }
}

fn start(
    base_dir: &Path,
    lock_path: &Path,
    mut state_file: StateFile,
    args: StartArgs,
) -> Result<()> {
    let mut config = config::load_config()?;
    apply_overrides(&mut config, &args);
    config.validate()?;

    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(lock_path)?;

    let mut lock = RwLock::new(lock_file);
    let _guard = lock.try_write().map_err(|_| {
        anyhow::anyhow!(
            "Another instance of idlewind is already running. Stop it with `idlewind stop` first."
        )
    })?;

    let _log_guard = setup_logging(base_dir, !args.watch)?;

    let shutdown = Shutdown::new();
    shutdown.install_handler()?;

    let probe = ActivityProbe::start(config.backend);
    let injector = YdotoolInjector::from_config(&config.executor);
    let mut scheduler =
        ActionScheduler::new(&config, injector, rand::thread_rng(), shutdown.clone())?;

    info!(
        mode = %config.executor.mode,
        backend = %config.backend,
        warning = %format_millis(config.timing.warning_limit_ms),
        first_trigger = %format_millis(scheduler.action_threshold_ms()),
        "idlewind started"
    );
    if config.notifications {
        notify::notify("idlewind", "Running");
    }

    let tick = Duration::from_millis(config.timing.tick_interval_ms);
    if args.watch {
        let mut dashboard = tui::Dashboard::enter(shutdown.clone())?;
        {
            let mut observers: [&mut dyn StatusObserver; 2] = [&mut state_file, &mut dashboard];
            daemon::run(&probe, &mut scheduler, &mut observers, tick, &shutdown);
        }
        dashboard.leave()?;
    } else {
        let mut observers: [&mut dyn StatusObserver; 1] = [&mut state_file];
        daemon::run(&probe, &mut scheduler, &mut observers, tick, &shutdown);
    }

    info!(movements = scheduler.actions(), "idlewind stopped");
    if config.notifications {
        notify::notify("idlewind", "Stopped");
    }

    Ok(())
}

/// Logs to `idlewind.log` in `base_dir`, and to stderr unless the dashboard
/// owns the terminal. The returned guard flushes the file writer on drop.
fn setup_logging(
    base_dir: &Path,
    to_stderr: bool,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let file_appender = tracing_appender::rolling::never(base_dir, "idlewind.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false);
    let stderr_layer = to_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;

    Ok(guard)
}
