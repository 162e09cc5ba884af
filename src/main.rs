mod classify;
mod command;
mod config;
mod diagnostics;
mod executor;
mod history;
mod hooks;
mod inventory;
mod logging;
mod reaper;
mod signals;

use clap::Parser;
use classify::RunawayRule;
use command::ShellRunner;
use config::ReaperConfig;
use diagnostics::StraceTracer;
use executor::{KillTiming, Terminator};
use history::CpuHistory;
use hooks::PreKillHook;
use inventory::{PassengerStatus, ProcessFilter, PsTable};
use reaper::{Reaper, ReaperError};
use signals::NixControl;
use std::path::PathBuf;
use std::process::ExitCode;

const DEFAULT_CONFIG: &str = "reaper.toml";

/// Watchdog that finds and kills application-server workers the pool
/// manager no longer knows about, or that are stuck burning CPU.
#[derive(Parser, Debug)]
#[command(name = "worker-reaper", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of CPU samples kept per process
    #[arg(long)]
    history: Option<usize>,

    /// Kill pool workers with at least this many high-CPU samples (enables the runaway rule)
    #[arg(long)]
    max: Option<u32>,

    /// CPU percentage above which a sample counts as high
    #[arg(long)]
    cpu: Option<f64>,

    /// Seconds between SIGTERM and SIGKILL
    #[arg(long)]
    grace: Option<u64>,

    /// Regex selecting worker lines in the process listing
    #[arg(long)]
    pattern: Option<String>,

    /// Seconds between cycles
    #[arg(long)]
    interval: Option<u64>,

    /// Prefix log lines with a timestamp and the watchdog pid
    #[arg(short = 't', long)]
    show_times: bool,

    /// Run the pool status command through rvmsudo
    #[arg(long)]
    rvmsudo: bool,

    /// Command to run before each kill; PID is replaced with the target pid
    #[arg(long)]
    before: Option<String>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (per-cycle classification)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the file configuration.
    fn apply(&self, config: &mut ReaperConfig) {
        if let Some(history) = self.history {
            config.cpu.history = history;
        }
        if let Some(max) = self.max {
            config.cpu.max = Some(max);
        }
        if let Some(cpu) = self.cpu {
            config.cpu.threshold = cpu;
        }
        if let Some(grace) = self.grace {
            config.kill.grace_secs = grace;
        }
        if let Some(pattern) = &self.pattern {
            config.processes.pattern = pattern.clone();
        }
        if let Some(interval) = self.interval {
            config.schedule.interval_secs = interval;
        }
        if self.show_times {
            config.logging.show_times = true;
        }
        if self.rvmsudo {
            config.pool.rvmsudo = true;
        }
        if let Some(before) = &self.before {
            config.kill.before = Some(before.clone());
        }
    }
}

/// Merged configuration plus the file it came from, if any.
fn load_config(cli: &Cli) -> Result<(ReaperConfig, Option<PathBuf>), config::ConfigError> {
    let (mut config, source) = match &cli.config {
        Some(path) => (ReaperConfig::load(path)?, Some(path.clone())),
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG);
            match ReaperConfig::load_optional(&path)? {
                Some(config) => (config, Some(path)),
                None => (ReaperConfig::default(), None),
            }
        }
    };
    cli.apply(&mut config);
    Ok((config, source))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config, source) = match load_config(&cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("worker-reaper: {e}");
            return ExitCode::from(2);
        }
    };
    let pattern = match config.validate() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("worker-reaper: {e}");
            return ExitCode::from(2);
        }
    };

    logging::init(config.logging.show_times, cli.verbose);
    tracing::debug!(?cli, "parsed CLI arguments");
    match &source {
        Some(path) => tracing::debug!(path = %path.display(), "loaded config file"),
        None => tracing::debug!(path = DEFAULT_CONFIG, "no config file, using defaults"),
    }

    if cli.dry_run {
        match toml::to_string_pretty(&config) {
            Ok(resolved) => print!("{resolved}"),
            Err(e) => {
                eprintln!("worker-reaper: failed to render config: {e}");
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    let pool = PassengerStatus::new(ShellRunner, config.pool_invocation());
    let table = PsTable::new(
        ShellRunner,
        config.processes.list_command.clone(),
        ProcessFilter::new(
            pattern,
            config.processes.self_name.clone(),
            std::process::id(),
        ),
    );
    let terminator = Terminator::new(
        ShellRunner,
        StraceTracer::new(config.kill.diagnostic_command.clone()),
        NixControl,
        config.kill.before.as_deref().map(PreKillHook::new),
        KillTiming {
            diagnostic: config.diagnostic_duration(),
            grace: config.grace(),
        },
    );
    let runaway = config.cpu.max.map(|max_violations| RunawayRule {
        threshold: config.cpu.threshold,
        max_violations,
    });

    tracing::info!(
        pattern = %config.processes.pattern,
        interval_secs = config.schedule.interval_secs,
        runaway = runaway.is_some(),
        "worker-reaper starting"
    );

    let mut reaper = Reaper::new(
        pool,
        table,
        terminator,
        CpuHistory::new(config.cpu.history),
        runaway,
        config.interval(),
    );

    match reaper.lurk(signals::shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(ReaperError::Interrupted) => ExitCode::from(130),
        Err(e) => {
            tracing::error!(error = %e, "worker-reaper stopped");
            ExitCode::FAILURE
        }
    }
}
