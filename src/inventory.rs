/// Inventory collection: the pool manager's view of valid workers and the
/// OS process table's view of what is actually running.
use crate::command::CommandRunner;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Matches the `PID: 1234` token printed once per worker by passenger-status.
static PID_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"PID:\s*(\d+)").unwrap());

/// One OS-reported process observation for the current cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSample {
    pub pid: u32,
    pub cpu_percent: f64,
}

/// Errors produced while reading an inventory source.
#[derive(Debug)]
pub enum InventoryError {
    /// The source command could not be started.
    Spawn {
        command: String,
        source: std::io::Error,
    },
    /// The source command exited unsuccessfully.
    Status {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
}

impl std::fmt::Display for InventoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InventoryError::Spawn { command, source } => {
                write!(f, "failed to run `{command}`: {source}")
            }
            InventoryError::Status {
                command,
                exit_code: Some(code),
                stderr,
            } => {
                write!(
                    f,
                    "`{command}` returned a {code} exit code, check that it is working properly"
                )?;
                if !stderr.trim().is_empty() {
                    write!(f, ": {}", stderr.trim())?;
                }
                Ok(())
            }
            InventoryError::Status { command, .. } => {
                write!(f, "`{command}` was terminated by a signal")
            }
        }
    }
}

impl std::error::Error for InventoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InventoryError::Spawn { source, .. } => Some(source),
            InventoryError::Status { .. } => None,
        }
    }
}

/// Lists the PIDs the pool manager currently considers valid workers.
#[allow(async_fn_in_trait)]
pub trait PoolSource {
    async fn fetch_authoritative_pids(&self) -> Result<HashSet<u32>, InventoryError>;
}

/// Lists OS processes matching the worker filter, with their CPU usage.
#[allow(async_fn_in_trait)]
pub trait ProcessTable {
    async fn fetch_os_processes(&self) -> Result<Vec<ProcessSample>, InventoryError>;
}

async fn run_checked<R: CommandRunner>(runner: &R, command: &str) -> Result<String, InventoryError> {
    let output = runner
        .run(command)
        .await
        .map_err(|e| InventoryError::Spawn {
            command: command.to_string(),
            source: e,
        })?;
    if !output.success() {
        return Err(InventoryError::Status {
            command: command.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr,
        });
    }
    Ok(output.stdout)
}

/// Pool source backed by the `passenger-status` command.
pub struct PassengerStatus<R> {
    runner: R,
    invocation: String,
}

impl<R: CommandRunner> PassengerStatus<R> {
    /// `invocation` is the full command line, including any privilege wrapper.
    pub fn new(runner: R, invocation: impl Into<String>) -> Self {
        Self {
            runner,
            invocation: invocation.into(),
        }
    }
}

impl<R: CommandRunner> PoolSource for PassengerStatus<R> {
    async fn fetch_authoritative_pids(&self) -> Result<HashSet<u32>, InventoryError> {
        let stdout = run_checked(&self.runner, &self.invocation).await?;
        Ok(parse_pool_pids(&stdout))
    }
}

/// Extract every `PID: <n>` token from pool-status output.
fn parse_pool_pids(output: &str) -> HashSet<u32> {
    output
        .lines()
        .filter_map(|line| PID_TOKEN.captures(line))
        .filter_map(|caps| caps[1].parse::<u32>().ok())
        .filter(|pid| *pid != 0)
        .collect()
}

/// Process table backed by `ps -eo pid,pcpu,args` (or a compatible command).
pub struct PsTable<R> {
    runner: R,
    list_command: String,
    filter: ProcessFilter,
}

impl<R: CommandRunner> PsTable<R> {
    pub fn new(runner: R, list_command: impl Into<String>, filter: ProcessFilter) -> Self {
        Self {
            runner,
            list_command: list_command.into(),
            filter,
        }
    }
}

impl<R: CommandRunner> ProcessTable for PsTable<R> {
    async fn fetch_os_processes(&self) -> Result<Vec<ProcessSample>, InventoryError> {
        let stdout = run_checked(&self.runner, &self.list_command).await?;
        Ok(self.filter.parse_listing(&stdout))
    }
}

/// Decides which process-listing lines describe pool workers.
#[derive(Debug, Clone)]
pub struct ProcessFilter {
    pattern: Regex,
    self_name: String,
    self_pid: u32,
}

impl ProcessFilter {
    pub fn new(pattern: Regex, self_name: impl Into<String>, self_pid: u32) -> Self {
        Self {
            pattern,
            self_name: self_name.into(),
            self_pid,
        }
    }

    /// Parse `PID CPU% ARGS...` lines, keeping only matching workers.
    /// Malformed lines are skipped.
    pub fn parse_listing(&self, listing: &str) -> Vec<ProcessSample> {
        listing
            .lines()
            .filter(|line| self.accepts(line))
            .filter_map(parse_ps_line)
            .filter(|sample| sample.pid != self.self_pid)
            .collect()
    }

    fn accepts(&self, line: &str) -> bool {
        if line.contains("grep") {
            return false;
        }
        if !self.self_name.is_empty() && line.contains(&self.self_name) {
            return false;
        }
        self.pattern.is_match(line)
    }
}

fn parse_ps_line(line: &str) -> Option<ProcessSample> {
    let mut fields = line.split_whitespace();
    let pid = fields.next()?.parse::<u32>().ok()?;
    let cpu_percent = fields.next()?.parse::<f64>().ok()?;
    if pid == 0 || !cpu_percent.is_finite() {
        tracing::debug!(line, "skipping malformed process line");
        return None;
    }
    Some(ProcessSample { pid, cpu_percent })
}
