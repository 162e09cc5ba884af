use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from reaper.toml.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ReaperConfig {
    pub pool: PoolConfig,
    pub processes: ProcessesConfig,
    pub cpu: CpuConfig,
    pub kill: KillConfig,
    pub schedule: ScheduleConfig,
    pub logging: LoggingConfig,
}

/// How to ask the pool manager which workers it considers valid.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    pub command: String,
    /// Prefix the pool command with `sudo_wrapper`.
    pub rvmsudo: bool,
    pub sudo_wrapper: String,
}

/// How to list OS processes and which of them count as workers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessesConfig {
    pub list_command: String,
    /// Regex matched against each line of the process listing.
    pub pattern: String,
    /// Lines mentioning this name are never treated as workers.
    pub self_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CpuConfig {
    /// Samples strictly above this percentage count as violations.
    pub threshold: f64,
    /// Number of samples kept per PID.
    pub history: usize,
    /// Violations needed to flag a runaway. Unset disables the runaway rule.
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KillConfig {
    pub grace_secs: u64,
    /// Zero disables diagnostic capture.
    pub diagnostic_secs: u64,
    /// Shell command attached to the target; `PID` is replaced with its pid.
    pub diagnostic_command: String,
    /// Hook command run before each kill. `PID` is replaced with the target pid.
    pub before: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub show_times: bool,
}

// --- Default implementations ---

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            command: "/usr/sbin/passenger-status".to_string(),
            rvmsudo: false,
            sudo_wrapper: "rvmsudo".to_string(),
        }
    }
}

impl Default for ProcessesConfig {
    fn default() -> Self {
        Self {
            list_command: "ps -eo pid,pcpu,args".to_string(),
            pattern: " Rack: ".to_string(),
            self_name: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            threshold: 70.0,
            history: 5,
            max: None,
        }
    }
}

impl Default for KillConfig {
    fn default() -> Self {
        Self {
            grace_secs: 5,
            diagnostic_secs: 5,
            diagnostic_command: "strace -p PID".to_string(),
            before: None,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl ReaperConfig {
    /// Load configuration from a TOML file that must exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(path, &contents)
    }

    /// Like [`ReaperConfig::load`], but a missing file is `Ok(None)`.
    pub fn load_optional(path: &Path) -> Result<Option<Self>, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(path, &contents).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Check the merged configuration and compile the process pattern.
    pub fn validate(&self) -> Result<Regex, ConfigError> {
        if self.cpu.history == 0 {
            return Err(ConfigError::Invalid(
                "cpu.history must be at least 1".to_string(),
            ));
        }
        if self.cpu.max == Some(0) {
            return Err(ConfigError::Invalid(
                "cpu.max must be at least 1 when set".to_string(),
            ));
        }
        if !self.cpu.threshold.is_finite() || self.cpu.threshold < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "cpu.threshold must be a non-negative number, got {}",
                self.cpu.threshold
            )));
        }
        if self.schedule.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "schedule.interval_secs must be at least 1".to_string(),
            ));
        }
        Regex::new(&self.processes.pattern).map_err(|e| {
            ConfigError::Invalid(format!(
                "processes.pattern {:?} is not a valid regex: {e}",
                self.processes.pattern
            ))
        })
    }

    /// Full pool-status invocation, including the privilege wrapper if enabled.
    pub fn pool_invocation(&self) -> String {
        if self.pool.rvmsudo {
            format!("{} {}", self.pool.sudo_wrapper, self.pool.command)
        } else {
            self.pool.command.clone()
        }
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.kill.grace_secs)
    }

    pub fn diagnostic_duration(&self) -> Duration {
        Duration::from_secs(self.kill.diagnostic_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.schedule.interval_secs)
    }
}
