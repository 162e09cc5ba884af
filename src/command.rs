/// External command execution behind a small capability trait, so the
/// inventory sources and the pre-kill hook can be exercised with fakes.
use std::process::Stdio;
use tokio::process::Command;

/// Placeholder replaced with the decimal PID in command templates.
pub const PID_MARKER: &str = "PID";

/// Replace every `PID` marker in `template` with `pid`.
pub fn substitute_pid(template: &str, pid: u32) -> String {
    template.replace(PID_MARKER, &pid.to_string())
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (None if killed by signal).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs a command line and waits for it to finish.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    async fn run(&self, command: &str) -> std::io::Result<CommandOutput>;
}

/// Runs commands through `sh -c`, so pipes and redirections in
/// user-supplied templates behave as they would in a shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> std::io::Result<CommandOutput> {
        tracing::debug!(command, "running external command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
