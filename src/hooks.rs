/// Pre-kill hook: a user command run against a worker right before it is
/// terminated, e.g. to dump its Ruby backtrace or notify someone.
use crate::command::{substitute_pid, CommandOutput, CommandRunner};

#[derive(Debug)]
pub enum HookError {
    Spawn {
        command: String,
        source: std::io::Error,
    },
    Failed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
}

impl std::fmt::Display for HookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookError::Spawn { command, source } => {
                write!(f, "failed to run before-kill hook `{command}`: {source}")
            }
            HookError::Failed {
                command,
                exit_code,
                stderr,
            } => {
                let code = exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                write!(f, "before-kill hook `{command}` exited with {code}")?;
                if !stderr.trim().is_empty() {
                    write!(f, ": {}", stderr.trim())?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for HookError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HookError::Spawn { source, .. } => Some(source),
            HookError::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreKillHook {
    template: String,
}

impl PreKillHook {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// The hook command line for `pid`.
    pub fn command_for(&self, pid: u32) -> String {
        substitute_pid(&self.template, pid)
    }

    /// Run the hook for `pid` and wait for it to finish.
    pub async fn run<R: CommandRunner>(
        &self,
        runner: &R,
        pid: u32,
    ) -> Result<CommandOutput, HookError> {
        let command = self.command_for(pid);
        let output = runner
            .run(&command)
            .await
            .map_err(|e| HookError::Spawn {
                command: command.clone(),
                source: e,
            })?;
        if !output.success() {
            return Err(HookError::Failed {
                command,
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }
}
