/// Short diagnostic capture of a process before it is killed.
use crate::command::substitute_pid;
use crate::signals::pid_exists;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Returned instead of a trace when the target has already exited.
pub const NO_SUCH_PROCESS: &str = "No such process";

/// Attaches to a process for a bounded time and returns what it saw.
#[allow(async_fn_in_trait)]
pub trait Tracer {
    async fn capture(&self, pid: u32, duration: Duration) -> std::io::Result<String>;
}

/// Runs a tracing command template (`strace -p PID` by default) and stops it
/// once the capture window closes, returning stdout followed by stderr.
#[derive(Debug, Clone)]
pub struct StraceTracer {
    template: String,
}

impl StraceTracer {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl Tracer for StraceTracer {
    async fn capture(&self, pid: u32, duration: Duration) -> std::io::Result<String> {
        if !pid_exists(pid) {
            return Ok(NO_SUCH_PROCESS.to_string());
        }

        let command = substitute_pid(&self.template, pid);
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0) // New process group so the whole tracer can be stopped
            .kill_on_drop(true)
            .spawn()?;
        let group = GroupGuard(
            child
                .id()
                .and_then(|id| i32::try_from(id).ok())
                .map(Pid::from_raw),
        );

        let stdout = child.stdout.take().map(|out| tokio::spawn(read_all(out)));
        let stderr = child.stderr.take().map(|err| tokio::spawn(read_all(err)));

        tokio::select! {
            status = child.wait() => {
                tracing::debug!(pid, status = ?status, "tracer exited before capture window ended");
            }
            _ = tokio::time::sleep(duration) => {}
        }
        // Stragglers still hold the pipes open; stop them all.
        drop(group);
        let _ = child.wait().await;

        let mut captured = String::new();
        for reader in [stdout, stderr].into_iter().flatten() {
            if let Ok(text) = reader.await {
                captured.push_str(&text);
            }
        }
        Ok(captured)
    }
}

/// SIGKILLs the tracer's process group when dropped, so a capture
/// abandoned mid-window (watchdog shutdown) leaves no tracer attached.
struct GroupGuard(Option<Pid>);

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(group) = self.0 {
            let _ = killpg(group, Signal::SIGKILL);
        }
    }
}

async fn read_all<T: tokio::io::AsyncRead + Unpin>(mut pipe: T) -> String {
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}
