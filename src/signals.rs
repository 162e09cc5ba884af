/// Signal handling in both directions: delivering TERM/KILL to condemned
/// workers, and noticing SIGINT/SIGTERM aimed at the watchdog itself.
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{getpgid, Pid};

/// Errors from delivering a signal. A missing target process is not an error.
#[derive(Debug)]
pub enum SignalError {
    /// PIDs that would address a process group or every process.
    InvalidPid(u32),
    Kill {
        pid: u32,
        signal: Signal,
        source: Errno,
    },
}

impl std::fmt::Display for SignalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalError::InvalidPid(pid) => write!(f, "refusing to signal pid {pid}"),
            SignalError::Kill {
                pid,
                signal,
                source,
            } => write!(f, "failed to send {signal} to {pid}: {source}"),
        }
    }
}

impl std::error::Error for SignalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SignalError::InvalidPid(_) => None,
            SignalError::Kill { source, .. } => Some(source),
        }
    }
}

/// OS primitives the termination protocol needs.
pub trait ProcessControl {
    /// Deliver `signal` to `pid`. Succeeds silently if the process is gone.
    fn signal(&self, pid: u32, signal: Signal) -> Result<(), SignalError>;
}

/// Production implementation on top of `kill(2)` and `getpgid(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NixControl;

fn to_pid(pid: u32) -> Option<Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
        _ => None,
    }
}

/// Whether a process with this PID currently exists.
pub fn pid_exists(pid: u32) -> bool {
    to_pid(pid).is_some_and(|pid| getpgid(Some(pid)).is_ok())
}

impl ProcessControl for NixControl {
    fn signal(&self, pid: u32, signal: Signal) -> Result<(), SignalError> {
        let target = to_pid(pid).ok_or(SignalError::InvalidPid(pid))?;
        match kill(target, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(SignalError::Kill {
                pid,
                signal,
                source,
            }),
        }
    }
}

/// Resolves when the watchdog receives SIGINT or SIGTERM.
///
/// If the SIGTERM handler cannot be installed only Ctrl-C is watched.
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::Command;

    /// Far above any realistic pid_max, but still a positive i32.
    const ABSENT_PID: u32 = i32::MAX as u32;

    #[test]
    fn test_signal_absent_pid_is_ok() {
        assert!(NixControl.signal(ABSENT_PID, Signal::SIGTERM).is_ok());
        assert!(NixControl.signal(ABSENT_PID, Signal::SIGKILL).is_ok());
    }

    #[test]
    fn test_signal_refuses_group_pids() {
        assert!(matches!(
            NixControl.signal(0, Signal::SIGTERM),
            Err(SignalError::InvalidPid(0))
        ));
        assert!(matches!(
            NixControl.signal(u32::MAX, Signal::SIGKILL),
            Err(SignalError::InvalidPid(_))
        ));
    }

    #[test]
    fn test_pid_exists() {
        assert!(pid_exists(std::process::id()));
        assert!(!pid_exists(ABSENT_PID));
        assert!(!pid_exists(0));
    }

    #[test]
    fn test_sigterm_stops_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        NixControl.signal(child.id(), Signal::SIGTERM).unwrap();
        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGTERM as i32));
    }

    #[test]
    fn test_sigkill_stops_child_ignoring_term() {
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .spawn()
            .unwrap();
        // Give the shell time to install its trap.
        std::thread::sleep(std::time::Duration::from_millis(200));
        NixControl.signal(child.id(), Signal::SIGKILL).unwrap();
        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGKILL as i32));
    }

    #[test]
    fn test_error_display() {
        let err = SignalError::Kill {
            pid: 1,
            signal: Signal::SIGKILL,
            source: Errno::EPERM,
        };
        let msg = err.to_string();
        assert!(msg.contains("SIGKILL"));
        assert!(msg.contains("to 1"));
    }
}
