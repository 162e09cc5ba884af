/// Escalating termination of condemned workers:
/// hook, diagnostic capture, SIGTERM, grace period, SIGKILL.
///
/// Nothing here fails the cycle. Every step logs its own problems and the
/// protocol carries on; whether the process actually died is not checked.
use crate::classify::Candidate;
use crate::command::CommandRunner;
use crate::diagnostics::Tracer;
use crate::hooks::PreKillHook;
use crate::signals::ProcessControl;
use nix::sys::signal::Signal;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Terminates one condemned process.
#[allow(async_fn_in_trait)]
pub trait Terminate {
    async fn terminate(&self, candidate: &Candidate);
}

/// Timing knobs for the kill protocol.
#[derive(Debug, Clone, Copy)]
pub struct KillTiming {
    /// Zero skips the capture step.
    pub diagnostic: Duration,
    pub grace: Duration,
}

pub struct Terminator<R, D, K> {
    runner: R,
    tracer: D,
    control: K,
    hook: Option<PreKillHook>,
    timing: KillTiming,
}

impl<R, D, K> Terminator<R, D, K>
where
    R: CommandRunner,
    D: Tracer,
    K: ProcessControl,
{
    pub fn new(
        runner: R,
        tracer: D,
        control: K,
        hook: Option<PreKillHook>,
        timing: KillTiming,
    ) -> Self {
        Self {
            runner,
            tracer,
            control,
            hook,
            timing,
        }
    }

    async fn run_hook(&self, pid: u32) {
        let Some(hook) = &self.hook else {
            return;
        };
        info!(pid, "Running before-kill script");
        match hook.run(&self.runner, pid).await {
            Ok(output) => {
                if !output.stdout.trim().is_empty() {
                    info!(pid, "{}", output.stdout.trim_end());
                }
            }
            Err(e) => {
                error!(pid, error = %e, "before-kill hook failed");
                debug!(pid, error = ?e, "before-kill hook error detail");
            }
        }
    }

    async fn capture(&self, pid: u32) {
        if self.timing.diagnostic.is_zero() {
            debug!(pid, "diagnostic capture disabled");
            return;
        }
        match self.tracer.capture(pid, self.timing.diagnostic).await {
            Ok(trace) => info!(pid, "{}", trace.trim_end()),
            Err(e) => warn!(pid, error = %e, "diagnostic capture failed"),
        }
    }

    fn send(&self, pid: u32, signal: Signal) {
        if let Err(e) = self.control.signal(pid, signal) {
            warn!(pid, error = %e, "signal delivery failed");
        }
    }
}

impl<R, D, K> Terminate for Terminator<R, D, K>
where
    R: CommandRunner,
    D: Tracer,
    K: ProcessControl,
{
    async fn terminate(&self, candidate: &Candidate) {
        let pid = candidate.pid;
        self.run_hook(pid).await;

        info!(pid, reason = %candidate.reason, "Killing passenger process {pid}");
        self.capture(pid).await;

        self.send(pid, Signal::SIGTERM);
        tokio::time::sleep(self.timing.grace).await;
        self.send(pid, Signal::SIGKILL);
    }
}
