/// The hunting loop: collect inventory, update CPU history, classify, and
/// terminate, once per interval until the watchdog is interrupted.
use crate::classify::{classify, Candidate, Reason, RunawayRule};
use crate::executor::Terminate;
use crate::history::CpuHistory;
use crate::inventory::{InventoryError, PoolSource, ProcessTable};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Errors that end the hunting loop.
#[derive(Debug)]
pub enum ReaperError {
    /// The OS process table could not be read. Without it nothing can be
    /// judged, so this is treated as fatal rather than skipped.
    ProcessTable(InventoryError),
    /// SIGINT or SIGTERM was received.
    Interrupted,
}

impl std::fmt::Display for ReaperError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReaperError::ProcessTable(e) => write!(f, "cannot read process table: {e}"),
            ReaperError::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl std::error::Error for ReaperError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReaperError::ProcessTable(e) => Some(e),
            ReaperError::Interrupted => None,
        }
    }
}

/// What one cycle saw and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Processes matching the worker filter.
    pub matched: usize,
    /// False when the pool manager could not be read this cycle.
    pub pool_available: bool,
    pub terminated: Vec<Candidate>,
}

impl CycleReport {
    pub fn count(&self, reason: Reason) -> usize {
        self.terminated.iter().filter(|c| c.reason == reason).count()
    }
}

pub struct Reaper<P, T, E> {
    pool: P,
    table: T,
    terminator: E,
    history: CpuHistory,
    runaway: Option<RunawayRule>,
    interval: Duration,
}

impl<P, T, E> Reaper<P, T, E>
where
    P: PoolSource,
    T: ProcessTable,
    E: Terminate,
{
    pub fn new(
        pool: P,
        table: T,
        terminator: E,
        history: CpuHistory,
        runaway: Option<RunawayRule>,
        interval: Duration,
    ) -> Self {
        Self {
            pool,
            table,
            terminator,
            history,
            runaway,
            interval,
        }
    }

    /// Run one detection-and-termination pass.
    ///
    /// A broken pool manager is absorbed: nothing is terminated this cycle.
    /// A broken process table is returned as an error.
    pub async fn hunt(&mut self) -> Result<CycleReport, ReaperError> {
        let authoritative = match self.pool.fetch_authoritative_pids().await {
            Ok(pids) => Some(pids),
            Err(e) => {
                warn!(error = %e, "pool status unavailable, skipping this cycle");
                None
            }
        };
        let processes = self
            .table
            .fetch_os_processes()
            .await
            .map_err(ReaperError::ProcessTable)?;

        if self.runaway.is_some() {
            self.history.update(&processes);
        }

        let candidates = classify(
            authoritative.as_ref(),
            &processes,
            &self.history,
            self.runaway,
        );
        debug!(
            matched = processes.len(),
            tracked = self.history.len(),
            condemned = candidates.len(),
            "cycle classified"
        );

        for candidate in &candidates {
            self.terminator.terminate(candidate).await;
        }

        Ok(CycleReport {
            matched: processes.len(),
            pool_available: authoritative.is_some(),
            terminated: candidates,
        })
    }

    /// Hunt forever, sleeping `interval` between cycles.
    ///
    /// Returns `Interrupted` once `shutdown` resolves, even mid-cycle; any
    /// other error from a cycle ends the loop as well.
    pub async fn lurk<S>(&mut self, shutdown: S) -> Result<(), ReaperError>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Exiting...");
                    return Err(ReaperError::Interrupted);
                }
                result = self.cycle() => result?,
            }
        }
    }

    async fn cycle(&mut self) -> Result<(), ReaperError> {
        let report = self.hunt().await?;
        if !report.terminated.is_empty() {
            info!(
                matched = report.matched,
                orphans = report.count(Reason::Orphan),
                runaways = report.count(Reason::Runaway),
                pool_available = report.pool_available,
                "cycle finished"
            );
        }
        tokio::time::sleep(self.interval).await;
        Ok(())
    }

    #[cfg(test)]
    fn history(&self) -> &CpuHistory {
        &self.history
    }
}
