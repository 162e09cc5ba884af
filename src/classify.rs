/// Decides which worker processes to terminate this cycle.
use crate::history::CpuHistory;
use crate::inventory::ProcessSample;
use std::collections::{BTreeMap, HashSet};

/// Why a process was selected for termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reason {
    /// Matched the process filter but unknown to the pool manager.
    Orphan,
    /// Exceeded the CPU threshold too often within the history window.
    Runaway,
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reason::Orphan => write!(f, "orphan"),
            Reason::Runaway => write!(f, "runaway"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub pid: u32,
    pub reason: Reason,
}

/// Settings for the runaway-CPU rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunawayRule {
    pub threshold: f64,
    pub max_violations: u32,
}

/// Matched PIDs the pool manager does not know about.
pub fn orphans(authoritative: &HashSet<u32>, processes: &[ProcessSample]) -> Vec<u32> {
    let mut pids: Vec<u32> = processes
        .iter()
        .map(|p| p.pid)
        .filter(|pid| !authoritative.contains(pid))
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Pool workers whose history holds at least `max_violations` samples above
/// the threshold.
pub fn runaways(authoritative: &HashSet<u32>, history: &CpuHistory, rule: RunawayRule) -> Vec<u32> {
    let mut pids: Vec<u32> = authoritative
        .iter()
        .copied()
        .filter(|pid| history.violations(*pid, rule.threshold) >= rule.max_violations as usize)
        .collect();
    pids.sort_unstable();
    pids
}

/// Union of the runaway and orphan rules, each PID at most once.
///
/// `authoritative` is `None` when the pool manager could not be read; no
/// process is condemned in that case since neither rule has a reference set.
pub fn classify(
    authoritative: Option<&HashSet<u32>>,
    processes: &[ProcessSample],
    history: &CpuHistory,
    rule: Option<RunawayRule>,
) -> Vec<Candidate> {
    let Some(authoritative) = authoritative else {
        return Vec::new();
    };

    let mut selected: BTreeMap<u32, Reason> = BTreeMap::new();
    if let Some(rule) = rule {
        for pid in runaways(authoritative, history, rule) {
            selected.entry(pid).or_insert(Reason::Runaway);
        }
    }
    for pid in orphans(authoritative, processes) {
        selected.entry(pid).or_insert(Reason::Orphan);
    }

    selected
        .into_iter()
        .map(|(pid, reason)| Candidate { pid, reason })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn procs(entries: &[(u32, f64)]) -> Vec<ProcessSample> {
        entries
            .iter()
            .map(|&(pid, cpu_percent)| ProcessSample { pid, cpu_percent })
            .collect()
    }

    fn rule(max_violations: u32) -> Option<RunawayRule> {
        Some(RunawayRule {
            threshold: 70.0,
            max_violations,
        })
    }

    #[test]
    fn test_orphans_are_set_difference() {
        let authoritative = HashSet::from([1, 2]);
        let processes = procs(&[(1, 0.0), (2, 0.0), (3, 0.0)]);
        assert_eq!(orphans(&authoritative, &processes), vec![3]);
    }

    #[test]
    fn test_no_orphans_when_everything_is_known() {
        let authoritative = HashSet::from([1, 2, 3]);
        let processes = procs(&[(1, 0.0), (3, 0.0)]);
        assert!(orphans(&authoritative, &processes).is_empty());
    }

    #[test]
    fn test_authoritative_pids_missing_from_table_are_not_orphans() {
        let authoritative = HashSet::from([10]);
        let processes = procs(&[(11, 0.0)]);
        assert_eq!(orphans(&authoritative, &processes), vec![11]);
    }

    #[test]
    fn test_runaway_scenario() {
        let mut history = CpuHistory::new(3);
        for cpu in [80.0, 60.0, 90.0, 95.0] {
            history.update(&procs(&[(42, cpu)]));
        }
        let authoritative = HashSet::from([42]);
        let candidates = classify(Some(&authoritative), &procs(&[(42, 95.0)]), &history, rule(2));
        assert_eq!(
            candidates,
            vec![Candidate {
                pid: 42,
                reason: Reason::Runaway
            }]
        );
    }

    #[test]
    fn test_runaway_boundary() {
        let mut history = CpuHistory::new(5);
        for cpu in [90.0, 90.0, 10.0] {
            history.update(&procs(&[(5, cpu)]));
        }
        let authoritative = HashSet::from([5]);
        let at = RunawayRule { threshold: 70.0, max_violations: 2 };
        let above = RunawayRule { threshold: 70.0, max_violations: 3 };
        assert_eq!(runaways(&authoritative, &history, at), vec![5]);
        assert!(runaways(&authoritative, &history, above).is_empty());
    }

    #[test]
    fn test_runaway_requires_history() {
        let history = CpuHistory::new(5);
        let authoritative = HashSet::from([8]);
        let rule = RunawayRule { threshold: 70.0, max_violations: 1 };
        assert!(runaways(&authoritative, &history, rule).is_empty());
    }

    #[test]
    fn test_runaway_rule_disabled() {
        let mut history = CpuHistory::new(5);
        history.update(&procs(&[(5, 100.0)]));
        let authoritative = HashSet::from([5]);
        let candidates = classify(Some(&authoritative), &procs(&[(5, 100.0)]), &history, None);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_classify_unions_both_rules() {
        let mut history = CpuHistory::new(5);
        let processes = procs(&[(1, 99.0), (2, 5.0), (3, 0.0)]);
        history.update(&processes);
        let authoritative = HashSet::from([1, 2]);
        let candidates = classify(Some(&authoritative), &processes, &history, rule(1));
        assert_eq!(
            candidates,
            vec![
                Candidate { pid: 1, reason: Reason::Runaway },
                Candidate { pid: 3, reason: Reason::Orphan },
            ]
        );
    }

    #[test]
    fn test_classify_without_authoritative_set_selects_nothing() {
        let mut history = CpuHistory::new(5);
        let processes = procs(&[(1, 99.0), (3, 0.0)]);
        history.update(&processes);
        assert!(classify(None, &processes, &history, rule(1)).is_empty());
    }

    #[test]
    fn test_duplicate_rows_yield_one_candidate() {
        let history = CpuHistory::new(5);
        let processes = procs(&[(4, 0.0), (4, 1.0)]);
        let candidates = classify(Some(&HashSet::new()), &processes, &history, None);
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(Reason::Orphan.to_string(), "orphan");
        assert_eq!(Reason::Runaway.to_string(), "runaway");
    }
}
