use crate::inventory::ProcessSample;
use std::collections::{HashMap, HashSet, VecDeque};

/// Per-PID window of recent CPU samples, oldest first.
///
/// Lives for the whole watchdog run. A PID's window is dropped the first
/// cycle it is missing from the process table, so a recycled PID starts
/// with a clean slate.
#[derive(Debug, Clone)]
pub struct CpuHistory {
    entries: usize,
    samples: HashMap<u32, VecDeque<f64>>,
}

impl CpuHistory {
    /// Create an empty history keeping at most `entries` samples per PID.
    pub fn new(entries: usize) -> Self {
        Self {
            entries,
            samples: HashMap::new(),
        }
    }

    /// Absorb this cycle's observations.
    ///
    /// PIDs absent from `processes` are forgotten first, then each observed
    /// sample is appended and the window truncated from the front.
    pub fn update(&mut self, processes: &[ProcessSample]) {
        let current: HashSet<u32> = processes.iter().map(|p| p.pid).collect();
        self.samples.retain(|pid, _| current.contains(pid));

        for process in processes {
            let window = self.samples.entry(process.pid).or_default();
            window.push_back(process.cpu_percent);
            while window.len() > self.entries {
                window.pop_front();
            }
        }
    }

    /// Number of samples for `pid` strictly above `threshold`.
    /// Unknown PIDs have no violations.
    pub fn violations(&self, pid: u32, threshold: f64) -> usize {
        self.samples
            .get(&pid)
            .map(|window| window.iter().filter(|cpu| **cpu > threshold).count())
            .unwrap_or(0)
    }

    /// Samples recorded for `pid`, oldest first.
    #[cfg(test)]
    pub fn samples(&self, pid: u32) -> Option<Vec<f64>> {
        self.samples.get(&pid).map(|w| w.iter().copied().collect())
    }

    /// Number of PIDs currently tracked.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pid: u32, cpu_percent: f64) -> ProcessSample {
        ProcessSample { pid, cpu_percent }
    }

    #[test]
    fn test_new_history_is_empty() {
        let history = CpuHistory::new(5);
        assert!(history.is_empty());
        assert_eq!(history.samples(1), None);
        assert_eq!(history.violations(1, 70.0), 0);
    }

    #[test]
    fn test_window_keeps_most_recent_samples() {
        let mut history = CpuHistory::new(3);
        for cpu in [80.0, 60.0, 90.0, 95.0] {
            history.update(&[sample(42, cpu)]);
        }
        assert_eq!(history.samples(42), Some(vec![60.0, 90.0, 95.0]));
        assert_eq!(history.violations(42, 70.0), 2);
    }

    #[test]
    fn test_window_never_exceeds_bound() {
        let mut history = CpuHistory::new(2);
        for i in 0..10 {
            history.update(&[sample(7, i as f64)]);
            assert!(history.samples(7).unwrap().len() <= 2);
        }
        assert_eq!(history.samples(7), Some(vec![8.0, 9.0]));
    }

    #[test]
    fn test_vanished_pid_is_forgotten() {
        let mut history = CpuHistory::new(5);
        history.update(&[sample(1, 99.0), sample(2, 99.0)]);
        history.update(&[sample(1, 99.0)]);
        assert_eq!(history.samples(2), None);
        assert_eq!(history.violations(2, 70.0), 0);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_recycled_pid_starts_fresh() {
        let mut history = CpuHistory::new(5);
        history.update(&[sample(9, 99.0)]);
        history.update(&[sample(9, 99.0)]);
        history.update(&[]);
        history.update(&[sample(9, 10.0)]);
        assert_eq!(history.samples(9), Some(vec![10.0]));
    }

    #[test]
    fn test_empty_update_clears_everything() {
        let mut history = CpuHistory::new(5);
        history.update(&[sample(1, 1.0), sample(2, 2.0)]);
        history.update(&[]);
        assert!(history.is_empty());
    }

    #[test]
    fn test_violations_are_strictly_above_threshold() {
        let mut history = CpuHistory::new(5);
        for cpu in [70.0, 70.1, 69.9, 100.0] {
            history.update(&[sample(3, cpu)]);
        }
        assert_eq!(history.violations(3, 70.0), 2);
    }

    #[test]
    fn test_independent_windows_per_pid() {
        let mut history = CpuHistory::new(2);
        history.update(&[sample(1, 10.0), sample(2, 20.0)]);
        history.update(&[sample(1, 11.0), sample(2, 21.0)]);
        history.update(&[sample(1, 12.0), sample(2, 22.0)]);
        assert_eq!(history.samples(1), Some(vec![11.0, 12.0]));
        assert_eq!(history.samples(2), Some(vec![21.0, 22.0]));
    }
}
