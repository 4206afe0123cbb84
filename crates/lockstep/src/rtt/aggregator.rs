// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control-center aggregation of measurement rounds.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::time;

use super::tool::RttTool;
use super::RttTiming;

/// Aggregated state of one class key.
#[derive(Debug, Clone, Default)]
struct RttEntry {
    current_best: u64,
    current_worst: u64,
    all_time_worst: u64,
    /// Rounds this class was accounted in; `measured = missed + received`.
    measured: u64,
    missed: u64,
    /// Last time any response of this class arrived.
    last_seen: u64,
}

/// Snapshot returned by [`RttAggregator::get`].
#[derive(Debug, Clone, PartialEq)]
pub struct RttStats {
    /// Best round trip of the latest round, ns.
    pub current_best: u64,
    /// Worst round trip of the latest round, ns.
    pub current_worst: u64,
    /// Worst round trip ever observed for the class, ns.
    pub all_time_worst: u64,
    /// Fraction of rounds without any response, in `[0, 1]`.
    pub missed_fraction: f64,
}

/// Measures continuously and keeps per-class statistics.
///
/// Spawning the aggregator starts its measurement worker; the worker loops
/// [`RttTool::measure_rtt`] rounds. Classes are created on their first
/// response and evicted wholesale after the liveness timeout.
pub struct RttAggregator {
    tool: Arc<RttTool>,
    entries: Arc<Mutex<HashMap<String, RttEntry>>>,
    run_flag: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    timing: RttTiming,
}

impl RttAggregator {
    /// Spawn an aggregator over `tool` with default timing.
    #[must_use]
    pub fn new(tool: Arc<RttTool>) -> Self {
        Self::with_timing(tool, RttTiming::default())
    }

    /// Spawn an aggregator with explicit timing.
    #[must_use]
    pub fn with_timing(tool: Arc<RttTool>, timing: RttTiming) -> Self {
        let aggregator = Self {
            tool,
            entries: Arc::new(Mutex::new(HashMap::new())),
            run_flag: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            timing,
        };
        aggregator.spawn_worker();
        aggregator
    }

    /// Latest statistics for `id`, or `None` when the class has no entry
    /// (never seen, or evicted after prolonged silence).
    #[must_use]
    pub fn get(&self, id: &str) -> Option<RttStats> {
        self.entries.lock().get(id).map(|entry| {
            let missed_fraction = if entry.measured == 0 {
                // Guard only: entry creation always accounts one round.
                log::warn!(
                    "[rtt] aggregator entry '{}' has no accounted rounds, counter overflow?",
                    id
                );
                0.0
            } else {
                entry.missed as f64 / entry.measured as f64
            };
            RttStats {
                current_best: entry.current_best,
                current_worst: entry.current_worst,
                all_time_worst: entry.all_time_worst,
                missed_fraction,
            }
        })
    }

    /// Tear the worker down, clear every class entry, and start over.
    pub fn restart_measurement(&self) {
        self.teardown_worker();
        self.entries.lock().clear();
        self.spawn_worker();
    }

    /// Tear the worker down, keeping accumulated statistics readable.
    pub fn stop_measurement(&self) {
        self.teardown_worker();
    }

    fn spawn_worker(&self) {
        self.run_flag.store(true, Ordering::Release);

        let tool = Arc::clone(&self.tool);
        let entries = Arc::clone(&self.entries);
        let run_flag = Arc::clone(&self.run_flag);
        let evict_after_ns = self.timing.evict_after.as_nanos() as u64;

        #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
        let worker = std::thread::Builder::new()
            .name("lockstep-rtt".to_string())
            .spawn(move || {
                log::debug!("[rtt] measurement worker up");
                while run_flag.load(Ordering::Acquire) {
                    if !tool.is_active() {
                        std::thread::sleep(Duration::from_millis(200));
                        continue;
                    }

                    // The round itself paces the loop (>= 0.55 s when active).
                    let round = tool.measure_rtt();
                    fold_round(&entries, round, evict_after_ns);
                }
                log::debug!("[rtt] measurement worker down");
            })
            .expect("failed to spawn rtt thread");

        *self.worker.lock() = Some(worker);
    }

    fn teardown_worker(&self) {
        self.run_flag.store(false, Ordering::Release);
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

/// Merge one measurement round into the per-class entries.
fn fold_round(
    entries: &Mutex<HashMap<String, RttEntry>>,
    round: HashMap<String, (u64, u64)>,
    evict_after_ns: u64,
) {
    let now = time::monotonic_ns();
    let mut entries = entries.lock();

    let mut missing: Vec<String> = entries
        .keys()
        .filter(|id| !round.contains_key(*id))
        .cloned()
        .collect();

    for (id, (best, worst)) in round {
        let entry = entries.entry(id).or_default();
        if entry.measured == 0 {
            entry.all_time_worst = worst;
        } else {
            entry.all_time_worst = entry.all_time_worst.max(worst);
        }
        entry.current_best = best;
        entry.current_worst = worst;
        entry.measured += 1;
        entry.last_seen = now;
    }

    missing.retain(|id| {
        let evict = entries
            .get(id)
            .is_some_and(|entry| now.saturating_sub(entry.last_seen) > evict_after_ns);
        if evict {
            log::debug!("[rtt] evicting silent class '{}'", id);
            entries.remove(id);
        }
        !evict
    });

    for id in missing {
        if let Some(entry) = entries.get_mut(&id) {
            entry.current_best = 0;
            entry.current_worst = 0;
            entry.measured += 1;
            entry.missed += 1;
        }
    }
}

impl Drop for RttAggregator {
    fn drop(&mut self) {
        self.teardown_worker();
    }
}

#[cfg(test)]
mod fold_tests {
    use super::*;

    fn round(pairs: &[(&str, u64, u64)]) -> HashMap<String, (u64, u64)> {
        pairs
            .iter()
            .map(|(id, best, worst)| (id.to_string(), (*best, *worst)))
            .collect()
    }

    #[test]
    fn first_round_creates_the_entry() {
        let entries = Mutex::new(HashMap::new());
        fold_round(&entries, round(&[("vehicle", 100, 300)]), u64::MAX);

        let entries = entries.lock();
        let entry = entries.get("vehicle").expect("entry created");
        assert_eq!(entry.current_best, 100);
        assert_eq!(entry.current_worst, 300);
        assert_eq!(entry.all_time_worst, 300);
        assert_eq!(entry.measured, 1);
        assert_eq!(entry.missed, 0);
    }

    #[test]
    fn all_time_worst_only_grows() {
        let entries = Mutex::new(HashMap::new());
        fold_round(&entries, round(&[("vehicle", 100, 300)]), u64::MAX);
        fold_round(&entries, round(&[("vehicle", 50, 200)]), u64::MAX);

        let entries = entries.lock();
        let entry = entries.get("vehicle").expect("entry exists");
        assert_eq!(entry.current_worst, 200);
        assert_eq!(entry.all_time_worst, 300);
        assert_eq!(entry.measured, 2);
    }

    #[test]
    fn silent_round_counts_as_missed() {
        let entries = Mutex::new(HashMap::new());
        fold_round(&entries, round(&[("vehicle", 100, 300)]), u64::MAX);
        fold_round(&entries, HashMap::new(), u64::MAX);

        let entries = entries.lock();
        let entry = entries.get("vehicle").expect("entry exists");
        assert_eq!(entry.measured, 2);
        assert_eq!(entry.missed, 1);
        assert_eq!(entry.current_best, 0);
        assert_eq!(entry.current_worst, 0);
    }

    #[test]
    fn stale_entry_is_evicted_entirely() {
        let entries = Mutex::new(HashMap::new());
        fold_round(&entries, round(&[("vehicle", 100, 300)]), u64::MAX);
        // Zero tolerance: the very next silent round evicts.
        fold_round(&entries, HashMap::new(), 0);

        assert!(entries.lock().get("vehicle").is_none());
    }
}
