//! Run summary and the aggregator that builds it.
//!
//! The aggregator is the only place counters change. Insertions happen
//! under one mutex together with the counter updates, so external
//! observers always see consistent totals: at any point
//! `successful + failed` equals the number of recorded hosts.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ModuleResult;

/// Per-host results plus run-wide counters and wall-clock bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub results: BTreeMap<String, ModuleResult>,
    pub successful: u64,
    pub failed: u64,
    pub changed: u64,
    pub skipped: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub duration: Duration,
}

impl RunSummary {
    #[must_use]
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            results: BTreeMap::new(),
            successful: 0,
            failed: 0,
            changed: 0,
            skipped: 0,
            started_at,
            duration: Duration::ZERO,
        }
    }

    /// `true` when no recorded host failed.
    #[must_use]
    pub fn all_successful(&self) -> bool {
        self.failed == 0
    }

    /// Host names with a failed result, in name order.
    #[must_use]
    pub fn failed_hosts(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, r)| r.failed)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Folds per-host results into the summary. Shared across scheduler tasks.
pub struct Aggregator {
    inner: Mutex<RunSummary>,
}

impl Aggregator {
    #[must_use]
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(RunSummary::new(started_at)),
        }
    }

    /// Record one host's result, updating the counters atomically with the
    /// map. The first record for a host wins; repeats are ignored so every
    /// targeted host ends with exactly one entry.
    ///
    /// A poisoned lock would make the invariants unverifiable, which is
    /// fatal to the run.
    pub fn record(&self, host: &str, result: ModuleResult) -> bool {
        let mut summary = self.inner.lock().expect("aggregator lock poisoned");
        if summary.results.contains_key(host) {
            return false;
        }
        if result.failed {
            summary.failed += 1;
        } else {
            summary.successful += 1;
            if result.changed {
                summary.changed += 1;
            }
            if result.skipped {
                summary.skipped += 1;
            }
        }
        summary.results.insert(host.to_string(), result);
        true
    }

    /// Count of failed hosts so far.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.inner.lock().expect("aggregator lock poisoned").failed
    }

    /// Stamp the wall-clock fields and hand the summary over.
    #[must_use]
    pub fn finish(self, duration: Duration) -> RunSummary {
        let mut summary = self
            .inner
            .into_inner()
            .expect("aggregator lock poisoned");
        summary.duration = duration;
        summary
    }
}
