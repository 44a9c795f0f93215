use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the workers of a batch run
#[derive(Debug, Default)]
pub struct BatchStats {
    pub identifiers_fetched: AtomicU64,
    pub records_extracted: AtomicU64,
    pub failures: AtomicU64,
    pub placeholders_used: AtomicU64,
    pub resources_discovered: AtomicU64,
}

/// Plain copy of the counters, for reports and JSON output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub fetched: u64,
    pub extracted: u64,
    pub failed: u64,
    pub placeholders: u64,
    pub resources: u64,
}

impl BatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_fetched(&self) {
        self.identifiers_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_extracted(&self) {
        self.records_extracted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_placeholders(&self, count: u64) {
        self.placeholders_used.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_resources(&self, count: u64) {
        self.resources_discovered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn fetched(&self) -> u64 {
        self.identifiers_fetched.load(Ordering::Relaxed)
    }

    pub fn extracted(&self) -> u64 {
        self.records_extracted.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn placeholders(&self) -> u64 {
        self.placeholders_used.load(Ordering::Relaxed)
    }

    pub fn resources(&self) -> u64 {
        self.resources_discovered.load(Ordering::Relaxed)
    }

    /// Identifiers that reached a final outcome, either way
    pub fn processed(&self) -> u64 {
        self.extracted() + self.failed()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fetched: self.fetched(),
            extracted: self.extracted(),
            failed: self.failed(),
            placeholders: self.placeholders(),
            resources: self.resources(),
        }
    }
}
