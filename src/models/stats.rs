use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::Serialize;

/// Run statistics
#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Total requests attempted
    pub total: u64,
    /// Responses with a 2xx/3xx status
    pub success: u64,
    /// 4xx/5xx responses plus errors
    pub failed: u64,
    /// Requests that never produced a response
    pub errors: u64,
    /// Response count per status code
    pub codes: BTreeMap<u16, u64>,
}

impl RunStats {
    /// Status codes sorted by count, most frequent first
    pub fn codes_by_count(&self) -> Vec<(u16, u64)> {
        let mut codes: Vec<_> = self.codes.iter().map(|(c, n)| (*c, *n)).collect();
        codes.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        codes
    }
}

/// Thread-safe collector shared by dispatch workers
#[derive(Debug, Default)]
pub struct Metrics {
    stats: Mutex<RunStats>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_response(&self, status: u16) {
        let mut stats = self.stats.lock();
        stats.total += 1;
        if (200..400).contains(&status) {
            stats.success += 1;
        } else {
            stats.failed += 1;
        }
        *stats.codes.entry(status).or_insert(0) += 1;
    }

    pub fn record_error(&self) {
        let mut stats = self.stats.lock();
        stats.total += 1;
        stats.failed += 1;
        stats.errors += 1;
    }

    pub fn snapshot(&self) -> RunStats {
        self.stats.lock().clone()
    }
}
