//! Production-time correlation for segments and parts.
//!
//! Stamps each closed segment and part with the wall-clock time it was
//! produced, keyed by the absolute production counters rather than the
//! sliding window. Clients pair a record with the current clock to
//! estimate end-to-end latency; part records give the measurement
//! sub-segment resolution.

use std::collections::BTreeMap;

use chrono::Utc;
use parking_lot::Mutex;

/// Records retained per map before the oldest is evicted.
const CAPACITY: usize = 120;

#[derive(Debug, Default)]
struct Records {
    /// Highest file index stamped so far.
    high_water: u64,
    /// File index to production time in nanoseconds since the epoch.
    produced_at: BTreeMap<u64, i64>,
}

impl Records {
    /// Stamp every file index between the high-water mark and `total`
    /// with the current time. Repeats and regressions never restamp.
    fn stamp_through(&mut self, total: u64) {
        if total <= self.high_water {
            return;
        }
        let now = now_ns();
        for index in self.high_water + 1..=total {
            self.produced_at.insert(index, now);
        }
        self.high_water = total;
        while self.produced_at.len() > CAPACITY {
            self.produced_at.pop_first();
        }
    }

    fn named(&self, name: impl Fn(u64) -> String) -> BTreeMap<String, i64> {
        self.produced_at
            .iter()
            .map(|(index, ns)| (name(*index), *ns))
            .collect()
    }
}

/// Bounded maps of segment and part file index to production time.
#[derive(Debug, Default)]
pub struct TimestampLedger {
    segments: Mutex<Records>,
    parts: Mutex<Records>,
}

/// Point-in-time view: filename to production time for both record
/// kinds, plus the clock reading the snapshot was taken at.
#[derive(Debug)]
pub struct TimestampSnapshot {
    pub segments: BTreeMap<String, i64>,
    pub parts: BTreeMap<String, i64>,
    pub now_ns: i64,
}

impl TimestampLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe the absolute segment count. Multiple segments may close
    /// between observations; each newly implied index gets stamped.
    pub fn observe(&self, total_segments: u64) {
        let mut records = self.segments.lock();
        records.stamp_through(total_segments);
    }

    /// Observe the absolute count of closed parts.
    pub fn observe_parts(&self, total_parts: u64) {
        let mut records = self.parts.lock();
        records.stamp_through(total_parts);
    }

    pub fn snapshot(&self) -> TimestampSnapshot {
        TimestampSnapshot {
            segments: self.segments.lock().named(segment_file_name),
            parts: self.parts.lock().named(part_file_name),
            now_ns: now_ns(),
        }
    }
}

/// Segment file indices are 1-based: sequence N lands in file N+1.
pub fn segment_file_name(index: u64) -> String {
    format!("segment{index:05}.m4s")
}

/// Part file indices are 1-based as well.
pub fn part_file_name(index: u64) -> String {
    format!("part{index:05}.m4s")
}

fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
