//! Replay ring - bounded, time-indexed log of match snapshots

use std::collections::VecDeque;

use crate::ws::protocol::{MatchSnapshot, ReplaySnapshotView};

/// One recorded snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySnapshot {
    /// Milliseconds since recording started
    pub relative_time: u64,
    /// Absolute wall-clock time of the record
    pub timestamp: u64,
    pub snapshot: MatchSnapshot,
}

/// Ring statistics for observability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    pub count: usize,
    pub start_time: u64,
    pub runtime_ms: u64,
    /// Rough in-memory footprint of retained snapshots
    pub memory_bytes: usize,
}

/// Append-only snapshot ring for one match.
///
/// Capped by entry count and by age; appends faster than the sampling
/// interval are discarded.
pub struct ReplayRing {
    events: VecDeque<ReplaySnapshot>,
    start_time: u64,
    max_events: usize,
    retention_ms: u64,
    sample_interval_ms: u64,
    last_recorded_at: Option<u64>,
}

impl ReplayRing {
    pub fn new(start_time: u64, max_events: usize, retention_ms: u64, sample_interval_ms: u64) -> Self {
        Self {
            events: VecDeque::new(),
            start_time,
            max_events: max_events.max(1),
            retention_ms,
            sample_interval_ms,
            last_recorded_at: None,
        }
    }

    /// Record a snapshot. Sub-interval records are discarded; overflow
    /// drops the oldest entry. Returns true when the snapshot was kept.
    pub fn record(&mut self, snapshot: MatchSnapshot, now: u64) -> bool {
        if let Some(last) = self.last_recorded_at {
            if now.saturating_sub(last) < self.sample_interval_ms {
                return false;
            }
        }
        self.last_recorded_at = Some(now);

        self.events.push_back(ReplaySnapshot {
            relative_time: now.saturating_sub(self.start_time),
            timestamp: now,
            snapshot,
        });

        while self.events.len() > self.max_events {
            self.events.pop_front();
        }
        self.prune(now);
        true
    }

    /// Drop entries older than the retention window
    pub fn prune(&mut self, now: u64) {
        let cutoff = now.saturating_sub(self.retention_ms);
        while let Some(front) = self.events.front() {
            if front.timestamp < cutoff {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    /// Entries at or after `from` (relative ms), in chronological order
    pub fn get_replay(&self, from: u64) -> Vec<ReplaySnapshotView> {
        self.events
            .iter()
            .filter(|e| e.relative_time >= from)
            .map(|e| ReplaySnapshotView {
                relative_time: e.relative_time,
                timestamp: e.timestamp,
                snapshot: e.snapshot.clone(),
            })
            .collect()
    }

    /// Latest retained snapshot with `relative_time <= relative_ms`.
    /// After a retention sweep this is None when everything at or before
    /// the requested time was pruned.
    pub fn snapshot_at(&self, relative_ms: u64) -> Option<&ReplaySnapshot> {
        self.events
            .iter()
            .take_while(|e| e.relative_time <= relative_ms)
            .last()
    }

    pub fn stats(&self, now: u64) -> ReplayStats {
        // players dominate the payload; a per-entry estimate is enough
        let memory_bytes = self
            .events
            .iter()
            .map(|e| {
                std::mem::size_of::<ReplaySnapshot>()
                    + e.snapshot.players.len() * 160
                    + e.snapshot.projectiles.len() * 96
            })
            .sum();

        ReplayStats {
            count: self.events.len(),
            start_time: self.start_time,
            runtime_ms: now.saturating_sub(self.start_time),
            memory_bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::MatchStatus;
    use std::collections::HashMap;

    fn snapshot() -> MatchSnapshot {
        MatchSnapshot {
            status: MatchStatus::Active,
            players: Vec::new(),
            projectiles: Vec::new(),
            power_ups: Vec::new(),
            score: HashMap::new(),
            match_time_ms: 0,
        }
    }

    fn ring() -> ReplayRing {
        // start at t0 = 10_000, interval 100ms
        ReplayRing::new(10_000, 10, 60_000, 100)
    }

    #[test]
    fn snapshot_at_returns_latest_at_or_before() {
        let mut r = ring();
        for offset in [0u64, 100, 200, 300, 400, 500] {
            assert!(r.record(snapshot(), 10_000 + offset));
        }

        assert_eq!(r.snapshot_at(250).unwrap().relative_time, 200);
        assert_eq!(r.snapshot_at(500).unwrap().relative_time, 500);
        assert_eq!(r.snapshot_at(99).unwrap().relative_time, 0);
    }

    #[test]
    fn sub_interval_records_are_discarded() {
        let mut r = ring();
        assert!(r.record(snapshot(), 10_000));
        assert!(!r.record(snapshot(), 10_050));
        assert!(r.record(snapshot(), 10_100));
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut r = ring();
        for i in 0..15u64 {
            r.record(snapshot(), 10_000 + i * 100);
        }
        assert_eq!(r.len(), 10);
        assert_eq!(r.events.front().unwrap().relative_time, 500);
    }

    #[test]
    fn retention_sweep_prunes_and_lookup_reflects_it() {
        let mut r = ReplayRing::new(10_000, 100, 300, 100);
        for offset in [0u64, 100, 200, 300, 400, 500] {
            r.record(snapshot(), 10_000 + offset);
        }

        // sweep at relative 600: cutoff keeps timestamps >= 10_300
        r.prune(10_600);
        assert_eq!(r.snapshot_at(250), None);
        assert_eq!(r.snapshot_at(400).unwrap().relative_time, 400);
    }

    #[test]
    fn lookup_is_stable_under_later_appends() {
        let mut r = ring();
        for offset in [0u64, 100, 200, 300] {
            r.record(snapshot(), 10_000 + offset);
        }
        let before = r.snapshot_at(250).unwrap().relative_time;
        r.record(snapshot(), 10_900);
        assert_eq!(r.snapshot_at(250).unwrap().relative_time, before);
    }

    #[test]
    fn get_replay_filters_from_offset() {
        let mut r = ring();
        for offset in [0u64, 100, 200, 300] {
            r.record(snapshot(), 10_000 + offset);
        }
        let tail = r.get_replay(150);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].relative_time, 200);
    }

    #[test]
    fn stats_report_count_and_runtime() {
        let mut r = ring();
        r.record(snapshot(), 10_000);
        r.record(snapshot(), 10_100);
        let stats = r.stats(11_000);
        assert_eq!(stats.count, 2);
        assert_eq!(stats.runtime_ms, 1_000);
    }
}
