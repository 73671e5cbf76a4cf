//! Matchmaking queues - per-(mode, region) FIFO with widened tolerances

use std::collections::{HashMap, VecDeque};

use crate::ws::protocol::{GameMode, Region};

/// Player waiting in a queue
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub player_id: String,
    /// Rating snapshot taken at enqueue time
    pub rating: f64,
    pub latency_ms: u32,
    pub mode: GameMode,
    pub region: Region,
    pub joined_at: u64,
}

impl QueueEntry {
    pub fn wait_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.joined_at)
    }
}

/// Queue position report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    pub position: usize,
    pub wait_ms: u64,
    pub eta_ms: u64,
}

/// Pairing tolerances; widened with wait time up to a cap
#[derive(Debug, Clone, Copy)]
pub struct PairingPolicy {
    pub base_skill_tol: f64,
    pub max_skill_tol: f64,
    pub latency_tol_ms: u32,
}

impl PairingPolicy {
    /// Skill gap allowed after waiting `wait_ms`
    pub fn skill_tolerance(&self, wait_ms: u64) -> f64 {
        let widened = self.base_skill_tol + (wait_ms / 1000) as f64 * 10.0;
        widened.min(self.max_skill_tol)
    }

    /// Both gates must pass for a candidate pair
    pub fn allows(&self, head: &QueueEntry, candidate: &QueueEntry, now: u64) -> bool {
        let skill_gap = (head.rating - candidate.rating).abs();
        let latency_gap = head.latency_ms.abs_diff(candidate.latency_ms);
        skill_gap <= self.skill_tolerance(head.wait_ms(now))
            && latency_gap <= self.latency_tol_ms
            && region_allows(head.region, candidate.region)
    }
}

/// Region policy: same region always; declared neighbor pairs otherwise.
/// Cross-region pairs still pass the latency gate like any other pair.
pub fn region_allows(a: Region, b: Region) -> bool {
    use Region::*;
    if a == b {
        return true;
    }
    matches!(
        (a, b),
        (NaEast, NaWest) | (NaWest, NaEast) | (EuWest, EuCentral) | (EuCentral, EuWest)
    )
}

/// All matchmaking queues, keyed by (mode, region)
#[derive(Debug, Default)]
pub struct MatchQueues {
    queues: HashMap<(GameMode, Region), VecDeque<QueueEntry>>,
}

impl MatchQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert ordered by join time. A duplicate enqueue anywhere is rejected.
    pub fn enqueue(&mut self, entry: QueueEntry) -> Result<usize, ()> {
        if self.contains(&entry.player_id) {
            return Err(());
        }
        let queue = self.queues.entry((entry.mode, entry.region)).or_default();
        queue.push_back(entry);
        Ok(queue.len())
    }

    /// Remove wherever present; a miss is a no-op
    pub fn dequeue(&mut self, player_id: &str) -> Option<QueueEntry> {
        for queue in self.queues.values_mut() {
            if let Some(pos) = queue.iter().position(|e| e.player_id == player_id) {
                return queue.remove(pos);
            }
        }
        None
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.queues
            .values()
            .any(|q| q.iter().any(|e| e.player_id == player_id))
    }

    pub fn status(&self, player_id: &str, now: u64, timeout_ms: u64) -> Option<QueueStatus> {
        for queue in self.queues.values() {
            if let Some(pos) = queue.iter().position(|e| e.player_id == player_id) {
                let wait_ms = queue[pos].wait_ms(now);
                return Some(QueueStatus {
                    position: pos + 1,
                    wait_ms,
                    eta_ms: timeout_ms.saturating_sub(wait_ms),
                });
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove entries whose wait exceeds the timeout, returning them
    pub fn expire(&mut self, now: u64, timeout_ms: u64) -> Vec<QueueEntry> {
        let mut expired = Vec::new();
        for queue in self.queues.values_mut() {
            let mut kept = VecDeque::with_capacity(queue.len());
            while let Some(entry) = queue.pop_front() {
                if entry.wait_ms(now) >= timeout_ms {
                    expired.push(entry);
                } else {
                    kept.push_back(entry);
                }
            }
            *queue = kept;
        }
        expired
    }

    /// Return failed-match players to the front of their queue, original
    /// join times preserved
    pub fn requeue_front(&mut self, entries: Vec<QueueEntry>) {
        for entry in entries.into_iter().rev() {
            self.queues
                .entry((entry.mode, entry.region))
                .or_default()
                .push_front(entry);
        }
    }

    /// One pairing pass. Queues are visited in order of their longest
    /// waiter; for each head, candidates are scanned FIFO in the head's own
    /// queue, then in policy-allowed neighbor regions of the same mode.
    /// Returns the formed parties; matched entries are removed.
    pub fn pairing_pass(&mut self, now: u64, policy: &PairingPolicy) -> Vec<Vec<QueueEntry>> {
        let mut matches = Vec::new();

        let mut keys: Vec<(GameMode, Region)> = self.queues.keys().copied().collect();
        keys.sort_by_key(|key| {
            std::cmp::Reverse(
                self.queues[key]
                    .front()
                    .map(|e| e.wait_ms(now))
                    .unwrap_or(0),
            )
        });

        for key in keys {
            loop {
                let Some(head) = self
                    .queues
                    .get_mut(&key)
                    .and_then(|queue| queue.pop_front())
                else {
                    break;
                };
                let party_size = head.mode.party_size();

                // (queue key, player_id) of accepted teammates
                let mut accepted: Vec<(GameMode, Region, String)> = Vec::new();
                let mut regions: Vec<Region> = vec![head.region];
                for region in [
                    Region::NaEast,
                    Region::NaWest,
                    Region::EuWest,
                    Region::EuCentral,
                    Region::Apac,
                ] {
                    if region != head.region && region_allows(head.region, region) {
                        regions.push(region);
                    }
                }

                'scan: for region in regions {
                    let Some(queue) = self.queues.get(&(head.mode, region)) else {
                        continue;
                    };
                    for candidate in queue.iter() {
                        if accepted.len() + 1 >= party_size {
                            break 'scan;
                        }
                        if policy.allows(&head, candidate, now) {
                            accepted.push((head.mode, region, candidate.player_id.clone()));
                        }
                    }
                }

                if accepted.len() + 1 < party_size {
                    // not enough compatible players; head keeps its spot
                    if let Some(queue) = self.queues.get_mut(&key) {
                        queue.push_front(head);
                    }
                    break;
                }

                let mut party = vec![head];
                for (mode, region, player_id) in accepted {
                    if let Some(queue) = self.queues.get_mut(&(mode, region)) {
                        if let Some(pos) = queue.iter().position(|e| e.player_id == player_id) {
                            if let Some(entry) = queue.remove(pos) {
                                party.push(entry);
                            }
                        }
                    }
                }
                matches.push(party);
            }
        }

        matches
    }
}
