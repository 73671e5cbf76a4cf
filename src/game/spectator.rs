//! Spectator room - per-match spectator set with replay recording

use std::collections::HashSet;

use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::error::{GameError, GameResult};
use crate::ws::protocol::{MatchSnapshot, ServerMsg};

use super::broadcast::Broadcaster;
use super::replay::{ReplayRing, ReplaySnapshot, ReplayStats};

/// Per-match spectator room. Owns the spectator-facing broadcaster and the
/// replay ring; join/leave are serialised through the owning match task and
/// guarded by a pending-operation set against reentrant races.
pub struct SpectatorRoom {
    match_id: String,
    spectators: HashSet<Uuid>,
    pending: HashSet<Uuid>,
    broadcaster: Broadcaster,
    replay: ReplayRing,
    max_spectators: usize,
}

impl SpectatorRoom {
    pub fn new(
        match_id: String,
        max_spectators: usize,
        full_state_interval_ms: u64,
        replay: ReplayRing,
    ) -> Self {
        Self {
            match_id,
            spectators: HashSet::new(),
            pending: HashSet::new(),
            broadcaster: Broadcaster::new(full_state_interval_ms),
            replay,
            max_spectators,
        }
    }

    /// Begin a join/leave for `id`; a second operation for the same id
    /// while one is in flight is rejected as transient.
    pub fn begin_op(&mut self, id: Uuid) -> GameResult<()> {
        if !self.pending.insert(id) {
            return Err(GameError::Pending);
        }
        Ok(())
    }

    pub fn end_op(&mut self, id: &Uuid) {
        self.pending.remove(id);
    }

    pub fn join(&mut self, spectator_id: Uuid, tx: mpsc::Sender<ServerMsg>) -> GameResult<()> {
        if self.spectators.contains(&spectator_id) {
            return Err(GameError::AlreadyJoined);
        }
        if self.spectators.len() >= self.max_spectators {
            return Err(GameError::SpectatorsFull);
        }

        self.spectators.insert(spectator_id);
        self.broadcaster.subscribe(spectator_id, tx);
        info!(
            match_id = %self.match_id,
            spectator_id = %spectator_id,
            count = self.spectators.len(),
            "spectator joined"
        );
        Ok(())
    }

    pub fn leave(&mut self, spectator_id: &Uuid) -> GameResult<()> {
        if !self.spectators.remove(spectator_id) {
            return Err(GameError::SpectatorNotFound(spectator_id.to_string()));
        }
        self.broadcaster.unsubscribe(spectator_id);
        info!(
            match_id = %self.match_id,
            spectator_id = %spectator_id,
            count = self.spectators.len(),
            "spectator left"
        );
        Ok(())
    }

    pub fn spectator_count(&self) -> usize {
        self.spectators.len()
    }

    /// Mirror a committed broadcast to the spectators
    pub fn forward(&mut self, msg: &ServerMsg) {
        self.broadcaster.broadcast(msg);
    }

    /// Append a timestamped snapshot to the replay ring
    pub fn record_snapshot(&mut self, snapshot: MatchSnapshot, now: u64) -> bool {
        self.replay.record(snapshot, now)
    }

    pub fn sweep_replay(&mut self, now: u64) {
        self.replay.prune(now);
    }

    pub fn replay_since(&self, from_ms: u64) -> Vec<crate::ws::protocol::ReplaySnapshotView> {
        self.replay.get_replay(from_ms)
    }

    pub fn replay_at(&self, relative_ms: u64) -> Option<&ReplaySnapshot> {
        self.replay.snapshot_at(relative_ms)
    }

    pub fn replay_stats(&self, now: u64) -> ReplayStats {
        self.replay.stats(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::MatchStatus;
    use std::collections::HashMap;

    fn room(cap: usize) -> SpectatorRoom {
        SpectatorRoom::new(
            "m1".into(),
            cap,
            5_000,
            ReplayRing::new(0, 100, 60_000, 100),
        )
    }

    fn chan() -> mpsc::Sender<ServerMsg> {
        mpsc::channel(8).0
    }

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

    #[tokio::test]
    async fn duplicate_join_is_rejected() {
        let mut r = room(10);
        let id = Uuid::new_v4();
        r.join(id, chan()).unwrap();
        assert_eq!(r.join(id, chan()), Err(GameError::AlreadyJoined));
        assert_eq!(r.spectator_count(), 1);
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let mut r = room(2);
        r.join(Uuid::new_v4(), chan()).unwrap();
        r.join(Uuid::new_v4(), chan()).unwrap();
        assert_eq!(
            r.join(Uuid::new_v4(), chan()),
            Err(GameError::SpectatorsFull)
        );
    }

    #[tokio::test]
    async fn leave_unknown_spectator_errors() {
        let mut r = room(10);
        let id = Uuid::new_v4();
        assert!(matches!(
            r.leave(&id),
            Err(GameError::SpectatorNotFound(_))
        ));
    }

    #[test]
    fn pending_op_guard_blocks_reentry() {
        let mut r = room(10);
        let id = Uuid::new_v4();
        r.begin_op(id).unwrap();
        assert_eq!(r.begin_op(id), Err(GameError::Pending));
        r.end_op(&id);
        assert!(r.begin_op(id).is_ok());
    }

    #[tokio::test]
    async fn forwarded_broadcast_reaches_spectators() {
        let mut r = room(10);
        let (tx, mut rx) = mpsc::channel(8);
        r.join(Uuid::new_v4(), tx).unwrap();

        r.forward(&ServerMsg::Left);
        assert!(matches!(rx.try_recv(), Ok(ServerMsg::Left)));
    }

    #[test]
    fn snapshots_land_in_the_ring() {
        let mut r = room(10);
        assert!(r.record_snapshot(snapshot(), 100));
        assert!(!r.record_snapshot(snapshot(), 150)); // sub-interval
        assert!(r.record_snapshot(snapshot(), 250));
        assert_eq!(r.replay_since(0).len(), 2);
    }
}
