//! State broadcaster - fans committed tick batches out to subscribers

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ws::protocol::{Delta, MatchSnapshot, ServerMsg};

/// Payloads above this many serialized bytes are lz4-compressed
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Per-subscriber outgoing queue depth; a full queue marks the consumer slow
pub const SUBSCRIBER_QUEUE: usize = 64;

/// Subscriber handle keyed by stable connection id.
///
/// Sends never block the tick: a full or closed queue reaps the subscriber
/// (slow consumer rule).
pub struct Broadcaster {
    subscribers: HashMap<Uuid, mpsc::Sender<ServerMsg>>,
    full_state_interval_ms: u64,
    last_keyframe_at: u64,
}

impl Broadcaster {
    pub fn new(full_state_interval_ms: u64) -> Self {
        Self {
            subscribers: HashMap::new(),
            full_state_interval_ms,
            last_keyframe_at: 0,
        }
    }

    pub fn subscribe(&mut self, conn_id: Uuid, tx: mpsc::Sender<ServerMsg>) {
        self.subscribers.insert(conn_id, tx);
    }

    pub fn unsubscribe(&mut self, conn_id: &Uuid) {
        self.subscribers.remove(conn_id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Keyframe cadence check; records the send time when due
    pub fn keyframe_due(&mut self, now: u64) -> bool {
        if now.saturating_sub(self.last_keyframe_at) >= self.full_state_interval_ms {
            self.last_keyframe_at = now;
            true
        } else {
            false
        }
    }

    /// Direct send to one subscriber, reaping it on failure
    pub fn send_to(&mut self, conn_id: &Uuid, msg: &ServerMsg) {
        let failed = match self.subscribers.get(conn_id) {
            Some(tx) => tx.try_send(msg.clone()).is_err(),
            None => return,
        };
        if failed {
            self.subscribers.remove(conn_id);
        }
    }

    /// Fan a message out to every subscriber, reaping dead or slow ones
    pub fn broadcast(&mut self, msg: &ServerMsg) {
        let mut dead: Vec<Uuid> = Vec::new();

        for (conn_id, tx) in &self.subscribers {
            match tx.try_send(msg.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(conn_id = %conn_id, "subscriber queue full, dropping slow consumer");
                    dead.push(*conn_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(conn_id = %conn_id, "subscriber gone, reaping");
                    dead.push(*conn_id);
                }
            }
        }

        for conn_id in dead {
            self.subscribers.remove(&conn_id);
        }
    }

    /// Send a committed delta batch (already compacted by the match state)
    pub fn broadcast_deltas(&mut self, match_id: &str, tick: u64, ts: u64, deltas: Vec<Delta>) {
        if deltas.is_empty() || self.subscribers.is_empty() {
            return;
        }
        let msg = encode_delta_msg(match_id, tick, ts, deltas);
        self.broadcast(&msg);
    }

    /// Send a full-state keyframe
    pub fn broadcast_full(&mut self, match_id: &str, tick: u64, ts: u64, snapshot: MatchSnapshot) {
        if self.subscribers.is_empty() {
            return;
        }
        self.broadcast(&ServerMsg::StateFull {
            match_id: match_id.to_string(),
            tick,
            ts,
            snapshot,
        });
    }
}

/// Build a state_delta message, compressing oversized batches
pub fn encode_delta_msg(match_id: &str, tick: u64, ts: u64, deltas: Vec<Delta>) -> ServerMsg {
    let serialized = serde_json::to_vec(&deltas).unwrap_or_default();

    if serialized.len() > COMPRESSION_THRESHOLD {
        let compressed = lz4_flex::compress_prepend_size(&serialized);
        ServerMsg::StateDelta {
            match_id: match_id.to_string(),
            tick,
            ts,
            deltas: Vec::new(),
            compressed: true,
            payload: Some(BASE64.encode(compressed)),
        }
    } else {
        ServerMsg::StateDelta {
            match_id: match_id.to_string(),
            tick,
            ts,
            deltas,
            compressed: false,
            payload: None,
        }
    }
}

/// Inverse of `encode_delta_msg`, used by clients and tests
pub fn decode_delta_payload(payload: &str) -> Result<Vec<Delta>, String> {
    let compressed = BASE64.decode(payload).map_err(|e| e.to_string())?;
    let raw = lz4_flex::decompress_size_prepended(&compressed).map_err(|e| e.to_string())?;
    serde_json::from_slice(&raw).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::world::Vec2;
    use crate::ws::protocol::PlayerChanges;

    fn update_delta(id: &str, x: f64) -> Delta {
        Delta::PlayerUpdated {
            id: id.to_string(),
            changes: PlayerChanges {
                position: Some(Vec2::new(x, 0.0)),
                ..Default::default()
            },
        }
    }

    #[test]
    fn small_batches_stay_uncompressed() {
        let msg = encode_delta_msg("m1", 1, 0, vec![update_delta("p1", 1.0)]);
        match msg {
            ServerMsg::StateDelta {
                compressed,
                payload,
                deltas,
                ..
            } => {
                assert!(!compressed);
                assert!(payload.is_none());
                assert_eq!(deltas.len(), 1);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn large_batches_compress_and_roundtrip() {
        let deltas: Vec<Delta> = (0..100)
            .map(|i| update_delta(&format!("player_{i}"), i as f64))
            .collect();
        let msg = encode_delta_msg("m1", 1, 0, deltas.clone());

        match msg {
            ServerMsg::StateDelta {
                compressed,
                payload,
                deltas: inline,
                ..
            } => {
                assert!(compressed);
                assert!(inline.is_empty());
                let decoded = decode_delta_payload(&payload.unwrap()).unwrap();
                assert_eq!(decoded, deltas);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn dead_subscribers_are_reaped_on_send() {
        let mut b = Broadcaster::new(5_000);
        let (alive_tx, mut alive_rx) = mpsc::channel(8);
        let (dead_tx, dead_rx) = mpsc::channel(8);
        drop(dead_rx);

        b.subscribe(Uuid::new_v4(), alive_tx);
        b.subscribe(Uuid::new_v4(), dead_tx);
        assert_eq!(b.subscriber_count(), 2);

        b.broadcast_deltas("m1", 1, 0, vec![update_delta("p1", 1.0)]);
        assert_eq!(b.subscriber_count(), 1);
        assert!(alive_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn slow_subscriber_is_disconnected() {
        let mut b = Broadcaster::new(5_000);
        let (tx, _rx) = mpsc::channel(1);
        b.subscribe(Uuid::new_v4(), tx);

        b.broadcast_deltas("m1", 1, 0, vec![update_delta("p1", 1.0)]);
        // queue of one is now full; the next send trips the slow consumer rule
        b.broadcast_deltas("m1", 2, 0, vec![update_delta("p1", 2.0)]);
        assert_eq!(b.subscriber_count(), 0);
    }

    #[test]
    fn keyframe_cadence() {
        let mut b = Broadcaster::new(5_000);
        assert!(b.keyframe_due(5_000));
        assert!(!b.keyframe_due(7_000));
        assert!(b.keyframe_due(10_000));
    }
}
