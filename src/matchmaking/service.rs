//! Matchmaking service - queue processing and match creation

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{GameError, GameResult};
use crate::game::{spawn_match, MatchOutcome, MatchRegistry, MatchSettings};
use crate::util::time::unix_millis;
use crate::ws::protocol::{GameMode, MatchRole, Region, ServerMsg};

use super::queue::{MatchQueues, PairingPolicy, QueueEntry, QueueStatus};
use super::rating::RatingTable;

/// Queues and ratings live behind one lock; every mutation is serialised
/// through the matchmaker.
struct MatchmakerState {
    queues: MatchQueues,
    ratings: RatingTable,
}

/// The matchmaking service. One long-running pass per `MATCH_TICK_MS`:
/// expire stale entries, then pair the rest.
pub struct Matchmaker {
    state: Mutex<MatchmakerState>,
    registry: Arc<MatchRegistry>,
    /// Connected players reachable for match_found / queue_expired pushes
    connections: DashMap<String, mpsc::Sender<ServerMsg>>,
    config: Arc<Config>,
    /// Finished matches report their result here for rating updates
    outcome_tx: mpsc::Sender<MatchOutcome>,
    outcome_rx: Mutex<mpsc::Receiver<MatchOutcome>>,
}

impl Matchmaker {
    pub fn new(registry: Arc<MatchRegistry>, config: Arc<Config>) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::channel(256);
        Self {
            state: Mutex::new(MatchmakerState {
                queues: MatchQueues::new(),
                ratings: RatingTable::new(),
            }),
            registry,
            connections: DashMap::new(),
            config,
            outcome_tx,
            outcome_rx: Mutex::new(outcome_rx),
        }
    }

    fn policy(&self) -> PairingPolicy {
        PairingPolicy {
            base_skill_tol: self.config.base_skill_tol,
            max_skill_tol: self.config.max_skill_tol,
            latency_tol_ms: self.config.latency_tol_ms,
        }
    }

    /// Register a connection able to receive matchmaker pushes
    pub fn register_connection(&self, player_id: &str, tx: mpsc::Sender<ServerMsg>) {
        self.connections.insert(player_id.to_string(), tx);
    }

    /// Drop a connection and any queue entry it left behind
    pub async fn unregister_connection(&self, player_id: &str) {
        self.connections.remove(player_id);
        let mut state = self.state.lock().await;
        state.queues.dequeue(player_id);
    }

    /// Enqueue a player; duplicate enqueues are rejected
    pub async fn enqueue(
        &self,
        player_id: &str,
        mode: GameMode,
        region: Region,
        latency_ms: u32,
    ) -> GameResult<usize> {
        let now = unix_millis();
        let mut state = self.state.lock().await;

        let rating = state.ratings.rating_of(player_id, now);
        let entry = QueueEntry {
            player_id: player_id.to_string(),
            rating,
            latency_ms,
            mode,
            region,
            joined_at: now,
        };

        let position = state
            .queues
            .enqueue(entry)
            .map_err(|_| GameError::AlreadyJoined)?;

        info!(
            player_id = %player_id,
            mode = ?mode,
            region = ?region,
            position,
            "player queued"
        );
        Ok(position)
    }

    /// Remove a player from the queue; a miss is a silent no-op
    pub async fn dequeue(&self, player_id: &str) -> bool {
        let mut state = self.state.lock().await;
        state.queues.dequeue(player_id).is_some()
    }

    pub async fn status(&self, player_id: &str) -> GameResult<QueueStatus> {
        let state = self.state.lock().await;
        state
            .queues
            .status(player_id, unix_millis(), self.config.queue_timeout_ms)
            .ok_or(GameError::NotInQueue)
    }

    pub async fn queue_size(&self) -> usize {
        self.state.lock().await.queues.len()
    }

    /// Report a decided match outcome to the rating table
    pub async fn record_result(&self, winner_id: &str, loser_id: &str) {
        let mut state = self.state.lock().await;
        state.ratings.record_result(winner_id, loser_id, unix_millis());
    }

    /// Run the matchmaking pass loop, interleaving rating updates from
    /// finished matches
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(tokio::time::Duration::from_millis(
            self.config.match_tick_ms.max(10),
        ));
        let mut outcome_rx = self.outcome_rx.lock().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_pass().await,
                Some(outcome) = outcome_rx.recv() => self.apply_outcome(outcome).await,
            }
        }
    }

    /// Fold a decided match into the rating table (winner beats each loser)
    pub async fn apply_outcome(&self, outcome: MatchOutcome) {
        let Some(winner) = outcome.winner else {
            return; // draws and abandoned matches leave ratings untouched
        };
        let now = unix_millis();
        let mut state = self.state.lock().await;
        for loser in &outcome.losers {
            state.ratings.record_result(&winner, loser, now);
        }
        info!(
            match_id = %outcome.match_id,
            winner = %winner,
            losers = outcome.losers.len(),
            "ratings updated"
        );
    }

    /// One pass: expire, then pair
    pub async fn run_pass(&self) {
        let now = unix_millis();
        let policy = self.policy();

        let (expired, parties) = {
            let mut state = self.state.lock().await;
            let expired = state.queues.expire(now, self.config.queue_timeout_ms);
            let parties = state.queues.pairing_pass(now, &policy);
            (expired, parties)
        };

        for entry in expired {
            info!(player_id = %entry.player_id, waited_ms = entry.wait_ms(now), "queue entry expired");
            self.push_to(&entry.player_id, ServerMsg::QueueExpired);
        }

        for party in parties {
            self.create_match(party).await;
        }
    }

    /// Materialise a match for a formed party and notify its players.
    /// On creation failure the party returns to the head of its queue with
    /// join times preserved.
    async fn create_match(&self, party: Vec<QueueEntry>) {
        let match_id = Uuid::new_v4().to_string();
        let seed = rand::random::<u64>();
        let settings = MatchSettings::from_config(&self.config);

        let handle = spawn_match(
            &self.registry,
            &match_id,
            seed,
            settings,
            Some(self.outcome_tx.clone()),
        );
        if handle.cmd_tx.is_closed() {
            warn!(match_id = %match_id, "match task unavailable, requeueing party");
            for entry in &party {
                self.push_to(&entry.player_id, ServerMsg::MatchCreateFailed);
            }
            let mut state = self.state.lock().await;
            state.queues.requeue_front(party);
            return;
        }

        info!(
            match_id = %match_id,
            players = party.len(),
            "match created from queue"
        );

        for entry in party {
            self.push_to(
                &entry.player_id,
                ServerMsg::MatchFound {
                    match_id: match_id.clone(),
                    role: MatchRole::Player,
                },
            );
        }
    }

    fn push_to(&self, player_id: &str, msg: ServerMsg) {
        if let Some(tx) = self.connections.get(player_id) {
            if tx.try_send(msg).is_err() {
                warn!(player_id = %player_id, "matchmaker push failed, dropping connection");
                drop(tx);
                self.connections.remove(player_id);
            }
        }
    }
}
