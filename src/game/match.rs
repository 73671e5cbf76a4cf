//! Match lifecycle and the authoritative tick loop

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::GameError;
use crate::util::time::{tick_delta_ms, unix_millis, Timer};
use crate::ws::protocol::{
    GameEventPayload, MatchStatsView, MatchStatus, PlayerMatchStats, ServerMsg,
};

use super::broadcast::{encode_delta_msg, Broadcaster};
use super::collision::{Collider, CollisionResolver, Layer};
use super::combat::CombatSystem;
use super::grid::SpatialGrid;
use super::physics::PhysicsSystem;
use super::replay::ReplayRing;
use super::spectator::SpectatorRoom;
use super::state::MatchState;
use super::world::{
    Player, PowerUp, PowerUpKind, Vec2, WorldBounds, PLAYER_RADIUS, POWERUP_RADIUS,
};
use super::{MatchCommand, MatchOutcome, PlayerInput};

/// Broad-phase cell size; a few player diameters per cell
const GRID_CELL_SIZE: f64 = 100.0;

/// Resource regeneration cadence and amounts
const REGEN_INTERVAL_MS: u64 = 250;
const STAMINA_REGEN: u32 = 5;
const MANA_REGEN: u32 = 3;

/// Replay retention sweep cadence
const REPLAY_SWEEP_INTERVAL_MS: u64 = 60_000;

/// Consecutive overruns before the telemetry event fires
const OVERRUN_EVENT_THRESHOLD: u32 = 3;

/// Number of power-up spawn sites generated per match
const POWERUP_SITES: usize = 4;

/// Per-match tuning distilled from the application config
#[derive(Debug, Clone)]
pub struct MatchSettings {
    pub tick_hz: u32,
    pub max_players: usize,
    pub min_players: usize,
    pub max_spectators: usize,
    pub score_limit: u32,
    pub match_timeout_ms: u64,
    pub empty_match_reap_ms: u64,
    pub full_state_interval_ms: u64,
    pub snapshot_interval_ms: u64,
    pub max_snapshots: usize,
    pub retention_ms: u64,
    pub regen_delay_ms: u64,
    pub world_w: f64,
    pub world_h: f64,
    pub friction: f64,
    pub max_vel: f64,
}

impl MatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick_hz: config.tick_hz,
            max_players: config.max_players,
            min_players: config.min_players,
            max_spectators: config.max_spectators,
            score_limit: config.score_limit,
            match_timeout_ms: config.match_timeout_ms,
            empty_match_reap_ms: config.empty_match_reap_ms,
            full_state_interval_ms: config.full_state_interval_ms,
            snapshot_interval_ms: config.snapshot_interval_ms,
            max_snapshots: config.max_snapshots,
            retention_ms: config.retention_ms,
            regen_delay_ms: config.regen_delay_ms,
            world_w: config.world_w,
            world_h: config.world_h,
            friction: config.friction,
            max_vel: config.max_vel,
        }
    }
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            tick_hz: 60,
            max_players: 16,
            min_players: 2,
            max_spectators: 100,
            score_limit: 20,
            match_timeout_ms: 600_000,
            empty_match_reap_ms: 30_000,
            full_state_interval_ms: 5_000,
            snapshot_interval_ms: 100,
            max_snapshots: 10_000,
            retention_ms: 1_800_000,
            regen_delay_ms: 3_000,
            world_w: 2000.0,
            world_h: 2000.0,
            friction: 0.92,
            max_vel: 500.0,
        }
    }
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: String,
    pub cmd_tx: mpsc::Sender<MatchCommand>,
    pub player_count: Arc<AtomicUsize>,
}

impl MatchHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }
}

/// Registry of all live matches
pub struct MatchRegistry {
    matches: DashMap<String, MatchHandle>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<MatchHandle> {
        self.matches.remove(id).map(|(_, h)| h)
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches.iter().map(|m| m.value().player_count()).sum()
    }

    pub fn iter_handles(&self) -> Vec<MatchHandle> {
        self.matches.iter().map(|m| m.value().clone()).collect()
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a match under `id` if absent, spawning its task; returns the
/// existing handle otherwise (creation is idempotent). Matches created with
/// an `outcome_tx` report their decided result there when they finish.
pub fn spawn_match(
    registry: &Arc<MatchRegistry>,
    id: &str,
    seed: u64,
    settings: MatchSettings,
    outcome_tx: Option<mpsc::Sender<MatchOutcome>>,
) -> MatchHandle {
    registry
        .matches
        .entry(id.to_string())
        .or_insert_with(|| {
            let (game_match, handle) = GameMatch::new(id.to_string(), seed, settings, outcome_tx);

            let registry = registry.clone();
            let match_id = id.to_string();
            tokio::spawn(async move {
                game_match.run().await;
                registry.remove(&match_id);
                info!(match_id = %match_id, "match removed from registry");
            });

            handle
        })
        .clone()
}

/// Entity namespaces inside the shared broad-phase grid
enum EntityRef {
    Player(String),
    Projectile(Uuid),
    PowerUp(Uuid),
}

fn player_key(id: &str) -> String {
    format!("pl_{id}")
}

fn projectile_key(id: Uuid) -> String {
    format!("pr_{id}")
}

fn power_up_key(id: Uuid) -> String {
    format!("pu_{id}")
}

fn parse_key(key: &str) -> Option<EntityRef> {
    if let Some(rest) = key.strip_prefix("pl_") {
        Some(EntityRef::Player(rest.to_string()))
    } else if let Some(rest) = key.strip_prefix("pr_") {
        rest.parse().ok().map(EntityRef::Projectile)
    } else if let Some(rest) = key.strip_prefix("pu_") {
        rest.parse().ok().map(EntityRef::PowerUp)
    } else {
        None
    }
}

/// The authoritative game match, owned by its task
pub struct GameMatch {
    state: MatchState,
    settings: MatchSettings,
    cmd_rx: mpsc::Receiver<MatchCommand>,
    broadcaster: Broadcaster,
    spectators: SpectatorRoom,
    grid: SpatialGrid,
    rng: ChaCha8Rng,
    input_buffer: VecDeque<PlayerInput>,
    input_cap: usize,
    player_conns: HashMap<String, Uuid>,
    player_count: Arc<AtomicUsize>,
    last_now: u64,
    last_regen_at: u64,
    last_replay_at: u64,
    last_sweep_at: u64,
    empty_since: Option<u64>,
    finished_at: Option<u64>,
    consecutive_overruns: u32,
    dropped_inputs: u64,
    outcome_tx: Option<mpsc::Sender<MatchOutcome>>,
}

impl GameMatch {
    pub fn new(
        id: String,
        seed: u64,
        settings: MatchSettings,
        outcome_tx: Option<mpsc::Sender<MatchOutcome>>,
    ) -> (Self, MatchHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = MatchHandle {
            id: id.clone(),
            cmd_tx,
            player_count: player_count.clone(),
        };

        let now = unix_millis();
        let bounds = WorldBounds::new(settings.world_w, settings.world_h);
        let mut state = MatchState::new(
            id.clone(),
            bounds,
            settings.score_limit,
            settings.match_timeout_ms,
        );

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut grid = SpatialGrid::new(GRID_CELL_SIZE);

        // fixed spawn sites rolled from the match seed
        let kinds = [
            PowerUpKind::SpeedBoost,
            PowerUpKind::DamageBoost,
            PowerUpKind::HealthPack,
            PowerUpKind::Shield,
            PowerUpKind::RapidFire,
        ];
        for i in 0..POWERUP_SITES {
            let position = bounds.random_spawn(&mut rng, POWERUP_RADIUS);
            let power_up = PowerUp::new(kinds[i % kinds.len()], position, now);
            grid.insert(&power_up_key(power_up.id), position, POWERUP_RADIUS);
            state.add_power_up(power_up);
        }
        // pre-join deltas have no audience
        state.drain_deltas();

        let replay = ReplayRing::new(
            now,
            settings.max_snapshots,
            settings.retention_ms,
            settings.snapshot_interval_ms,
        );
        let spectators = SpectatorRoom::new(
            id.clone(),
            settings.max_spectators,
            settings.full_state_interval_ms,
            replay,
        );

        let input_cap = (settings.tick_hz as usize * 2).max(16);
        let game_match = Self {
            state,
            broadcaster: Broadcaster::new(settings.full_state_interval_ms),
            spectators,
            grid,
            rng,
            cmd_rx,
            input_buffer: VecDeque::with_capacity(input_cap),
            input_cap,
            player_conns: HashMap::new(),
            player_count,
            last_now: now,
            last_regen_at: now,
            last_replay_at: 0,
            last_sweep_at: now,
            empty_since: Some(now),
            finished_at: None,
            consecutive_overruns: 0,
            dropped_inputs: 0,
            outcome_tx,
            settings,
        };

        (game_match, handle)
    }

    /// Run the authoritative tick loop until the match terminates
    pub async fn run(mut self) {
        info!(match_id = %self.state.id, tick_hz = self.settings.tick_hz, "match task started");

        let tick_budget_ms = tick_delta_ms(self.settings.tick_hz);
        let mut ticker = interval(Duration::from_micros(
            1_000_000 / u64::from(self.settings.tick_hz.max(1)),
        ));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let timer = Timer::new();
            let now = unix_millis();

            if self.drain_commands(now) {
                break; // explicit terminate
            }

            self.run_tick(now);

            // a fatal invariant breach kills this match and nothing else
            if self.state.status == MatchStatus::Active && !self.invariants_hold() {
                error!(match_id = %self.state.id, "invariant breach, terminating match");
                self.state.push_event(GameEventPayload::MatchErrored {
                    reason: "invariant breach".to_string(),
                });
                self.commit(now);
                break;
            }

            self.commit(now);
            self.last_now = now;

            if self.should_reap(now) {
                break;
            }

            // overruns schedule the next tick immediately (Skip behavior);
            // consecutive ones are surfaced as telemetry
            if timer.elapsed_ms() as f64 > tick_budget_ms {
                self.consecutive_overruns += 1;
                warn!(
                    match_id = %self.state.id,
                    elapsed_ms = timer.elapsed_ms(),
                    consecutive = self.consecutive_overruns,
                    "tick budget overrun"
                );
                if self.consecutive_overruns == OVERRUN_EVENT_THRESHOLD {
                    self.state.push_event(GameEventPayload::TickOverrun {
                        consecutive: self.consecutive_overruns,
                    });
                }
            } else {
                self.consecutive_overruns = 0;
            }
        }

        // release subscribers; sockets close naturally
        let ended = ServerMsg::MatchEvent {
            event: GameEventPayload::MatchEnded,
        };
        self.broadcaster.broadcast(&ended);
        self.spectators.forward(&ended);

        info!(match_id = %self.state.id, tick = self.state.tick, "match task stopped");
    }

    // ------------------------------------------------------------------
    // Command intake
    // ------------------------------------------------------------------

    /// Drain the command channel; returns true on terminate
    fn drain_commands(&mut self, now: u64) -> bool {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                MatchCommand::Join {
                    player_id,
                    conn_id,
                    rating,
                    tx,
                } => self.handle_join(player_id, conn_id, rating, tx, now),
                MatchCommand::Leave { player_id } => self.handle_leave(&player_id),
                MatchCommand::Input(input) => self.buffer_input(input),
                MatchCommand::SpectatorJoin { spectator_id, tx } => {
                    self.handle_spectate(spectator_id, tx, now)
                }
                MatchCommand::SpectatorLeave { spectator_id } => {
                    if self.spectators.begin_op(spectator_id).is_ok() {
                        let _ = self.spectators.leave(&spectator_id);
                        self.spectators.end_op(&spectator_id);
                    }
                }
                MatchCommand::ReplayRequest { from_ms, tx } => {
                    let snapshots = self.spectators.replay_since(from_ms);
                    let _ = tx.try_send(ServerMsg::ReplayChunk {
                        match_id: self.state.id.clone(),
                        snapshots,
                    });
                }
                MatchCommand::Terminate => return true,
            }
        }
        false
    }

    fn handle_join(
        &mut self,
        player_id: String,
        conn_id: Uuid,
        rating: f64,
        tx: mpsc::Sender<ServerMsg>,
        now: u64,
    ) {
        let reject = |tx: &mpsc::Sender<ServerMsg>, err: GameError| {
            let _ = tx.try_send(ServerMsg::Error {
                reason: err.code().to_string(),
                message: err.to_string(),
            });
        };

        if self.state.status == MatchStatus::Finished {
            reject(&tx, GameError::MatchFinished);
            return;
        }
        if self.state.players.contains_key(&player_id) {
            reject(&tx, GameError::AlreadyJoined);
            return;
        }
        if self.state.players.len() >= self.settings.max_players {
            reject(&tx, GameError::MatchFull);
            return;
        }

        let spawn = self.state.bounds.random_spawn(&mut self.rng, PLAYER_RADIUS);
        let player = Player::new(player_id.clone(), player_id.clone(), spawn, rating, now);
        self.grid.insert(&player_key(&player_id), spawn, PLAYER_RADIUS);
        self.state.add_player(player);
        self.state.push_event(GameEventPayload::PlayerJoined {
            player_id: player_id.clone(),
        });

        self.broadcaster.subscribe(conn_id, tx.clone());
        self.player_conns.insert(player_id.clone(), conn_id);
        self.player_count
            .store(self.state.players.len(), Ordering::Relaxed);
        self.empty_since = None;

        let _ = tx.try_send(ServerMsg::Joined {
            match_id: self.state.id.clone(),
        });
        // seed the new subscriber with a keyframe
        let _ = tx.try_send(ServerMsg::StateFull {
            match_id: self.state.id.clone(),
            tick: self.state.tick,
            ts: now,
            snapshot: self.state.snapshot(now),
        });

        info!(
            match_id = %self.state.id,
            player_id = %player_id,
            players = self.state.players.len(),
            "player joined"
        );

        if self.state.status == MatchStatus::Waiting
            && self.state.players.len() >= self.settings.min_players
        {
            self.state.set_status(MatchStatus::Active);
            self.state.started_at = Some(now);
            self.state.push_event(GameEventPayload::MatchStarted {
                tick: self.state.tick,
            });
            info!(match_id = %self.state.id, "match started");
        }
    }

    fn handle_leave(&mut self, player_id: &str) {
        if self.state.remove_player(player_id).is_none() {
            return;
        }
        self.grid.remove(&player_key(player_id));
        if let Some(conn_id) = self.player_conns.remove(player_id) {
            self.broadcaster.unsubscribe(&conn_id);
        }
        self.player_count
            .store(self.state.players.len(), Ordering::Relaxed);
        self.state.push_event(GameEventPayload::PlayerLeft {
            player_id: player_id.to_string(),
        });

        info!(
            match_id = %self.state.id,
            player_id = %player_id,
            players = self.state.players.len(),
            "player left"
        );
    }

    fn handle_spectate(&mut self, spectator_id: Uuid, tx: mpsc::Sender<ServerMsg>, now: u64) {
        if self.spectators.begin_op(spectator_id).is_err() {
            let _ = tx.try_send(ServerMsg::Error {
                reason: GameError::Pending.code().to_string(),
                message: GameError::Pending.to_string(),
            });
            return;
        }

        match self.spectators.join(spectator_id, tx.clone()) {
            Ok(()) => {
                let _ = tx.try_send(ServerMsg::Welcome {
                    spectator_id,
                    match_id: self.state.id.clone(),
                });
                let _ = tx.try_send(ServerMsg::StateFull {
                    match_id: self.state.id.clone(),
                    tick: self.state.tick,
                    ts: now,
                    snapshot: self.state.snapshot(now),
                });
            }
            Err(err) => {
                let _ = tx.try_send(ServerMsg::Error {
                    reason: err.code().to_string(),
                    message: err.to_string(),
                });
            }
        }
        self.spectators.end_op(&spectator_id);
    }

    /// Buffer an input, dropping the oldest on overflow
    fn buffer_input(&mut self, input: PlayerInput) {
        if self.state.status == MatchStatus::Finished {
            // terminal state rejects inputs with a structured reply
            if let Some(conn_id) = self.player_conns.get(&input.player_id) {
                self.broadcaster.send_to(
                    conn_id,
                    &ServerMsg::Error {
                        reason: GameError::MatchFinished.code().to_string(),
                        message: GameError::MatchFinished.to_string(),
                    },
                );
            }
            return;
        }
        if !self.state.players.contains_key(&input.player_id) {
            return; // unknown or disconnected player
        }

        if self.input_buffer.len() >= self.input_cap {
            self.input_buffer.pop_front();
            self.dropped_inputs += 1;
            self.state.push_event(GameEventPayload::DroppedInput {
                count: self.dropped_inputs,
            });
            warn!(
                match_id = %self.state.id,
                dropped_total = self.dropped_inputs,
                "input queue overflow, dropped oldest"
            );
        }
        self.input_buffer.push_back(input);
    }

    // ------------------------------------------------------------------
    // Tick pipeline
    // ------------------------------------------------------------------

    fn run_tick(&mut self, now: u64) {
        if self.state.status != MatchStatus::Active {
            self.input_buffer.clear();
            return;
        }

        self.apply_inputs(now);
        self.step_players(now);
        self.step_projectiles();
        self.resolve_collisions(now);
        self.advance_timers(now);
        self.check_end_conditions(now);
    }

    /// Step 1-2: drain the input buffer through the combat resolver, FIFO
    fn apply_inputs(&mut self, now: u64) {
        while let Some(input) = self.input_buffer.pop_front() {
            if !self.state.players.contains_key(&input.player_id) {
                continue;
            }
            if let Err(err) = CombatSystem::apply_action(
                &mut self.state,
                &input.player_id,
                input.action,
                &input.params,
                now,
                &mut self.rng,
            ) {
                // hot path: invalid inputs are logged and dropped
                debug!(
                    match_id = %self.state.id,
                    player_id = %input.player_id,
                    action = ?input.action,
                    error = %err,
                    "input rejected"
                );
            }
        }
        // projectiles spawned by inputs enter the grid here
        let spawned: Vec<(Uuid, Vec2, f64)> = self
            .state
            .projectiles
            .values()
            .filter(|p| !self.grid.contains(&projectile_key(p.id)))
            .map(|p| (p.id, p.position, p.radius))
            .collect();
        for (id, position, radius) in spawned {
            self.grid.insert(&projectile_key(id), position, radius);
        }
    }

    /// Steps 3-4: integrate player motion and enforce bounds
    fn step_players(&mut self, now: u64) {
        let dt = tick_delta_ms(self.settings.tick_hz);
        let bounds = self.state.bounds;
        let ids: Vec<String> = self
            .state
            .players
            .values()
            .filter(|p| p.alive && p.velocity != Vec2::ZERO)
            .map(|p| p.id.clone())
            .collect();

        for id in ids {
            let (position, velocity) = {
                let p = &self.state.players[&id];
                (p.position, p.velocity)
            };
            let result = PhysicsSystem::step(
                position,
                velocity,
                dt,
                &bounds,
                PLAYER_RADIUS,
                self.settings.friction,
                self.settings.max_vel,
            );
            if result.recovered {
                warn!(match_id = %self.state.id, player_id = %id, "non-finite motion recovered");
            }
            self.state.update_player(&id, now, |p| {
                p.position = result.position;
                p.velocity = result.velocity;
            });
            self.grid
                .update(&player_key(&id), result.position, PLAYER_RADIUS);
        }
    }

    /// Step 5: move projectiles, destroying expired or escaped ones
    fn step_projectiles(&mut self) {
        let dt = tick_delta_ms(self.settings.tick_hz);
        let bounds = self.state.bounds;
        let ids: Vec<Uuid> = self.state.projectiles.keys().copied().collect();

        for id in ids {
            let (position, velocity, distance, range, radius) = {
                let p = &self.state.projectiles[&id];
                (
                    p.position,
                    p.velocity,
                    p.distance_traveled,
                    p.range,
                    p.radius,
                )
            };

            let (new_position, step_distance) = PhysicsSystem::step_projectile(position, velocity, dt);
            let new_distance = distance + step_distance;

            // spent range or the arena wall destroys it
            if new_distance >= range
                || !new_position.is_finite()
                || !bounds.contains(new_position, radius)
            {
                self.state.destroy_projectile(id);
                self.grid.remove(&projectile_key(id));
                continue;
            }

            self.state.update_projectile(id, |p| {
                p.position = new_position;
                p.distance_traveled = new_distance;
            });
            self.grid.update(&projectile_key(id), new_position, radius);
        }
    }

    /// Steps 6-7: broad+narrow phase, then separations, hits, pickups
    fn resolve_collisions(&mut self, now: u64) {
        let mut colliders: Vec<Collider> = Vec::new();

        for p in self.state.players.values().filter(|p| p.alive) {
            colliders.push(Collider {
                id: player_key(&p.id),
                position: p.position,
                radius: PLAYER_RADIUS,
                layer: Layer::Player,
                owner: None,
            });
        }
        for p in self.state.projectiles.values() {
            colliders.push(Collider {
                id: projectile_key(p.id),
                position: p.position,
                radius: p.radius,
                layer: Layer::Projectile,
                owner: Some(player_key(&p.owner_id)),
            });
        }
        for p in self.state.power_ups.values().filter(|p| p.active) {
            colliders.push(Collider {
                id: power_up_key(p.id),
                position: p.position,
                radius: POWERUP_RADIUS,
                layer: Layer::PowerUp,
                owner: None,
            });
        }

        let collisions = CollisionResolver::detect(&self.grid, &colliders);

        for collision in collisions {
            let (Some(a), Some(b)) = (parse_key(&collision.a), parse_key(&collision.b)) else {
                continue;
            };
            match (a, b) {
                (EntityRef::Player(pa), EntityRef::Player(pb)) => {
                    self.separate_players(&pa, &pb, &collision, now);
                }
                (EntityRef::Player(player), EntityRef::Projectile(projectile))
                | (EntityRef::Projectile(projectile), EntityRef::Player(player)) => {
                    if CombatSystem::resolve_projectile_hit(
                        &mut self.state,
                        projectile,
                        &player,
                        collision.point,
                        now,
                        &mut self.rng,
                    ) {
                        self.grid.remove(&projectile_key(projectile));
                    }
                }
                (EntityRef::Player(player), EntityRef::PowerUp(power_up))
                | (EntityRef::PowerUp(power_up), EntityRef::Player(player)) => {
                    self.collect_power_up(&player, power_up, now);
                }
                _ => {}
            }
        }
    }

    fn separate_players(
        &mut self,
        a: &str,
        b: &str,
        collision: &super::collision::Collision,
        now: u64,
    ) {
        let (Some(pa), Some(pb)) = (self.state.players.get(a), self.state.players.get(b)) else {
            return;
        };
        if !pa.alive || !pb.alive {
            return;
        }

        let bounds = self.state.bounds;
        let (new_a, new_b) =
            CollisionResolver::separate(pa.position, pb.position, collision, &bounds, PLAYER_RADIUS);

        self.state.update_player(a, now, |p| p.position = new_a);
        self.state.update_player(b, now, |p| p.position = new_b);
        self.grid.update(&player_key(a), new_a, PLAYER_RADIUS);
        self.grid.update(&player_key(b), new_b, PLAYER_RADIUS);
    }

    fn collect_power_up(&mut self, player_id: &str, power_up_id: Uuid, now: u64) {
        let Some(power_up) = self.state.power_ups.get(&power_up_id) else {
            return;
        };
        if !power_up.active {
            return;
        }
        let (kind, magnitude, duration) =
            (power_up.kind, power_up.magnitude, power_up.duration_ms);

        self.state.update_player(player_id, now, |p| match kind {
            PowerUpKind::HealthPack => {
                p.heal(magnitude as u32);
            }
            _ => p.apply_effect(kind, magnitude, now + duration),
        });
        self.state
            .update_power_up(power_up_id, |p| p.consume(now));
        self.state.push_event(GameEventPayload::PowerUpCollected {
            player_id: player_id.to_string(),
            kind,
        });
    }

    /// Step 8: status timers, effect expiry, regen, power-up respawns
    fn advance_timers(&mut self, now: u64) {
        let regen_due = now.saturating_sub(self.last_regen_at) >= REGEN_INTERVAL_MS;
        if regen_due {
            self.last_regen_at = now;
        }
        let regen_delay = self.settings.regen_delay_ms;
        let prev_now = self.last_now;

        let ids: Vec<String> = self.state.players.keys().cloned().collect();
        for id in ids {
            // emits blocking/invulnerable/casting transitions as deltas
            self.state.refresh_status(&id, prev_now, now);
            self.state.update_player(&id, now, |p| {
                p.clear_expired_effects(now);
                if regen_due && p.can_regen(now, regen_delay) {
                    p.stamina = (p.stamina + STAMINA_REGEN).min(p.max_stamina);
                    p.mana = (p.mana + MANA_REGEN).min(p.max_mana);
                }
            });
        }

        let power_up_ids: Vec<Uuid> = self.state.power_ups.keys().copied().collect();
        for id in power_up_ids {
            self.state.update_power_up(id, |p| {
                p.try_respawn(now);
            });
        }
    }

    /// Step 9: win, score, and time conditions
    fn check_end_conditions(&mut self, now: u64) {
        if self.state.status != MatchStatus::Active {
            return;
        }
        let Some(started_at) = self.state.started_at else {
            return;
        };
        self.state.match_time_ms = now.saturating_sub(started_at);

        let alive = self.state.alive_count();
        let last_standing = alive <= 1;
        let score_reached = self.state.top_score() >= self.state.score_limit;
        let timed_out = self.state.match_time_ms >= self.state.time_limit_ms;

        if !(last_standing || score_reached || timed_out) {
            return;
        }

        let winner = if last_standing {
            self.state
                .players
                .values()
                .find(|p| p.alive)
                .map(|p| p.id.clone())
        } else {
            self.state
                .players
                .values()
                .max_by_key(|p| p.kills)
                .map(|p| p.id.clone())
        };

        self.state.set_status(MatchStatus::Finished);
        self.finished_at = Some(now);
        let stats = self.build_stats(now);
        self.state.push_event(GameEventPayload::MatchFinished {
            winner: winner.clone(),
            stats,
        });

        if let Some(tx) = &self.outcome_tx {
            let losers = self
                .state
                .players
                .values()
                .filter(|p| Some(&p.id) != winner.as_ref())
                .map(|p| p.id.clone())
                .collect();
            let _ = tx.try_send(MatchOutcome {
                match_id: self.state.id.clone(),
                winner: winner.clone(),
                losers,
            });
        }

        info!(
            match_id = %self.state.id,
            winner = winner.as_deref().unwrap_or("none"),
            duration_ms = self.state.match_time_ms,
            "match finished"
        );
    }

    fn build_stats(&self, now: u64) -> MatchStatsView {
        let mut players: Vec<PlayerMatchStats> = self
            .state
            .players
            .values()
            .map(|p| PlayerMatchStats {
                player_id: p.id.clone(),
                kills: p.kills,
                deaths: p.deaths,
                damage_dealt: p.damage_dealt,
                damage_taken: p.damage_taken,
                placement: 0,
            })
            .collect();

        players.sort_by(|a, b| b.kills.cmp(&a.kills).then(a.deaths.cmp(&b.deaths)));
        for (i, stats) in players.iter_mut().enumerate() {
            stats.placement = (i + 1) as u32;
        }

        MatchStatsView {
            duration_ms: self
                .state
                .started_at
                .map(|s| now.saturating_sub(s))
                .unwrap_or(0),
            players,
        }
    }

    // ------------------------------------------------------------------
    // Step 10: commit
    // ------------------------------------------------------------------

    fn commit(&mut self, now: u64) {
        self.state.tick += 1;
        self.state.last_tick = now;

        let deltas = self.state.drain_deltas();
        if !deltas.is_empty() {
            let msg = encode_delta_msg(&self.state.id, self.state.tick, now, deltas);
            self.broadcaster.broadcast(&msg);
            self.spectators.forward(&msg);
        }

        if self.broadcaster.keyframe_due(now) {
            let msg = ServerMsg::StateFull {
                match_id: self.state.id.clone(),
                tick: self.state.tick,
                ts: now,
                snapshot: self.state.snapshot(now),
            };
            self.broadcaster.broadcast(&msg);
            self.spectators.forward(&msg);
        }

        // replay sampling; the ring enforces the interval floor again
        if self.state.status == MatchStatus::Active
            && now.saturating_sub(self.last_replay_at) >= self.settings.snapshot_interval_ms
        {
            self.last_replay_at = now;
            let snapshot = self.state.snapshot(now);
            self.spectators.record_snapshot(snapshot, now);
        }

        if now.saturating_sub(self.last_sweep_at) >= REPLAY_SWEEP_INTERVAL_MS {
            self.last_sweep_at = now;
            self.spectators.sweep_replay(now);
        }
    }

    /// Post-tick invariant scan: finite in-bounds positions, alive flag
    /// consistent with health
    fn invariants_hold(&self) -> bool {
        self.state.players.values().all(|p| {
            p.position.is_finite()
                && self.state.bounds.contains(p.position, PLAYER_RADIUS)
                && p.alive == (p.health > 0)
        })
    }

    /// Empty-match and finished-match reaping
    fn should_reap(&mut self, now: u64) -> bool {
        if self.state.players.is_empty() {
            match self.empty_since {
                None => self.empty_since = Some(now),
                Some(since) if now.saturating_sub(since) >= self.settings.empty_match_reap_ms => {
                    info!(match_id = %self.state.id, "reaping empty match");
                    return true;
                }
                Some(_) => {}
            }
        } else {
            self.empty_since = None;
        }

        if let Some(finished) = self.finished_at {
            if now.saturating_sub(finished) >= self.settings.empty_match_reap_ms {
                info!(match_id = %self.state.id, "reaping finished match");
                return true;
            }
        }
        false
    }
}
