//! Match state - entity maps and the write-through delta log
//!
//! Every mutation goes through a setter helper that records the change in
//! the tick's delta queue, so a committed batch replays exactly onto the
//! previous tick's state.

use std::collections::HashMap;

use uuid::Uuid;

use crate::ws::protocol::{
    Delta, GameEventPayload, MatchSnapshot, MatchStatus, PlayerChanges, PlayerView, PowerUpView,
    ProjectileChanges, ProjectileView,
};

use super::combat::Projectile;
use super::world::{Player, PowerUp, WorldBounds};

/// Authoritative per-match state (owned by the match task)
pub struct MatchState {
    pub id: String,
    pub status: MatchStatus,
    pub players: HashMap<String, Player>,
    pub projectiles: HashMap<Uuid, Projectile>,
    pub power_ups: HashMap<Uuid, PowerUp>,
    pub bounds: WorldBounds,
    pub tick: u64,
    pub started_at: Option<u64>,
    pub last_tick: u64,
    pub score_limit: u32,
    pub time_limit_ms: u64,
    pub match_time_ms: u64,
    deltas: Vec<Delta>,
}

impl MatchState {
    pub fn new(id: String, bounds: WorldBounds, score_limit: u32, time_limit_ms: u64) -> Self {
        Self {
            id,
            status: MatchStatus::Waiting,
            players: HashMap::new(),
            projectiles: HashMap::new(),
            power_ups: HashMap::new(),
            bounds,
            tick: 0,
            started_at: None,
            last_tick: 0,
            score_limit,
            time_limit_ms,
            match_time_ms: 0,
            deltas: Vec::new(),
        }
    }

    pub fn alive_count(&self) -> usize {
        self.players.values().filter(|p| p.alive).count()
    }

    pub fn top_score(&self) -> u32 {
        self.players.values().map(|p| p.kills).max().unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Write-through mutation API
    // ------------------------------------------------------------------

    pub fn add_player(&mut self, player: Player) {
        let view = player_view(&player, self.last_tick);
        self.players.insert(player.id.clone(), player);
        self.deltas.push(Delta::PlayerJoined { player: view });
    }

    pub fn remove_player(&mut self, id: &str) -> Option<Player> {
        let removed = self.players.remove(id);
        if removed.is_some() {
            self.deltas.push(Delta::PlayerLeft { id: id.to_string() });
        }
        removed
    }

    /// Mutate a player through a closure; the wire-visible field diff is
    /// computed at mutation time and queued as a `player_updated` record.
    pub fn update_player<F>(&mut self, id: &str, now: u64, mutate: F) -> bool
    where
        F: FnOnce(&mut Player),
    {
        let Some(player) = self.players.get_mut(id) else {
            return false;
        };

        let before = player_view(player, now);
        mutate(player);
        let after = player_view(player, now);

        let changes = diff_player(&before, &after);
        if !changes.is_empty() {
            self.deltas.push(Delta::PlayerUpdated {
                id: id.to_string(),
                changes,
            });
        }
        true
    }

    pub fn spawn_projectile(&mut self, projectile: Projectile) {
        self.deltas.push(Delta::ProjectileCreated {
            projectile: projectile_view(&projectile),
        });
        self.projectiles.insert(projectile.id, projectile);
    }

    pub fn update_projectile<F>(&mut self, id: Uuid, mutate: F) -> bool
    where
        F: FnOnce(&mut Projectile),
    {
        let Some(projectile) = self.projectiles.get_mut(&id) else {
            return false;
        };

        let before = (projectile.position, projectile.distance_traveled);
        mutate(projectile);

        let mut changes = ProjectileChanges::default();
        if projectile.position != before.0 {
            changes.position = Some(projectile.position);
        }
        if projectile.distance_traveled != before.1 {
            changes.distance_traveled = Some(projectile.distance_traveled);
        }
        if !changes.is_empty() {
            self.deltas.push(Delta::ProjectileUpdated { id, changes });
        }
        true
    }

    pub fn destroy_projectile(&mut self, id: Uuid) -> Option<Projectile> {
        let removed = self.projectiles.remove(&id);
        if removed.is_some() {
            self.deltas.push(Delta::ProjectileDestroyed { id });
        }
        removed
    }

    pub fn add_power_up(&mut self, power_up: PowerUp) {
        self.deltas.push(Delta::PowerUpState {
            power_up: power_up_view(&power_up),
        });
        self.power_ups.insert(power_up.id, power_up);
    }

    /// Mutate a power-up and queue its new state when `active` flips
    pub fn update_power_up<F>(&mut self, id: Uuid, mutate: F) -> bool
    where
        F: FnOnce(&mut PowerUp),
    {
        let Some(power_up) = self.power_ups.get_mut(&id) else {
            return false;
        };

        let was_active = power_up.active;
        mutate(power_up);
        if power_up.active != was_active {
            let view = power_up_view(power_up);
            self.deltas.push(Delta::PowerUpState { power_up: view });
        }
        true
    }

    pub fn push_event(&mut self, event: GameEventPayload) {
        self.deltas.push(Delta::GameEvent { event });
    }

    /// Emit the wire-visible transitions caused purely by time passing
    /// (status flags expiring between `prev_now` and `now`).
    pub fn refresh_status(&mut self, id: &str, prev_now: u64, now: u64) {
        let Some(player) = self.players.get(id) else {
            return;
        };

        let before = player_view(player, prev_now);
        let after = player_view(player, now);
        let changes = diff_player(&before, &after);
        if !changes.is_empty() {
            self.deltas.push(Delta::PlayerUpdated {
                id: id.to_string(),
                changes,
            });
        }
    }

    pub fn set_status(&mut self, status: MatchStatus) {
        self.status = status;
    }

    // ------------------------------------------------------------------
    // Delta commit
    // ------------------------------------------------------------------

    /// Harvest the tick's delta queue, compacted: update records merged per
    /// entity (later field write wins), create/destroy/event records kept
    /// unmerged in their original order relative to the first update.
    pub fn drain_deltas(&mut self) -> Vec<Delta> {
        let raw = std::mem::take(&mut self.deltas);
        compact(raw)
    }

    pub fn has_pending_deltas(&self) -> bool {
        !self.deltas.is_empty()
    }

    /// Full snapshot of the current state (keyframes, replay entries)
    pub fn snapshot(&self, now: u64) -> MatchSnapshot {
        let mut players: Vec<PlayerView> =
            self.players.values().map(|p| player_view(p, now)).collect();
        players.sort_by(|a, b| a.id.cmp(&b.id));

        let mut projectiles: Vec<ProjectileView> =
            self.projectiles.values().map(projectile_view).collect();
        projectiles.sort_by_key(|p| p.id);

        let mut power_ups: Vec<PowerUpView> =
            self.power_ups.values().map(power_up_view).collect();
        power_ups.sort_by_key(|p| p.id);

        let score = self
            .players
            .values()
            .map(|p| (p.id.clone(), p.kills))
            .collect();

        MatchSnapshot {
            status: self.status,
            players,
            projectiles,
            power_ups,
            score,
            match_time_ms: self.match_time_ms,
        }
    }
}

/// Project a player onto its wire view
pub fn player_view(player: &Player, now: u64) -> PlayerView {
    PlayerView {
        id: player.id.clone(),
        user_id: player.user_id.clone(),
        position: player.position,
        velocity: player.velocity,
        health: player.health,
        max_health: player.max_health,
        mana: player.mana,
        stamina: player.stamina,
        alive: player.alive,
        weapon: player.weapon,
        blocking: player.status.is_blocking(now),
        invulnerable: player.status.is_invulnerable(now),
        casting: player.status.is_casting(now),
        kills: player.kills,
        deaths: player.deaths,
    }
}

pub fn projectile_view(projectile: &Projectile) -> ProjectileView {
    ProjectileView {
        id: projectile.id,
        owner_id: projectile.owner_id.clone(),
        position: projectile.position,
        velocity: projectile.velocity,
        radius: projectile.radius,
        weapon: projectile.weapon,
    }
}

pub fn power_up_view(power_up: &PowerUp) -> PowerUpView {
    PowerUpView {
        id: power_up.id,
        kind: power_up.kind,
        position: power_up.position,
        active: power_up.active,
    }
}

/// Field-level diff of two player views
fn diff_player(before: &PlayerView, after: &PlayerView) -> PlayerChanges {
    let mut changes = PlayerChanges::default();
    if before.position != after.position {
        changes.position = Some(after.position);
    }
    if before.velocity != after.velocity {
        changes.velocity = Some(after.velocity);
    }
    if before.health != after.health {
        changes.health = Some(after.health);
    }
    if before.mana != after.mana {
        changes.mana = Some(after.mana);
    }
    if before.stamina != after.stamina {
        changes.stamina = Some(after.stamina);
    }
    if before.alive != after.alive {
        changes.alive = Some(after.alive);
    }
    if before.blocking != after.blocking {
        changes.blocking = Some(after.blocking);
    }
    if before.invulnerable != after.invulnerable {
        changes.invulnerable = Some(after.invulnerable);
    }
    if before.casting != after.casting {
        changes.casting = Some(after.casting);
    }
    if before.kills != after.kills {
        changes.kills = Some(after.kills);
    }
    if before.deaths != after.deaths {
        changes.deaths = Some(after.deaths);
    }
    changes
}

/// Merge update records per entity id. A create or destroy record for an
/// entity closes its merge slot so later updates never merge across it.
fn compact(raw: Vec<Delta>) -> Vec<Delta> {
    let mut out: Vec<Delta> = Vec::with_capacity(raw.len());
    let mut player_slot: HashMap<String, usize> = HashMap::new();
    let mut projectile_slot: HashMap<Uuid, usize> = HashMap::new();

    for delta in raw {
        match delta {
            Delta::PlayerUpdated { id, changes } => match player_slot.get(&id) {
                Some(&slot) => {
                    if let Delta::PlayerUpdated {
                        changes: existing, ..
                    } = &mut out[slot]
                    {
                        existing.merge(changes);
                    }
                }
                None => {
                    player_slot.insert(id.clone(), out.len());
                    out.push(Delta::PlayerUpdated { id, changes });
                }
            },
            Delta::ProjectileUpdated { id, changes } => match projectile_slot.get(&id) {
                Some(&slot) => {
                    if let Delta::ProjectileUpdated {
                        changes: existing, ..
                    } = &mut out[slot]
                    {
                        existing.merge(changes);
                    }
                }
                None => {
                    projectile_slot.insert(id, out.len());
                    out.push(Delta::ProjectileUpdated { id, changes });
                }
            },
            Delta::PlayerJoined { player } => {
                player_slot.remove(&player.id);
                out.push(Delta::PlayerJoined { player });
            }
            Delta::PlayerLeft { id } => {
                player_slot.remove(&id);
                out.push(Delta::PlayerLeft { id });
            }
            Delta::ProjectileCreated { projectile } => {
                projectile_slot.remove(&projectile.id);
                out.push(Delta::ProjectileCreated { projectile });
            }
            Delta::ProjectileDestroyed { id } => {
                projectile_slot.remove(&id);
                out.push(Delta::ProjectileDestroyed { id });
            }
            other => out.push(other),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::world::{Vec2, WorldBounds};

    fn state() -> MatchState {
        MatchState::new(
            "m1".into(),
            WorldBounds::new(1000.0, 1000.0),
            20,
            600_000,
        )
    }

    fn add_test_player(state: &mut MatchState, id: &str) {
        let player = Player::new(
            id.to_string(),
            format!("user_{id}"),
            Vec2::new(500.0, 500.0),
            1200.0,
            0,
        );
        state.add_player(player);
    }

    #[test]
    fn update_records_only_changed_fields() {
        let mut s = state();
        add_test_player(&mut s, "p1");
        s.drain_deltas();

        s.update_player("p1", 0, |p| {
            p.position = Vec2::new(510.0, 500.0);
        });

        let deltas = s.drain_deltas();
        assert_eq!(deltas.len(), 1);
        match &deltas[0] {
            Delta::PlayerUpdated { id, changes } => {
                assert_eq!(id, "p1");
                assert_eq!(changes.position, Some(Vec2::new(510.0, 500.0)));
                assert!(changes.health.is_none());
                assert!(changes.velocity.is_none());
            }
            other => panic!("unexpected delta: {:?}", other),
        }
    }

    #[test]
    fn no_op_mutation_emits_nothing() {
        let mut s = state();
        add_test_player(&mut s, "p1");
        s.drain_deltas();

        s.update_player("p1", 0, |_| {});
        assert!(s.drain_deltas().is_empty());
    }

    #[test]
    fn same_tick_updates_compact_to_one_record() {
        let mut s = state();
        add_test_player(&mut s, "p1");
        s.drain_deltas();

        // two moves and a hit inside one tick
        s.update_player("p1", 0, |p| p.position = Vec2::new(510.0, 500.0));
        s.update_player("p1", 0, |p| p.position = Vec2::new(520.0, 500.0));
        s.update_player("p1", 10, |p| {
            p.take_damage(20, 10);
        });

        let deltas = s.drain_deltas();
        assert_eq!(deltas.len(), 1);
        match &deltas[0] {
            Delta::PlayerUpdated { changes, .. } => {
                assert_eq!(changes.position, Some(Vec2::new(520.0, 500.0)));
                assert_eq!(changes.health, Some(80));
            }
            other => panic!("unexpected delta: {:?}", other),
        }
    }

    #[test]
    fn destroy_closes_the_merge_slot() {
        let mut s = state();
        add_test_player(&mut s, "owner");
        s.drain_deltas();

        let projectile = Projectile::test_fixture("owner", Vec2::new(100.0, 100.0));
        let pid = projectile.id;
        s.spawn_projectile(projectile);
        s.update_projectile(pid, |p| p.position = Vec2::new(110.0, 100.0));
        s.destroy_projectile(pid);

        let deltas = s.drain_deltas();
        let kinds: Vec<&str> = deltas
            .iter()
            .map(|d| match d {
                Delta::ProjectileCreated { .. } => "created",
                Delta::ProjectileUpdated { .. } => "updated",
                Delta::ProjectileDestroyed { .. } => "destroyed",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["created", "updated", "destroyed"]);
    }

    #[test]
    fn applying_deltas_reproduces_snapshot() {
        // fold a tick's batch onto the prior snapshot and compare
        let mut s = state();
        add_test_player(&mut s, "p1");
        add_test_player(&mut s, "p2");
        s.drain_deltas();
        let before = s.snapshot(0);

        s.update_player("p1", 0, |p| {
            p.position = Vec2::new(600.0, 400.0);
            p.velocity = Vec2::new(50.0, -20.0);
        });
        s.update_player("p2", 5, |p| {
            p.take_damage(30, 5);
        });
        let deltas = s.drain_deltas();
        let after = s.snapshot(5);

        let mut replayed = before;
        for delta in &deltas {
            if let Delta::PlayerUpdated { id, changes } = delta {
                let view = replayed.players.iter_mut().find(|p| &p.id == id).unwrap();
                if let Some(v) = changes.position {
                    view.position = v;
                }
                if let Some(v) = changes.velocity {
                    view.velocity = v;
                }
                if let Some(v) = changes.health {
                    view.health = v;
                }
                if let Some(v) = changes.alive {
                    view.alive = v;
                }
            }
        }
        assert_eq!(replayed.players, after.players);
    }
}
