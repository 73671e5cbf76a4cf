//! World primitives - vectors, bounds, players, weapons, power-ups

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Player hitbox radius
pub const PLAYER_RADIUS: f64 = 20.0;

/// Velocity components below this are zeroed after friction
pub const VELOCITY_EPSILON: f64 = 0.01;

/// Defender damage reduction is capped here regardless of stacked shields
pub const MAX_DAMAGE_REDUCTION: f64 = 0.8;

/// 2D vector (positions, velocities)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn add(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x + other.x, self.y + other.y)
    }

    pub fn sub(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x - other.x, self.y - other.y)
    }

    pub fn scale(self, k: f64) -> Vec2 {
        Vec2::new(self.x * k, self.y * k)
    }

    pub fn length_sq(self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    pub fn length(self) -> f64 {
        self.length_sq().sqrt()
    }

    pub fn distance(self, other: Vec2) -> f64 {
        self.sub(other).length()
    }

    /// Unit vector, or zero when the length is degenerate
    pub fn normalized_or_zero(self) -> Vec2 {
        let len = self.length();
        if len < 1e-9 {
            Vec2::ZERO
        } else {
            self.scale(1.0 / len)
        }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Axis-aligned rectangle used for grid queries and AABB tests
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Rect covering a circle
    pub fn around(center: Vec2, radius: f64) -> Self {
        Self {
            min: Vec2::new(center.x - radius, center.y - radius),
            max: Vec2::new(center.x + radius, center.y + radius),
        }
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    /// Closest point on the rect to `p` (for circle-AABB tests)
    pub fn closest_point(&self, p: Vec2) -> Vec2 {
        Vec2::new(
            p.x.clamp(self.min.x, self.max.x),
            p.y.clamp(self.min.y, self.max.y),
        )
    }
}

/// Arena rectangle `[0, W] x [0, H]` with entity-radius insets
#[derive(Debug, Clone, Copy)]
pub struct WorldBounds {
    pub width: f64,
    pub height: f64,
}

impl WorldBounds {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Clamp a position so the full entity circle stays inside.
    /// Returns the clamped position plus which axes were clamped, so the
    /// integrator can zero the velocity component that drove the clamp.
    pub fn clamp(&self, pos: Vec2, radius: f64) -> (Vec2, bool, bool) {
        let cx = pos.x.clamp(radius, self.width - radius);
        let cy = pos.y.clamp(radius, self.height - radius);
        (Vec2::new(cx, cy), cx != pos.x, cy != pos.y)
    }

    pub fn contains(&self, pos: Vec2, radius: f64) -> bool {
        pos.x >= radius
            && pos.x <= self.width - radius
            && pos.y >= radius
            && pos.y <= self.height - radius
    }

    pub fn as_rect(&self) -> Rect {
        Rect::new(Vec2::ZERO, Vec2::new(self.width, self.height))
    }

    /// Uniformly random spawn point respecting the inset
    pub fn random_spawn<R: Rng>(&self, rng: &mut R, radius: f64) -> Vec2 {
        Vec2::new(
            rng.gen_range(radius..self.width - radius),
            rng.gen_range(radius..self.height - radius),
        )
    }
}

/// Weapon archetypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaponKind {
    Pistol,
    Rifle,
    Shotgun,
    Sniper,
}

impl Default for WeaponKind {
    fn default() -> Self {
        Self::Pistol
    }
}

/// Weapon stats per archetype
#[derive(Debug, Clone, Copy)]
pub struct WeaponStats {
    /// Base damage per hit
    pub damage: u32,
    /// Range with no damage falloff
    pub effective_range: f64,
    /// Cooldown between attacks (ms)
    pub cooldown_ms: u64,
    /// Projectile travel speed (units/s)
    pub projectile_speed: f64,
    /// Projectile hitbox radius
    pub projectile_radius: f64,
    /// Hard travel cap before the projectile despawns
    pub projectile_range: f64,
    pub damage_type: DamageType,
}

impl WeaponStats {
    pub fn for_kind(kind: WeaponKind) -> Self {
        match kind {
            WeaponKind::Pistol => Self {
                damage: 12,
                effective_range: 300.0,
                cooldown_ms: 400,
                projectile_speed: 700.0,
                projectile_radius: 4.0,
                projectile_range: 600.0,
                damage_type: DamageType::Physical,
            },
            WeaponKind::Rifle => Self {
                damage: 20,
                effective_range: 500.0,
                cooldown_ms: 650,
                projectile_speed: 900.0,
                projectile_radius: 4.0,
                projectile_range: 1000.0,
                damage_type: DamageType::Physical,
            },
            WeaponKind::Shotgun => Self {
                damage: 32,
                effective_range: 150.0,
                cooldown_ms: 900,
                projectile_speed: 550.0,
                projectile_radius: 8.0,
                projectile_range: 300.0,
                damage_type: DamageType::Physical,
            },
            WeaponKind::Sniper => Self {
                damage: 45,
                effective_range: 900.0,
                cooldown_ms: 1500,
                projectile_speed: 1400.0,
                projectile_radius: 3.0,
                projectile_range: 1800.0,
                damage_type: DamageType::Physical,
            },
        }
    }
}

/// Damage channels - armor reduces physical, magic resist reduces magic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageType {
    Physical,
    Magic,
}

/// Castable abilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ability {
    Fireball,
    Heal,
    Shockwave,
}

/// Ability tuning per kind
#[derive(Debug, Clone, Copy)]
pub struct AbilityStats {
    pub mana_cost: u32,
    pub cooldown_ms: u64,
    /// Damage for offensive casts, heal amount for heal
    pub magnitude: u32,
    /// Cast range (projectile range or area radius)
    pub range: f64,
}

impl AbilityStats {
    pub fn for_kind(ability: Ability) -> Self {
        match ability {
            Ability::Fireball => Self {
                mana_cost: 25,
                cooldown_ms: 2_000,
                magnitude: 35,
                range: 800.0,
            },
            Ability::Heal => Self {
                mana_cost: 30,
                cooldown_ms: 5_000,
                magnitude: 40,
                range: 0.0,
            },
            Ability::Shockwave => Self {
                mana_cost: 40,
                cooldown_ms: 6_000,
                magnitude: 25,
                range: 150.0,
            },
        }
    }
}

/// Power-up archetypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerUpKind {
    SpeedBoost,
    DamageBoost,
    HealthPack,
    Shield,
    RapidFire,
}

impl PowerUpKind {
    /// Effect magnitude per kind (interpretation depends on the kind)
    pub fn magnitude(self) -> f64 {
        match self {
            PowerUpKind::SpeedBoost => 0.5,  // +50% velocity
            PowerUpKind::DamageBoost => 0.5, // +50% damage
            PowerUpKind::HealthPack => 50.0, // instant heal
            PowerUpKind::Shield => 0.4,      // 40% damage reduction
            PowerUpKind::RapidFire => 0.5,   // -50% attack cooldown
        }
    }

    pub fn duration_ms(self) -> u64 {
        match self {
            PowerUpKind::HealthPack => 0, // instant
            _ => 10_000,
        }
    }
}

/// Pickup placed in the arena, cycling active -> consumed -> respawned
#[derive(Debug, Clone)]
pub struct PowerUp {
    pub id: Uuid,
    pub kind: PowerUpKind,
    pub position: Vec2,
    pub active: bool,
    /// When the pickup last (re)entered the world, or was consumed
    pub spawn_time: u64,
    pub duration_ms: u64,
    pub magnitude: f64,
    pub respawn_delay_ms: u64,
}

/// Pickup collision radius
pub const POWERUP_RADIUS: f64 = 15.0;

impl PowerUp {
    pub fn new(kind: PowerUpKind, position: Vec2, now: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            position,
            active: true,
            spawn_time: now,
            duration_ms: kind.duration_ms(),
            magnitude: kind.magnitude(),
            respawn_delay_ms: 15_000,
        }
    }

    /// Consume the pickup; starts the respawn clock
    pub fn consume(&mut self, now: u64) {
        self.active = false;
        self.spawn_time = now;
    }

    /// Reactivate exactly once after the respawn delay elapses
    pub fn try_respawn(&mut self, now: u64) -> bool {
        if !self.active && now.saturating_sub(self.spawn_time) >= self.respawn_delay_ms {
            self.active = true;
            self.spawn_time = now;
            true
        } else {
            false
        }
    }
}

/// Timed effect applied to a player by a pickup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerUpEffect {
    pub modifier: f64,
    pub end_time: u64,
}

/// Combat stats block
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub attack: u32,
    pub armor: u32,
    pub magic_resist: u32,
    pub critical_chance: f64,
    pub accuracy: f64,
}

impl Default for PlayerStats {
    fn default() -> Self {
        Self {
            attack: 10,
            armor: 5,
            magic_resist: 5,
            critical_chance: 0.05,
            accuracy: 0.5,
        }
    }
}

/// Timed status flags; a flag holds until its end timestamp passes
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatusFlags {
    pub blocking_until: u64,
    pub invulnerable_until: u64,
    pub casting_until: u64,
}

impl StatusFlags {
    pub fn is_blocking(&self, now: u64) -> bool {
        now < self.blocking_until
    }

    pub fn is_invulnerable(&self, now: u64) -> bool {
        now < self.invulnerable_until
    }

    pub fn is_casting(&self, now: u64) -> bool {
        now < self.casting_until
    }

    pub fn any_active(&self, now: u64) -> bool {
        self.is_blocking(now) || self.is_invulnerable(now) || self.is_casting(now)
    }
}

/// Cooldown timestamps; monotonic per player
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Cooldowns {
    pub last_attack: u64,
    pub last_block: u64,
    pub last_dodge: u64,
    pub last_cast: u64,
    pub last_damage: u64,
}

/// Authoritative player state
#[derive(Debug, Clone)]
pub struct Player {
    pub id: String,
    pub user_id: String,
    pub position: Vec2,
    pub velocity: Vec2,
    pub health: u32,
    pub max_health: u32,
    pub mana: u32,
    pub max_mana: u32,
    pub stamina: u32,
    pub max_stamina: u32,
    pub alive: bool,
    pub weapon: WeaponKind,
    pub weapon_proficiency: u32,
    pub stats: PlayerStats,
    pub status: StatusFlags,
    pub cooldowns: Cooldowns,
    pub selected_ability: Ability,
    pub effects: std::collections::HashMap<PowerUpKind, PowerUpEffect>,
    pub rating: f64,
    pub joined_at: u64,
    pub kills: u32,
    pub deaths: u32,
    pub damage_dealt: u64,
    pub damage_taken: u64,
}

impl Player {
    pub fn new(id: String, user_id: String, spawn: Vec2, rating: f64, now: u64) -> Self {
        Self {
            id,
            user_id,
            position: spawn,
            velocity: Vec2::ZERO,
            health: 100,
            max_health: 100,
            mana: 100,
            max_mana: 100,
            stamina: 100,
            max_stamina: 100,
            alive: true,
            weapon: WeaponKind::default(),
            weapon_proficiency: 0,
            stats: PlayerStats::default(),
            status: StatusFlags::default(),
            cooldowns: Cooldowns::default(),
            selected_ability: Ability::Fireball,
            effects: std::collections::HashMap::new(),
            rating,
            joined_at: now,
            kills: 0,
            deaths: 0,
            damage_dealt: 0,
            damage_taken: 0,
        }
    }

    /// Apply raw damage to health, keeping `alive <=> health > 0`.
    /// Returns the amount actually absorbed.
    pub fn take_damage(&mut self, amount: u32, now: u64) -> u32 {
        let applied = amount.min(self.health);
        self.health -= applied;
        self.alive = self.health > 0;
        self.cooldowns.last_damage = now;
        self.damage_taken += u64::from(applied);
        applied
    }

    pub fn heal(&mut self, amount: u32) -> u32 {
        let applied = amount.min(self.max_health - self.health);
        self.health += applied;
        if self.health > 0 {
            self.alive = true;
        }
        applied
    }

    /// Additive damage-boost multiplier from active pickups
    pub fn damage_boost(&self, now: u64) -> f64 {
        self.effects
            .get(&PowerUpKind::DamageBoost)
            .filter(|e| now < e.end_time)
            .map(|e| e.modifier)
            .unwrap_or(0.0)
    }

    /// Incoming-damage reduction from shields, capped
    pub fn damage_reduction(&self, now: u64) -> f64 {
        let shield = self
            .effects
            .get(&PowerUpKind::Shield)
            .filter(|e| now < e.end_time)
            .map(|e| e.modifier)
            .unwrap_or(0.0);
        shield.min(MAX_DAMAGE_REDUCTION)
    }

    /// Velocity multiplier from speed boosts
    pub fn speed_multiplier(&self, now: u64) -> f64 {
        1.0 + self
            .effects
            .get(&PowerUpKind::SpeedBoost)
            .filter(|e| now < e.end_time)
            .map(|e| e.modifier)
            .unwrap_or(0.0)
    }

    /// Attack cooldown scale from rapid-fire (0.5 = half cooldown)
    pub fn cooldown_scale(&self, now: u64) -> f64 {
        1.0 - self
            .effects
            .get(&PowerUpKind::RapidFire)
            .filter(|e| now < e.end_time)
            .map(|e| e.modifier)
            .unwrap_or(0.0)
    }

    pub fn apply_effect(&mut self, kind: PowerUpKind, modifier: f64, end_time: u64) {
        self.effects
            .insert(kind, PowerUpEffect { modifier, end_time });
    }

    /// Drop expired effects; returns true if anything was removed
    pub fn clear_expired_effects(&mut self, now: u64) -> bool {
        let before = self.effects.len();
        self.effects.retain(|_, e| now < e.end_time);
        self.effects.len() != before
    }

    /// Resource regen is gated on not having been hit recently
    pub fn can_regen(&self, now: u64, regen_delay_ms: u64) -> bool {
        self.alive && now.saturating_sub(self.cooldowns.last_damage) > regen_delay_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn bounds_clamp_reports_clamped_axes() {
        let bounds = WorldBounds::new(1000.0, 800.0);
        let (pos, cx, cy) = bounds.clamp(Vec2::new(-50.0, 400.0), 20.0);
        assert_eq!(pos, Vec2::new(20.0, 400.0));
        assert!(cx);
        assert!(!cy);
    }

    #[test]
    fn random_spawn_respects_inset() {
        let bounds = WorldBounds::new(500.0, 500.0);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..100 {
            let spawn = bounds.random_spawn(&mut rng, 20.0);
            assert!(bounds.contains(spawn, 20.0));
        }
    }

    #[test]
    fn alive_tracks_health() {
        let mut p = Player::new("p1".into(), "u1".into(), Vec2::new(100.0, 100.0), 1200.0, 0);
        p.take_damage(99, 10);
        assert!(p.alive);
        p.take_damage(5, 20);
        assert_eq!(p.health, 0);
        assert!(!p.alive);
        p.heal(30);
        assert!(p.alive);
        assert_eq!(p.health, 30);
    }

    #[test]
    fn powerup_respawns_exactly_once_after_delay() {
        let mut pu = PowerUp::new(PowerUpKind::Shield, Vec2::new(50.0, 50.0), 1_000);
        pu.consume(2_000);
        assert!(!pu.active);
        assert!(!pu.try_respawn(2_000 + pu.respawn_delay_ms - 1));
        assert!(pu.try_respawn(2_000 + pu.respawn_delay_ms));
        assert!(pu.active);
        assert!(!pu.try_respawn(2_000 + pu.respawn_delay_ms + 1));
    }

    #[test]
    fn shield_reduction_is_capped() {
        let mut p = Player::new("p1".into(), "u1".into(), Vec2::ZERO, 1200.0, 0);
        p.apply_effect(PowerUpKind::Shield, 0.95, 10_000);
        assert_eq!(p.damage_reduction(5_000), MAX_DAMAGE_REDUCTION);
        // expired shield contributes nothing
        assert_eq!(p.damage_reduction(10_000), 0.0);
    }

    #[test]
    fn status_flags_expire_at_end_time() {
        let status = StatusFlags {
            blocking_until: 500,
            ..Default::default()
        };
        assert!(status.is_blocking(499));
        assert!(!status.is_blocking(500));
    }
}
