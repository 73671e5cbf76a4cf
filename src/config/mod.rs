//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Simulation ticks per second
    pub tick_hz: u32,
    /// Maximum players per match
    pub max_players: usize,
    /// Players required before a match leaves `waiting`
    pub min_players: usize,
    /// Maximum spectators per match
    pub max_spectators: usize,
    /// Match time limit in milliseconds
    pub match_timeout_ms: u64,
    /// Kills needed to end a match early
    pub score_limit: u32,
    /// Delay before an empty match is reaped
    pub empty_match_reap_ms: u64,

    /// Full-snapshot keyframe interval
    pub full_state_interval_ms: u64,
    /// Replay snapshot sampling floor
    pub snapshot_interval_ms: u64,
    /// Replay ring capacity
    pub max_snapshots: usize,
    /// Replay retention window
    pub retention_ms: u64,

    /// Matchmaker pass interval
    pub match_tick_ms: u64,
    /// Queue expiry
    pub queue_timeout_ms: u64,
    /// Base rating gap allowed for pairing
    pub base_skill_tol: f64,
    /// Rating gap ceiling after wait widening
    pub max_skill_tol: f64,
    /// Hard latency-difference gate
    pub latency_tol_ms: u32,

    /// Arena width
    pub world_w: f64,
    /// Arena height
    pub world_h: f64,
    /// Per-tick velocity friction multiplier
    pub friction: f64,
    /// Velocity magnitude clamp (units/s)
    pub max_vel: f64,
    /// Resource regeneration holdoff after taking damage
    pub regen_delay_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // PaaS providers set PORT; fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            tick_hz: parse_var("TICK_HZ", 60)?,
            max_players: parse_var("MAX_PLAYERS", 16)?,
            min_players: parse_var("MIN_PLAYERS", 2)?,
            max_spectators: parse_var("MAX_SPECTATORS", 100)?,
            match_timeout_ms: parse_var("MATCH_TIMEOUT_MS", 600_000)?,
            score_limit: parse_var("SCORE_LIMIT", 20)?,
            empty_match_reap_ms: parse_var("EMPTY_MATCH_REAP_MS", 30_000)?,

            full_state_interval_ms: parse_var("FULL_STATE_INTERVAL_MS", 5_000)?,
            snapshot_interval_ms: parse_var("SNAPSHOT_INTERVAL_MS", 100)?,
            max_snapshots: parse_var("MAX_SNAPSHOTS", 10_000)?,
            retention_ms: parse_var("RETENTION_MS", 1_800_000)?,

            match_tick_ms: parse_var("MATCH_TICK_MS", 1_000)?,
            queue_timeout_ms: parse_var("QUEUE_TIMEOUT_MS", 30_000)?,
            base_skill_tol: parse_var("BASE_SKILL_TOL", 100.0)?,
            max_skill_tol: parse_var("MAX_SKILL_TOL", 300.0)?,
            latency_tol_ms: parse_var("LATENCY_TOL_MS", 150)?,

            world_w: parse_var("WORLD_W", 2000.0)?,
            world_h: parse_var("WORLD_H", 2000.0)?,
            friction: parse_var("FRICTION", 0.92)?,
            max_vel: parse_var("MAX_VEL", 500.0)?,
            regen_delay_ms: parse_var("REGEN_DELAY_MS", 3_000)?,
        })
    }
}

/// Parse an optional env var, failing loudly on malformed values
fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
