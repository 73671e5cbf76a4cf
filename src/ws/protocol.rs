//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::game::world::{Ability, PowerUpKind, Vec2, WeaponKind};

/// Queue modes; party size decides how many players form a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    Duel,
    Skirmish,
    FreeForAll,
}

impl GameMode {
    pub fn party_size(self) -> usize {
        match self {
            GameMode::Duel => 2,
            GameMode::Skirmish => 4,
            GameMode::FreeForAll => 8,
        }
    }
}

/// Matchmaking regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    NaEast,
    NaWest,
    EuWest,
    EuCentral,
    Apac,
}

/// Player actions carried by `input` messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerAction {
    Move,
    Attack,
    Block,
    Dodge,
    Cast,
}

/// Free-form action parameters; which fields matter depends on the action
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionParams {
    /// Attack target (hitscan path)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    /// Direction for move/dodge/aim, not necessarily normalized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Vec2>,
    /// Ability override for cast
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ability: Option<Ability>,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Join a match as a player
    JoinMatch {
        match_id: String,
        player_id: String,
    },

    /// Gameplay input; invalid inputs are silently dropped
    Input {
        player_id: String,
        action: PlayerAction,
        #[serde(default)]
        params: ActionParams,
        #[serde(default)]
        client_ts: u64,
    },

    /// Join a match as a spectator
    Spectate { match_id: String },

    /// Latency probe
    Ping { ts: u64 },

    /// Enter the matchmaking queue
    QueueJoin {
        player_id: String,
        mode: GameMode,
        region: Region,
    },

    /// Leave the matchmaking queue
    QueueLeave { player_id: String },

    /// Leave the current match
    LeaveMatch { player_id: String },

    /// Time-indexed replay lookup against the match's snapshot ring
    ReplayRequest {
        match_id: String,
        #[serde(default)]
        from_ms: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Connection greeting
    Connected {
        connection_id: Uuid,
        server_time: u64,
    },

    /// Player join confirmation
    Joined { match_id: String },

    /// Spectator join confirmation
    Welcome {
        spectator_id: Uuid,
        match_id: String,
    },

    /// Queue entry confirmation
    Queued { position: usize },

    /// Queue leave confirmation
    Left,

    /// Queue wait exceeded the timeout; the client may re-enqueue
    QueueExpired,

    /// Match creation failed after pairing; players were re-queued
    MatchCreateFailed,

    /// Periodic full-state keyframe
    StateFull {
        match_id: String,
        tick: u64,
        ts: u64,
        snapshot: MatchSnapshot,
    },

    /// Per-tick delta batch. When `compressed` is set the batch is carried
    /// lz4-compressed and base64-encoded in `payload` instead of `deltas`.
    StateDelta {
        match_id: String,
        tick: u64,
        ts: u64,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        deltas: Vec<Delta>,
        #[serde(default)]
        compressed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<String>,
    },

    /// Lifecycle and combat event push
    MatchEvent { event: GameEventPayload },

    /// Matchmaker found a match for this connection
    MatchFound { match_id: String, role: MatchRole },

    /// Replay snapshots in chronological order
    ReplayChunk {
        match_id: String,
        snapshots: Vec<ReplaySnapshotView>,
    },

    /// Pong response: echoes the client timestamp, adds server time
    Pong { ts: u64, server_ts: u64 },

    /// Structured error reply
    Error { reason: String, message: String },
}

/// Role assigned by a match_found push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRole {
    Player,
    Spectator,
}

/// Match lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Waiting,
    Active,
    Finished,
}

/// Wire view of a player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: String,
    pub user_id: String,
    pub position: Vec2,
    pub velocity: Vec2,
    pub health: u32,
    pub max_health: u32,
    pub mana: u32,
    pub stamina: u32,
    pub alive: bool,
    pub weapon: WeaponKind,
    pub blocking: bool,
    pub invulnerable: bool,
    pub casting: bool,
    pub kills: u32,
    pub deaths: u32,
}

/// Wire view of a projectile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileView {
    pub id: Uuid,
    pub owner_id: String,
    pub position: Vec2,
    pub velocity: Vec2,
    pub radius: f64,
    pub weapon: WeaponKind,
}

/// Wire view of a power-up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerUpView {
    pub id: Uuid,
    pub kind: PowerUpKind,
    pub position: Vec2,
    pub active: bool,
}

/// Full match snapshot (keyframes and replay entries)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSnapshot {
    pub status: MatchStatus,
    pub players: Vec<PlayerView>,
    pub projectiles: Vec<ProjectileView>,
    pub power_ups: Vec<PowerUpView>,
    /// Kills per player id
    pub score: HashMap<String, u32>,
    pub match_time_ms: u64,
}

/// Changed player fields since the last commit; absent fields are unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec2>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<Vec2>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mana: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stamina: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocking: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invulnerable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub casting: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kills: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deaths: Option<u32>,
}

impl PlayerChanges {
    pub fn is_empty(&self) -> bool {
        self == &PlayerChanges::default()
    }

    /// Merge a later change set into this one; later writes win per field
    pub fn merge(&mut self, later: PlayerChanges) {
        macro_rules! take {
            ($field:ident) => {
                if later.$field.is_some() {
                    self.$field = later.$field;
                }
            };
        }
        take!(position);
        take!(velocity);
        take!(health);
        take!(mana);
        take!(stamina);
        take!(alive);
        take!(blocking);
        take!(invulnerable);
        take!(casting);
        take!(kills);
        take!(deaths);
    }
}

/// Changed projectile fields since the last commit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectileChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec2>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_traveled: Option<f64>,
}

impl ProjectileChanges {
    pub fn is_empty(&self) -> bool {
        self == &ProjectileChanges::default()
    }

    pub fn merge(&mut self, later: ProjectileChanges) {
        if later.position.is_some() {
            self.position = later.position;
        }
        if later.distance_traveled.is_some() {
            self.distance_traveled = later.distance_traveled;
        }
    }
}

/// Change record emitted by the match state; one tick's records form a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "delta", rename_all = "snake_case")]
pub enum Delta {
    PlayerJoined { player: PlayerView },
    PlayerUpdated { id: String, changes: PlayerChanges },
    PlayerLeft { id: String },
    ProjectileCreated { projectile: ProjectileView },
    ProjectileUpdated { id: Uuid, changes: ProjectileChanges },
    ProjectileDestroyed { id: Uuid },
    PowerUpState { power_up: PowerUpView },
    GameEvent { event: GameEventPayload },
}

/// Game events (kills, lifecycle, pickups)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEventPayload {
    PlayerJoined {
        player_id: String,
    },
    PlayerLeft {
        player_id: String,
    },
    MatchStarted {
        tick: u64,
    },
    MatchFinished {
        winner: Option<String>,
        stats: MatchStatsView,
    },
    MatchEnded,
    MatchErrored {
        reason: String,
    },
    PlayerKilled {
        victim_id: String,
        killer_id: Option<String>,
    },
    PowerUpCollected {
        player_id: String,
        kind: PowerUpKind,
    },
    DroppedInput {
        count: u64,
    },
    TickOverrun {
        consecutive: u32,
    },
}

/// Final match statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchStatsView {
    pub duration_ms: u64,
    pub players: Vec<PlayerMatchStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerMatchStats {
    pub player_id: String,
    pub kills: u32,
    pub deaths: u32,
    pub damage_dealt: u64,
    pub damage_taken: u64,
    pub placement: u32,
}

/// Replay ring entry as returned to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySnapshotView {
    /// Milliseconds since recording started
    pub relative_time: u64,
    /// Absolute wall-clock time
    pub timestamp: u64,
    pub snapshot: MatchSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_msg_roundtrip() {
        let raw = r#"{"type":"queue_join","player_id":"p1","mode":"duel","region":"na_east"}"#;
        let msg: ClientMsg = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMsg::QueueJoin {
                player_id,
                mode,
                region,
            } => {
                assert_eq!(player_id, "p1");
                assert_eq!(mode, GameMode::Duel);
                assert_eq!(region, Region::NaEast);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn input_params_default_when_absent() {
        let raw = r#"{"type":"input","player_id":"p1","action":"block"}"#;
        let msg: ClientMsg = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMsg::Input { action, params, .. } => {
                assert_eq!(action, PlayerAction::Block);
                assert!(params.target_id.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn player_changes_merge_later_wins() {
        let mut first = PlayerChanges {
            health: Some(90),
            position: Some(Vec2::new(1.0, 1.0)),
            ..Default::default()
        };
        let second = PlayerChanges {
            position: Some(Vec2::new(2.0, 2.0)),
            stamina: Some(80),
            ..Default::default()
        };
        first.merge(second);
        assert_eq!(first.position, Some(Vec2::new(2.0, 2.0)));
        assert_eq!(first.health, Some(90));
        assert_eq!(first.stamina, Some(80));
    }

    #[test]
    fn empty_changes_serialize_compactly() {
        let delta = Delta::PlayerUpdated {
            id: "p1".into(),
            changes: PlayerChanges {
                health: Some(50),
                ..Default::default()
            },
        };
        let json = serde_json::to_string(&delta).unwrap();
        assert!(json.contains("\"health\":50"));
        assert!(!json.contains("position"));
    }
}
