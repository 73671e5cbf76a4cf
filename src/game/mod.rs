//! Game simulation modules

pub mod broadcast;
pub mod collision;
pub mod combat;
pub mod grid;
pub mod r#match;
pub mod physics;
pub mod replay;
pub mod spectator;
pub mod state;
pub mod world;

pub use r#match::{spawn_match, GameMatch, MatchHandle, MatchRegistry, MatchSettings};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ws::protocol::{ActionParams, PlayerAction, ServerMsg};

/// A player input as received from the connection layer
#[derive(Debug, Clone)]
pub struct PlayerInput {
    pub player_id: String,
    pub action: PlayerAction,
    pub params: ActionParams,
    pub client_ts: u64,
    pub received_at: u64,
}

/// Decided-match notification consumed by the matchmaker's rating table
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub match_id: String,
    pub winner: Option<String>,
    pub losers: Vec<String>,
}

/// Commands accepted by a match task. Everything that touches match state
/// flows through this channel, keeping the state single-threaded.
#[derive(Debug)]
pub enum MatchCommand {
    Join {
        player_id: String,
        conn_id: Uuid,
        rating: f64,
        tx: mpsc::Sender<ServerMsg>,
    },
    Leave {
        player_id: String,
    },
    Input(PlayerInput),
    SpectatorJoin {
        spectator_id: Uuid,
        tx: mpsc::Sender<ServerMsg>,
    },
    SpectatorLeave {
        spectator_id: Uuid,
    },
    ReplayRequest {
        from_ms: u64,
        tx: mpsc::Sender<ServerMsg>,
    },
    Terminate,
}
