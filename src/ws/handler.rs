//! WebSocket upgrade handler and session routing

use std::collections::HashSet;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::GameError;
use crate::game::{spawn_match, MatchCommand, MatchSettings, PlayerInput};
use crate::matchmaking::rating::RATING_DEFAULT;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Outgoing queue depth per connection
const PUSH_QUEUE: usize = 64;

/// Latency assumed before the first ping lands
const DEFAULT_LATENCY_MS: u32 = 50;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection session state
struct Session {
    conn_id: Uuid,
    /// Player identity once the connection joins or queues
    player_id: Option<String>,
    /// Match the player currently belongs to
    match_id: Option<String>,
    /// Matches this connection spectates
    spectating: HashSet<String>,
    /// Last latency estimate from ping traffic
    latency_ms: u32,
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    info!(conn_id = %conn_id, "websocket connected");

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (push_tx, mut push_rx) = mpsc::channel::<ServerMsg>(PUSH_QUEUE);

    // writer task: everything destined for this client funnels through one
    // channel, so match broadcasts and direct replies share ordering
    let writer_conn_id = conn_id;
    let writer = tokio::spawn(async move {
        while let Some(msg) = push_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sink.send(Message::Text(json)).await.is_err() {
                        debug!(conn_id = %writer_conn_id, "websocket send failed");
                        break;
                    }
                }
                Err(e) => error!(conn_id = %writer_conn_id, error = %e, "serialize failed"),
            }
        }
    });

    let _ = push_tx
        .send(ServerMsg::Connected {
            connection_id: conn_id,
            server_time: unix_millis(),
        })
        .await;

    let mut session = Session {
        conn_id,
        player_id: None,
        match_id: None,
        spectating: HashSet::new(),
        latency_ms: DEFAULT_LATENCY_MS,
    };
    let limiter = ConnectionRateLimiter::new(state.config.tick_hz);

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMsg>(&text) {
                Ok(msg) => handle_msg(&state, &mut session, &push_tx, &limiter, msg).await,
                Err(e) => {
                    // schema violations are dropped without a reply
                    warn!(conn_id = %conn_id, error = %e, "unparseable client message");
                }
            },
            Ok(Message::Close(_)) => {
                info!(conn_id = %conn_id, "client closed connection");
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Binary(_)) => {
                warn!(conn_id = %conn_id, "binary frame ignored");
            }
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "websocket error");
                break;
            }
        }
    }

    cleanup(&state, &session).await;
    writer.abort();
    info!(conn_id = %conn_id, "websocket closed");
}

async fn handle_msg(
    state: &AppState,
    session: &mut Session,
    push_tx: &mpsc::Sender<ServerMsg>,
    limiter: &ConnectionRateLimiter,
    msg: ClientMsg,
) {
    match msg {
        ClientMsg::JoinMatch {
            match_id,
            player_id,
        } => {
            // creation is idempotent: an existing id yields its handle
            let handle = spawn_match(
                &state.registry,
                &match_id,
                rand::random(),
                MatchSettings::from_config(&state.config),
                None,
            );

            let cmd = MatchCommand::Join {
                player_id: player_id.clone(),
                conn_id: session.conn_id,
                rating: RATING_DEFAULT,
                tx: push_tx.clone(),
            };
            if handle.cmd_tx.try_send(cmd).is_err() {
                send_error(push_tx, GameError::MatchNotFound(match_id.clone()));
                return;
            }
            session.player_id = Some(player_id);
            session.match_id = Some(match_id);
        }

        ClientMsg::Input {
            player_id,
            action,
            params,
            client_ts,
        } => {
            if !limiter.check_input() {
                debug!(conn_id = %session.conn_id, "input rate limited");
                return;
            }
            // inputs for someone else's player are discarded
            if session.player_id.as_deref() != Some(player_id.as_str()) {
                return;
            }
            let Some(handle) = session.match_id.as_deref().and_then(|m| state.registry.get(m))
            else {
                return;
            };

            let input = PlayerInput {
                player_id,
                action,
                params,
                client_ts,
                received_at: unix_millis(),
            };
            if handle.cmd_tx.try_send(MatchCommand::Input(input)).is_err() {
                debug!(conn_id = %session.conn_id, "match input channel full, input dropped");
            }
        }

        ClientMsg::Spectate { match_id } => match state.registry.get(&match_id) {
            Some(handle) => {
                let cmd = MatchCommand::SpectatorJoin {
                    spectator_id: session.conn_id,
                    tx: push_tx.clone(),
                };
                if handle.cmd_tx.try_send(cmd).is_ok() {
                    session.spectating.insert(match_id);
                } else {
                    send_error(push_tx, GameError::MatchNotFound(match_id));
                }
            }
            None => send_error(push_tx, GameError::MatchNotFound(match_id)),
        },

        ClientMsg::Ping { ts } => {
            let server_ts = unix_millis();
            // one-way estimate from the echoed client timestamp
            session.latency_ms = server_ts.saturating_sub(ts).min(5_000) as u32;
            let _ = push_tx.try_send(ServerMsg::Pong { ts, server_ts });
        }

        ClientMsg::QueueJoin {
            player_id,
            mode,
            region,
        } => {
            state
                .matchmaker
                .register_connection(&player_id, push_tx.clone());
            match state
                .matchmaker
                .enqueue(&player_id, mode, region, session.latency_ms)
                .await
            {
                Ok(position) => {
                    session.player_id = Some(player_id);
                    let _ = push_tx.try_send(ServerMsg::Queued { position });
                }
                Err(err) => send_error(push_tx, err),
            }
        }

        ClientMsg::QueueLeave { player_id } => {
            state.matchmaker.dequeue(&player_id).await;
            let _ = push_tx.try_send(ServerMsg::Left);
        }

        ClientMsg::LeaveMatch { player_id } => {
            if let Some(handle) = session.match_id.as_deref().and_then(|m| state.registry.get(m)) {
                let _ = handle.cmd_tx.try_send(MatchCommand::Leave { player_id });
            }
            session.match_id = None;
        }

        ClientMsg::ReplayRequest { match_id, from_ms } => match state.registry.get(&match_id) {
            Some(handle) => {
                let cmd = MatchCommand::ReplayRequest {
                    from_ms,
                    tx: push_tx.clone(),
                };
                let _ = handle.cmd_tx.try_send(cmd);
            }
            None => send_error(push_tx, GameError::MatchNotFound(match_id)),
        },
    }
}

/// Tear down everything the connection held when it goes away
async fn cleanup(state: &AppState, session: &Session) {
    if let (Some(player_id), Some(match_id)) = (&session.player_id, &session.match_id) {
        if let Some(handle) = state.registry.get(match_id) {
            let _ = handle.cmd_tx.try_send(MatchCommand::Leave {
                player_id: player_id.clone(),
            });
        }
    }
    for match_id in &session.spectating {
        if let Some(handle) = state.registry.get(match_id) {
            let _ = handle.cmd_tx.try_send(MatchCommand::SpectatorLeave {
                spectator_id: session.conn_id,
            });
        }
    }
    if let Some(player_id) = &session.player_id {
        state.matchmaker.unregister_connection(player_id).await;
    }
}

fn send_error(push_tx: &mpsc::Sender<ServerMsg>, err: GameError) {
    let _ = push_tx.try_send(ServerMsg::Error {
        reason: err.code().to_string(),
        message: err.to_string(),
    });
}
