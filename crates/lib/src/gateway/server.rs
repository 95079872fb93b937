//! Gateway HTTP + WebSocket server (single port).

use crate::config::Config;
use crate::game::registry::{normalize_code, SessionRegistry, SharedSession};
use crate::game::{GameCode, GameRules, GameSession, RoundEnd};
use crate::gateway::protocol::{ClientMessage, ServerMessage};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

const SHUTDOWN_EVENT_JSON: &str = r#"{"type":"shutdown"}"#;

/// Shared state for the gateway (config, live sessions, shutdown broadcast).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    /// The only cross-session shared structure: code → session.
    pub registry: SessionRegistry,
    /// Broadcasts raw JSON frames to every connected client (shutdown).
    pub event_tx: broadcast::Sender<String>,
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config) -> Result<()> {
    let bind = config.gateway.bind.trim().to_string();
    let port = config.gateway.port;

    let (event_tx, _) = broadcast::channel(16);
    let state = GatewayState {
        config: Arc::new(config),
        registry: SessionRegistry::new(),
        event_tx: event_tx.clone(),
    };

    let app = Router::new()
        .route("/", get(health_http))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let bind_addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(event_tx))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or
/// SIGTERM). Broadcasts a shutdown frame to connected clients first.
async fn shutdown_signal(event_tx: broadcast::Sender<String>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
    let _ = event_tx.send(SHUTDOWN_EVENT_JSON.to_string());
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
    }))
}

/// GET /ws upgrades to WebSocket.
async fn ws_handler(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection loop: parse inbound frames and dispatch them, deliver this
/// player's outbound events, and tear the session down the moment the
/// connection drops.
async fn handle_socket(mut socket: WebSocket, state: GatewayState) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut event_rx = state.event_tx.subscribe();
    let mut joined: Option<GameCode> = None;

    loop {
        tokio::select! {
            biased;

            event = event_rx.recv() => {
                match event {
                    Ok(text) => {
                        let is_shutdown = text == SHUTDOWN_EVENT_JSON;
                        let _ = socket.send(Message::Text(text)).await;
                        if is_shutdown {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::debug!("ws client lagged {} broadcast frames", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            out = rx.recv() => {
                // Our own tx keeps the channel open, so this is always Some.
                let Some(event) = out else { break };
                match serde_json::to_string(&event) {
                    Ok(text) => {
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("serializing outbound event failed: {}", e),
                }
            }
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let Ok(msg) = serde_json::from_str::<ClientMessage>(&text) else {
                    log::debug!("dropping malformed frame");
                    continue;
                };
                dispatch(&state, &tx, &mut joined, msg).await;
            }
        }
    }

    // A session exists only while both its connections do.
    if let Some(code) = joined {
        teardown_session(&state, &code).await;
    }
}

/// Route one inbound message to the owning session. Unknown codes, full
/// sessions, and out-of-state messages are silent no-ops per the error
/// taxonomy; nothing here may take the connection down.
async fn dispatch(
    state: &GatewayState,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    joined: &mut Option<GameCode>,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::Create { username } => {
            if still_in_session(state, joined).await {
                log::debug!("ignoring create from a connection already in a session");
                return;
            }
            let rules = GameRules::from(&state.config.game);
            let code = state.registry.create(username, tx.clone(), rules).await;
            log::info!("session {} created, awaiting opponent", code);
            let _ = tx.send(ServerMessage::GameCode {
                game_code: code.clone(),
            });
            *joined = Some(code);
        }
        ClientMessage::Join { game_code, username } => {
            if still_in_session(state, joined).await {
                log::debug!("ignoring join from a connection already in a session");
                return;
            }
            let code = normalize_code(&game_code);
            match state.registry.join(&code, username, tx.clone()).await {
                Ok(session) => {
                    *joined = Some(code.clone());
                    log::info!("session {} complete, starting first round", code);
                    let mut s = session.lock().await;
                    begin_round(state, &session, &mut s);
                }
                Err(e) => log::debug!("join {}: {}", code, e),
            }
        }
        ClientMessage::Number {
            game_code,
            player_number,
            number,
        } => {
            let code = normalize_code(&game_code);
            let Some(session) = state.registry.get(&code).await else {
                return;
            };
            let Some(slot) = player_number.checked_sub(1) else {
                return;
            };
            let mut s = session.lock().await;
            match s.submit_number(slot, number) {
                Some(RoundEnd::GameOver) => {
                    s.cancel_tasks();
                    drop(s);
                    state.registry.remove(&code).await;
                    log::info!("session {} over", code);
                }
                Some(RoundEnd::Continue) => {
                    // Completion beat the deadline.
                    s.disarm_timer();
                    schedule_restart(state, &session, &mut s);
                }
                None => {}
            }
        }
        ClientMessage::Timeout { game_code } => {
            // The server's own round timer is authoritative whenever it is
            // configured; the client hint only counts with the timer off.
            if server_timer_enabled(&state.config) {
                log::debug!("ignoring client timeout hint, server deadline is armed");
                return;
            }
            let code = normalize_code(&game_code);
            let Some(session) = state.registry.get(&code).await else {
                return;
            };
            let mut s = session.lock().await;
            match s.force_timeout() {
                Some(RoundEnd::GameOver) => {
                    s.cancel_tasks();
                    drop(s);
                    state.registry.remove(&code).await;
                    log::info!("session {} over", code);
                }
                Some(RoundEnd::Continue) => begin_round(state, &session, &mut s),
                None => {}
            }
        }
    }
}

/// A connection keeps its code after game over; forget it once the session
/// is gone so the player can create or join again over the same socket.
async fn still_in_session(state: &GatewayState, joined: &mut Option<GameCode>) -> bool {
    match joined {
        Some(code) if state.registry.get(code).await.is_some() => true,
        _ => {
            *joined = None;
            false
        }
    }
}

fn server_timer_enabled(config: &Config) -> bool {
    config.game.round_timeout_ms.is_some_and(|ms| ms > 0)
}

/// Open the next round and, when a deadline is configured, arm its timer.
/// The timer fires at most once per round: a stale fire is filtered by the
/// round counter, and early resolution aborts the task outright.
fn begin_round(state: &GatewayState, session: &SharedSession, s: &mut GameSession) {
    s.start_next_round();
    let Some(timeout_ms) = state.config.game.round_timeout_ms.filter(|ms| *ms > 0) else {
        return;
    };
    let mut armed_round = s.round();
    let code = s.code().to_string();
    let state = state.clone();
    let session_arc = session.clone();
    let handle = tokio::spawn(async move {
        // One deadline per round; keeps running while rounds keep timing
        // out, since the timeout path restarts without a display delay.
        loop {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            let mut s = session_arc.lock().await;
            if s.round() != armed_round {
                return;
            }
            match s.force_timeout() {
                Some(RoundEnd::GameOver) => {
                    // The stored handle is this task; clear it without
                    // self-aborting before cancelling the rest.
                    let _ = s.take_timer_task();
                    s.cancel_tasks();
                    drop(s);
                    state.registry.remove(&code).await;
                    log::info!("session {} over", code);
                    return;
                }
                Some(RoundEnd::Continue) => {
                    s.start_next_round();
                    armed_round = s.round();
                }
                None => return,
            }
        }
    });
    s.set_timer_task(handle);
}

/// Schedule the next round after the post-result display delay.
fn schedule_restart(state: &GatewayState, session: &SharedSession, s: &mut GameSession) {
    let delay_ms = state.config.game.next_round_delay_ms;
    let state = state.clone();
    let session_arc = session.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        let mut s = session_arc.lock().await;
        if s.is_game_over() {
            return;
        }
        let _ = s.take_restart_task();
        begin_round(&state, &session_arc, &mut s);
    });
    s.set_restart_task(handle);
}

/// Disconnect teardown: drop the session and cancel anything it scheduled.
/// No grace period and no rejoin; the other player's messages now resolve to
/// an unknown code and are ignored.
async fn teardown_session(state: &GatewayState, code: &str) {
    if let Some(session) = state.registry.remove(code).await {
        let mut s = session.lock().await;
        s.cancel_tasks();
        s.close();
        log::info!("session {} torn down on disconnect", code);
    }
}
