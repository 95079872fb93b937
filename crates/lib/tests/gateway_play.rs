//! Integration tests: run the gateway on a free port and drive it end to end
//! with real WebSocket clients.

use futures_util::{SinkExt, StreamExt};
use lib::config::{Config, GameConfig};
use lib::gateway;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

type Ws = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

/// Spawn the gateway with the given game settings and wait until its health
/// endpoint answers. The server task is left running when the test ends.
async fn start_gateway(game: GameConfig) -> u16 {
    let port = free_port();
    let mut config = Config::default();
    config.gateway.port = port;
    config.gateway.bind = "127.0.0.1".to_string();
    config.game = game;

    tokio::spawn(async move {
        let _ = gateway::run_gateway(config).await;
    });

    let url = format!("http://127.0.0.1:{}/", port);
    let client = reqwest::Client::new();
    for _ in 0..100 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return port;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("gateway did not come up on {}", url);
}

async fn connect(port: u16) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{}/ws", port))
        .await
        .expect("ws connect");
    ws
}

async fn send(ws: &mut Ws, frame: Value) {
    ws.send(Message::Text(frame.to_string()))
        .await
        .expect("ws send");
}

async fn next_event(ws: &mut Ws) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("parse event");
        }
    }
}

/// Create with one client, join with the other; returns both after consuming
/// the start and roundStart events.
async fn start_game(port: u16) -> (Ws, Ws, String) {
    let mut creator = connect(port).await;
    send(&mut creator, json!({"type": "create", "username": "alice"})).await;
    let event = next_event(&mut creator).await;
    assert_eq!(event["type"], "gameCode");
    let code = event["gameCode"].as_str().expect("gameCode").to_string();

    let mut joiner = connect(port).await;
    send(
        &mut joiner,
        json!({"type": "join", "gameCode": code, "username": "bob"}),
    )
    .await;

    let start = next_event(&mut creator).await;
    assert_eq!(start["type"], "start");
    assert_eq!(start["playerNumber"], 1);
    assert_eq!(start["opponent"], "bob");

    let start = next_event(&mut joiner).await;
    assert_eq!(start["type"], "start");
    assert_eq!(start["playerNumber"], 2);
    assert_eq!(start["opponent"], "alice");

    assert_eq!(next_event(&mut creator).await["type"], "roundStart");
    assert_eq!(next_event(&mut joiner).await["type"], "roundStart");

    (creator, joiner, code)
}

fn no_timer_game() -> GameConfig {
    GameConfig {
        round_timeout_ms: None,
        next_round_delay_ms: 50,
        losing_score: -10,
    }
}

#[tokio::test]
async fn health_reports_running() {
    let port = start_gateway(no_timer_game()).await;

    let url = format!("http://127.0.0.1:{}/", port);
    let json: Value = reqwest::get(&url)
        .await
        .expect("GET /")
        .json()
        .await
        .expect("parse JSON");
    assert_eq!(json["runtime"], "running");
    assert_eq!(json["port"], port);
}

#[tokio::test]
async fn a_full_round_is_played_and_the_next_one_starts() {
    let port = start_gateway(no_timer_game()).await;
    let (mut creator, mut joiner, code) = start_game(port).await;

    send(
        &mut creator,
        json!({"type": "number", "gameCode": code, "playerNumber": 1, "number": 40}),
    )
    .await;
    send(
        &mut joiner,
        json!({"type": "number", "gameCode": code, "playerNumber": 2, "number": 60}),
    )
    .await;

    for ws in [&mut creator, &mut joiner] {
        let result = next_event(ws).await;
        assert_eq!(result["type"], "result");
        assert_eq!(result["numbers"], json!([40.0, 60.0]));
        assert_eq!(result["average"], 50.0);
        assert_eq!(result["target"], 40.0);
        assert_eq!(result["winner"], 1);
        assert_eq!(result["scores"], json!([0, -1]));
        // After the display delay the next round opens.
        assert_eq!(next_event(ws).await["type"], "roundStart");
    }
}

#[tokio::test]
async fn the_server_deadline_penalizes_missing_submissions() {
    let port = start_gateway(GameConfig {
        round_timeout_ms: Some(100),
        next_round_delay_ms: 50,
        losing_score: -10,
    })
    .await;
    let (mut creator, mut joiner, _code) = start_game(port).await;

    // Submit nothing and let the deadline fire.
    for ws in [&mut creator, &mut joiner] {
        let timeout = next_event(ws).await;
        assert_eq!(timeout["type"], "timeout");
        assert_eq!(timeout["scores"], json!([-1, -1]));
        // The timeout path restarts without a display delay.
        assert_eq!(next_event(ws).await["type"], "roundStart");
    }
}

#[tokio::test]
async fn reaching_the_losing_score_ends_the_game_for_both() {
    let port = start_gateway(GameConfig {
        round_timeout_ms: None,
        next_round_delay_ms: 50,
        losing_score: -1,
    })
    .await;
    let (mut creator, mut joiner, code) = start_game(port).await;

    send(
        &mut creator,
        json!({"type": "number", "gameCode": code, "playerNumber": 1, "number": 40}),
    )
    .await;
    send(
        &mut joiner,
        json!({"type": "number", "gameCode": code, "playerNumber": 2, "number": 60}),
    )
    .await;

    for ws in [&mut creator, &mut joiner] {
        assert_eq!(next_event(ws).await["type"], "result");
        let game_over = next_event(ws).await;
        assert_eq!(game_over["type"], "gameOver");
        assert_eq!(game_over["winner"], "alice");
    }

    // The session is gone: a third client cannot join the old code, and its
    // next action (create) answers first.
    let mut third = connect(port).await;
    send(
        &mut third,
        json!({"type": "join", "gameCode": code, "username": "carol"}),
    )
    .await;
    send(&mut third, json!({"type": "create", "username": "carol"})).await;
    assert_eq!(next_event(&mut third).await["type"], "gameCode");

    // A finished player can start a fresh game over the same socket.
    send(&mut creator, json!({"type": "create", "username": "alice"})).await;
    assert_eq!(next_event(&mut creator).await["type"], "gameCode");
}

#[tokio::test]
async fn joining_a_full_session_is_ignored() {
    let port = start_gateway(no_timer_game()).await;
    let (_creator, _joiner, code) = start_game(port).await;

    let mut third = connect(port).await;
    send(
        &mut third,
        json!({"type": "join", "gameCode": code, "username": "carol"}),
    )
    .await;
    // No reply for the rejected join; the next create is answered first.
    send(&mut third, json!({"type": "create", "username": "carol"})).await;
    assert_eq!(next_event(&mut third).await["type"], "gameCode");
}

#[tokio::test]
async fn disconnect_tears_the_session_down_and_stops_the_timer() {
    let port = start_gateway(GameConfig {
        round_timeout_ms: Some(150),
        next_round_delay_ms: 50,
        losing_score: -10,
    })
    .await;
    let (creator, mut joiner, _code) = start_game(port).await;

    drop(creator);

    // The armed deadline must not fire against the torn-down session: the
    // remaining player sees no further events.
    let quiet = tokio::time::timeout(Duration::from_millis(400), async {
        loop {
            match joiner.next().await {
                // The close frame from teardown is fine; game events are not.
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Text(text))) => panic!("unexpected event: {}", text),
                _ => {}
            }
        }
    })
    .await;
    // Either the socket stayed silent for the whole window or it closed.
    let _ = quiet;
}
