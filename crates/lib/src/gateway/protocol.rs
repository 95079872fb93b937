//! Wire messages: closed tagged enums for everything clients send and
//! everything the server emits, exhaustively matched at the gateway.

use serde::{Deserialize, Serialize};

/// Inbound client frame, tagged by `type`. Unparseable frames are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Open a new session; the server replies with `gameCode`.
    Create { username: String },
    /// Take the second slot of an existing session.
    Join { game_code: String, username: String },
    /// Submit this round's number. `playerNumber` is 1-based.
    Number {
        game_code: String,
        player_number: usize,
        number: f64,
    },
    /// Client-side deadline hint. Honored only when the server-side round
    /// timer is disabled; otherwise the server's own deadline is authoritative.
    Timeout { game_code: String },
}

/// Outbound server frame, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// To the creator only: the code the opponent joins with.
    GameCode { game_code: String },
    /// To both players once the second slot fills; each sees its own 1-based
    /// slot number and the opponent's display name.
    Start { player_number: usize, opponent: String },
    /// A new round is accepting submissions.
    RoundStart,
    /// Round resolved by completion: raw numbers in slot order, their
    /// average, the 0.8×average target, the winning slot (1-based), and both
    /// scores.
    #[serde(rename = "result")]
    RoundResult {
        numbers: Vec<f64>,
        average: f64,
        target: f64,
        winner: usize,
        scores: Vec<i32>,
    },
    /// Round resolved by deadline; carries both current scores.
    Timeout { scores: Vec<i32> },
    /// Terminal: the named player won the match.
    GameOver { winner: String },
    /// The server is going down.
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_inbound_frames() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"create","username":"alice"}"#).expect("create");
        assert_eq!(
            msg,
            ClientMessage::Create {
                username: "alice".to_string()
            }
        );

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"number","gameCode":"AB12CD","playerNumber":2,"number":42}"#,
        )
        .expect("number");
        assert_eq!(
            msg,
            ClientMessage::Number {
                game_code: "AB12CD".to_string(),
                player_number: 2,
                number: 42.0
            }
        );
    }

    #[test]
    fn unknown_or_malformed_frames_fail_to_parse() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"restart"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
        // playerNumber must be a non-negative integer.
        assert!(serde_json::from_str::<ClientMessage>(
            r#"{"type":"number","gameCode":"AB12CD","playerNumber":-1,"number":5}"#
        )
        .is_err());
    }

    #[test]
    fn result_event_uses_the_wire_field_names() {
        let event = ServerMessage::RoundResult {
            numbers: vec![40.0, 60.0],
            average: 50.0,
            target: 40.0,
            winner: 1,
            scores: vec![0, -1],
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(
            value,
            json!({
                "type": "result",
                "numbers": [40.0, 60.0],
                "average": 50.0,
                "target": 40.0,
                "winner": 1,
                "scores": [0, -1],
            })
        );
    }

    #[test]
    fn unit_events_serialize_to_a_bare_tag() {
        assert_eq!(
            serde_json::to_string(&ServerMessage::RoundStart).expect("serialize"),
            r#"{"type":"roundStart"}"#
        );
        let value = serde_json::to_value(ServerMessage::GameCode {
            game_code: "AB12CD".to_string(),
        })
        .expect("serialize");
        assert_eq!(value, json!({"type":"gameCode","gameCode":"AB12CD"}));
    }
}
