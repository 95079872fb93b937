//! Lowball core library — the game state machine, session registry, and the
//! HTTP + WebSocket gateway used by both the server and the terminal client.

pub mod config;
pub mod game;
pub mod gateway;
