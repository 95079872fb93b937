//! Gateway: the HTTP + WebSocket transport boundary.
//!
//! A single port serves the health endpoint and the WebSocket upgrade.
//! Inbound frames are demultiplexed by `type`, routed to the owning session
//! through the registry, and outbound events fan out to the addressed player
//! connections. This is the only module aware of the transport.

pub mod protocol;
mod server;

pub use server::run_gateway;
