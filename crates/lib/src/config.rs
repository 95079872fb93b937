//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.lowball/config.json`) and
//! environment. Two sections: `gateway` (bind/port) and `game` (round pacing
//! and the losing-score threshold).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Game pacing and scoring settings.
    #[serde(default)]
    pub game: GameConfig,
}

/// Gateway bind and port settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP and WebSocket (default 8080). Overridden by PORT env.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Round pacing and scoring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameConfig {
    /// Per-round submission deadline in milliseconds (default 30000).
    /// Set to null to disable the server-side timer; the client `timeout`
    /// hint is honored only in that mode.
    #[serde(default = "default_round_timeout_ms")]
    pub round_timeout_ms: Option<u64>,

    /// Pause between a round result and the next roundStart, so players can
    /// read the result (default 2000).
    #[serde(default = "default_next_round_delay_ms")]
    pub next_round_delay_ms: u64,

    /// A player whose score reaches this value loses the game (default -10).
    #[serde(default = "default_losing_score")]
    pub losing_score: i32,
}

fn default_round_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_next_round_delay_ms() -> u64 {
    2_000
}

fn default_losing_score() -> i32 {
    -10
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            round_timeout_ms: default_round_timeout_ms(),
            next_round_delay_ms: default_next_round_delay_ms(),
            losing_score: default_losing_score(),
        }
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("LOWBALL_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".lowball").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Resolve the gateway port: PORT env overrides config.
pub fn resolve_port(config: &Config) -> u16 {
    std::env::var("PORT")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(config.gateway.port)
}

/// Load config from the default path (or LOWBALL_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Create the config directory and write a default config file if missing.
pub fn init_config_dir(config_path: &Path) -> Result<()> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = serde_json::to_string_pretty(&Config::default())
            .context("serializing default config")?;
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }
    Ok(())
}
