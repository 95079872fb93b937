use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use lib::gateway::protocol::{ClientMessage, ServerMessage};
use tokio::io::AsyncBufReadExt;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "lowball")]
#[command(about = "Lowball — a two-player 0.8×average guessing game", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: LOWBALL_CONFIG_PATH or ~/.lowball/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the game server (HTTP + WebSocket on one port).
    Serve {
        /// Config file path (default: LOWBALL_CONFIG_PATH or ~/.lowball/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// WebSocket and HTTP port (default from config, PORT env, or 8080)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Play from the terminal: create a game, or join one with --code.
    Play {
        /// Config file path (default: LOWBALL_CONFIG_PATH or ~/.lowball/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Display name shown to the opponent.
        #[arg(long, short, default_value = "player")]
        name: String,

        /// Game code to join; omit to create a new game instead.
        #[arg(long, value_name = "CODE")]
        code: Option<String>,

        /// Server WebSocket URL (default derived from config, e.g. ws://127.0.0.1:8080/ws)
        #[arg(long, value_name = "URL")]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("lowball {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("serve failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Play {
            config,
            name,
            code,
            url,
        }) => {
            if let Err(e) = run_play(config, name, code, url).await {
                log::error!("play failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    lib::config::init_config_dir(&path)?;
    println!("initialized configuration at {}", path.display());
    Ok(())
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, _path) = lib::config::load_config(config_path)?;
    config.gateway.port = port.unwrap_or_else(|| lib::config::resolve_port(&config));
    log::info!(
        "starting gateway on {}:{}",
        config.gateway.bind,
        config.gateway.port
    );
    lib::gateway::run_gateway(config).await
}

async fn run_play(
    config_path: Option<std::path::PathBuf>,
    name: String,
    code: Option<String>,
    url: Option<String>,
) -> anyhow::Result<()> {
    let (config, _) = lib::config::load_config(config_path)?;
    let url = url.unwrap_or_else(|| {
        format!(
            "ws://{}:{}/ws",
            config.gateway.bind.trim(),
            lib::config::resolve_port(&config)
        )
    });

    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .with_context(|| format!("connecting to {}", url))?;

    let mut game_code = code.map(|c| c.trim().to_uppercase());
    let first = match &game_code {
        Some(c) => ClientMessage::Join {
            game_code: c.clone(),
            username: name.clone(),
        },
        None => ClientMessage::Create { username: name },
    };
    ws.send(Message::Text(serde_json::to_string(&first)?)).await?;
    if game_code.is_some() {
        println!("joining game...");
    }

    let mut player_number = 0usize;
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            msg = ws.next() => {
                let Some(msg) = msg else { break };
                let Message::Text(text) = msg? else { continue };
                let Ok(event) = serde_json::from_str::<ServerMessage>(&text) else { continue };
                match event {
                    ServerMessage::GameCode { game_code: c } => {
                        println!("game code: {} — waiting for an opponent to join", c);
                        game_code = Some(c);
                    }
                    ServerMessage::Start { player_number: n, opponent } => {
                        player_number = n;
                        println!("playing against {} (you are player {})", opponent, n);
                    }
                    ServerMessage::RoundStart => {
                        println!("round start — enter a number between 0 and 100:");
                    }
                    ServerMessage::RoundResult { numbers, average, target, winner, scores } => {
                        println!(
                            "numbers {:?} — average {:.1}, target {:.1}",
                            numbers, average, target
                        );
                        if winner == player_number {
                            println!("you win this round — scores {:?}", scores);
                        } else {
                            println!("opponent wins this round — scores {:?}", scores);
                        }
                    }
                    ServerMessage::Timeout { scores } => {
                        println!("round timed out — scores {:?}", scores);
                    }
                    ServerMessage::GameOver { winner } => {
                        println!("game over — {} wins", winner);
                        break;
                    }
                    ServerMessage::Shutdown => {
                        println!("server shutting down");
                        break;
                    }
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if input.eq_ignore_ascii_case("/quit") {
                    break;
                }
                let Ok(number) = input.parse::<f64>() else {
                    eprintln!("enter a number between 0 and 100");
                    continue;
                };
                let Some(code) = game_code.clone() else {
                    eprintln!("not in a game yet");
                    continue;
                };
                if player_number == 0 {
                    eprintln!("waiting for an opponent");
                    continue;
                }
                let msg = ClientMessage::Number {
                    game_code: code,
                    player_number,
                    number,
                };
                ws.send(Message::Text(serde_json::to_string(&msg)?)).await?;
            }
        }
    }

    Ok(())
}
