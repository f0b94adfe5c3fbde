//! Scripted two-player run: starts the server in single-shot mode, connects
//! two players and feeds them moves from files.

use clap::Parser;
use client::input::parse_script;
use client::network::{ClientConfig, ClientError, ClientSession};
use log::{info, warn};
use shared::protocol::{MovementEncoding, BROADCAST_CHUNK};
use shared::update::{GameUpdate, UpdateReader};
use shared::{Direction, PlayerId};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::time::{sleep, Duration};

#[derive(Parser, Debug)]
#[command(author, version, about = "Scripted two-player test run", long_about = None)]
struct Args {
    /// Port the server listens on
    port: u16,

    /// Map file handed to the server
    map_file: PathBuf,

    /// Moves for player 1 (v > < ^)
    player1_moves: PathBuf,

    /// Moves for player 2 (v > < ^)
    player2_moves: PathBuf,

    /// Server executable; defaults to `server` next to this one
    #[arg(long)]
    server_bin: Option<PathBuf>,

    /// Delay between two moves, in milliseconds
    #[arg(long, default_value = "100")]
    pace_ms: u64,

    /// Delay between starting the server and connecting, in milliseconds
    #[arg(long, default_value = "200")]
    startup_ms: u64,
}

#[derive(Debug, Default)]
struct Tally {
    updates: usize,
    last_scores: Vec<(PlayerId, u32)>,
    winner: Option<PlayerId>,
    forfeit: Option<PlayerId>,
}

/// Decodes the update stream one player receives.
async fn watch_updates(player: PlayerId, mut updates: DuplexStream) -> Tally {
    let mut reader = UpdateReader::new();
    let mut tally = Tally::default();
    let mut chunk = vec![0u8; BROADCAST_CHUNK];

    loop {
        let len = match updates.read(&mut chunk).await {
            Ok(0) => break,
            Ok(len) => len,
            Err(e) => {
                warn!("Player {}: update stream failed: {}", player, e);
                break;
            }
        };
        reader.push(&chunk[..len]);

        let decoded = match reader.drain() {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Player {}: undecodable update: {}", player, e);
                break;
            }
        };
        for update in decoded {
            tally.updates += 1;
            match update {
                GameUpdate::GameOver { winner, scores } => {
                    tally.winner = winner;
                    tally.last_scores = scores;
                }
                GameUpdate::Forfeit { leaver } => tally.forfeit = Some(leaver),
                _ => {}
            }
        }
    }

    tally
}

async fn play(
    config: ClientConfig,
    moves: DuplexStream,
    registered: oneshot::Sender<PlayerId>,
) -> Result<(PlayerId, Tally), ClientError> {
    let session = ClientSession::connect(&config).await?;
    let player = session.player_id();
    let _ = registered.send(player);

    let (output, updates) = duplex(BROADCAST_CHUNK);
    let watcher = tokio::spawn(watch_updates(player, updates));

    session.run(moves, output).await?;
    Ok((player, watcher.await.unwrap_or_default()))
}

/// One scripted player: the moves to play and the stream feeding its session.
struct Lane {
    player: PlayerId,
    script: Vec<Direction>,
    input: Option<DuplexStream>,
}

/// Pairs each registered player with the move file for its id, in player
/// order. File 1 always plays as player 1, whichever connection got seat 1.
fn assign_scripts(
    scripts: [Vec<Direction>; 2],
    registered: Vec<(PlayerId, DuplexStream)>,
) -> Vec<Lane> {
    let mut scripts = scripts.map(Some);
    let mut lanes: Vec<Lane> = registered
        .into_iter()
        .filter_map(|(player, input)| {
            let script = usize::from(player)
                .checked_sub(1)
                .and_then(|index| scripts.get_mut(index))
                .and_then(Option::take);
            match script {
                Some(script) => Some(Lane {
                    player,
                    script,
                    input: Some(input),
                }),
                None => {
                    warn!("No move file for player {}", player);
                    None
                }
            }
        })
        .collect();
    lanes.sort_by_key(|lane| lane.player);
    lanes
}

/// Writes the scripts alternately in lane order, one move every `pace`.
async fn pace_moves(mut lanes: Vec<Lane>, pace: Duration) {
    let rounds = lanes.iter().map(|lane| lane.script.len()).max().unwrap_or(0);

    for round in 0..rounds {
        for lane in lanes.iter_mut() {
            let Some(direction) = lane.script.get(round).copied() else {
                continue;
            };
            let written = match lane.input.as_mut() {
                Some(stream) => stream.write_all(&[direction.code()]).await,
                None => continue,
            };
            match written {
                Ok(()) => info!("Move sent for player {}: {}", lane.player, direction),
                Err(e) => {
                    warn!("Player {} no longer takes moves: {}", lane.player, e);
                    lane.input = None;
                }
            }
            sleep(pace).await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let scripts = [
        parse_script(&std::fs::read_to_string(&args.player1_moves)?),
        parse_script(&std::fs::read_to_string(&args.player2_moves)?),
    ];

    let server_bin = match args.server_bin {
        Some(path) => path,
        None => std::env::current_exe()?.with_file_name("server"),
    };
    info!("Starting {}", server_bin.display());
    let mut server = Command::new(&server_bin)
        .arg(args.port.to_string())
        .arg(&args.map_file)
        .arg("--test")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let startup = Duration::from_millis(args.startup_ms);
    sleep(startup).await;

    let mut config = ClientConfig::new(format!("127.0.0.1:{}", args.port));
    config.encoding = MovementEncoding::Raw;

    // Staggered so the first connection takes seat 1.
    let mut pending = Vec::new();
    let mut players = Vec::new();
    for slot in 0..scripts.len() {
        if slot > 0 {
            sleep(startup).await;
        }
        let (writer, moves) = duplex(64);
        let (registered_tx, registered_rx) = oneshot::channel();
        pending.push((writer, registered_rx));
        players.push(tokio::spawn(play(config.clone(), moves, registered_tx)));
    }

    let mut registered = Vec::new();
    for (writer, registration) in pending {
        match registration.await {
            Ok(player) => {
                info!("Player {} registered", player);
                registered.push((player, writer));
            }
            Err(_) => warn!("A player failed to register"),
        }
    }
    let lanes = assign_scripts(scripts, registered);

    info!("Sending moves every {} ms", args.pace_ms);
    pace_moves(lanes, Duration::from_millis(args.pace_ms)).await;

    for player in players {
        match player.await? {
            Ok((player, tally)) => info!(
                "Player {}: {} updates, winner {:?}, scores {:?}, forfeit {:?}",
                player, tally.updates, tally.winner, tally.last_scores, tally.forfeit
            ),
            Err(e) => warn!("Session failed: {}", e),
        }
    }

    let status = server.wait().await?;
    info!("Server exited with {}", status);

    Ok(())
}
