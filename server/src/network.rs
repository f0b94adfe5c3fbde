//! Session coordinator: accepts connections into the lobby, runs matches and
//! loops back to registration.

use crate::game::{GameEngine, GameError};
use crate::lobby::{Admission, Expiry, Lobby, Player, TimeoutPolicy};
use crate::session::{run_match, MatchOutcome, Seat};
use crate::shutdown::requested;
use log::{debug, info, warn};
use shared::protocol::{write_registration, REFUSED};
use shared::PlayerId;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::{sleep_until, Duration, Instant};

pub const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {0}: {1}")]
    Bind(String, io::Error),

    #[error("accept failed: {0}")]
    Accept(io::Error),

    #[error("invalid map: {0}")]
    Map(#[from] GameError),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on, e.g. `0.0.0.0:15563`.
    pub addr: String,
    /// Map description handed to the engine at the start of every match.
    pub map: String,
    /// Shut down after the first match instead of reopening registration.
    pub single_shot: bool,
    pub registration_timeout: Duration,
    pub timeout_policy: TimeoutPolicy,
}

impl ServerConfig {
    pub fn new(addr: impl Into<String>, map: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            map: map.into(),
            single_shot: false,
            registration_timeout: DEFAULT_REGISTRATION_TIMEOUT,
            timeout_policy: TimeoutPolicy::default(),
        }
    }
}

/// Accept errors that leave the listener usable.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::WouldBlock
    )
}

/// Sends a refusal frame and closes the connection.
async fn refuse(mut stream: TcpStream, addr: SocketAddr) {
    if let Err(e) = write_registration(&mut stream, REFUSED).await {
        debug!("Could not send refusal to {}: {}", addr, e);
    }
    let _ = stream.shutdown().await;
}

/// Resolves once the peer hangs up. Bytes sent before the match starts are
/// dropped.
async fn hung_up(stream: &TcpStream) {
    let mut scratch = [0u8; 64];
    loop {
        if stream.readable().await.is_err() {
            return;
        }
        match stream.try_read(&mut scratch) {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(_) => return,
        }
    }
}

async fn waiting_left(waiting: Option<&Player<TcpStream>>) -> PlayerId {
    match waiting {
        Some(player) => {
            hung_up(&player.connection).await;
            player.id
        }
        None => std::future::pending().await,
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Two-player session server.
pub struct Server<E: GameEngine> {
    listener: TcpListener,
    engine: Arc<E>,
    config: ServerConfig,
    shutdown: watch::Receiver<bool>,
    shutting_down: bool,
}

impl<E: GameEngine> Server<E> {
    /// Validates the map and binds the listening socket.
    pub async fn bind(
        config: ServerConfig,
        engine: E,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, ServerError> {
        engine.load(&config.map)?;

        let listener = TcpListener::bind(&config.addr)
            .await
            .map_err(|e| ServerError::Bind(config.addr.clone(), e))?;
        info!("Server listening on {}", config.addr);

        Ok(Server {
            listener,
            engine: Arc::new(engine),
            config,
            shutdown,
            shutting_down: false,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs registration and matches until shutdown (or after one match in
    /// single-shot mode). Returns how each match ended.
    pub async fn run(mut self) -> Result<Vec<MatchOutcome>, ServerError> {
        let mut outcomes = Vec::new();

        loop {
            let players = match self.register().await? {
                Some(players) => players,
                None => break,
            };

            outcomes.push(self.play(players).await?);

            if self.config.single_shot {
                info!("Single-shot mode, shutting down after one match");
                break;
            }
            if self.shutting_down {
                break;
            }
            info!("Registration reopened");
        }

        info!("Server stopped after {} match(es)", outcomes.len());
        Ok(outcomes)
    }

    /// Fills the lobby. Returns `None` when shutdown was requested first.
    async fn register(&mut self) -> Result<Option<Vec<Player<TcpStream>>>, ServerError> {
        let mut lobby = Lobby::new(
            self.config.registration_timeout,
            self.config.timeout_policy,
        );

        loop {
            let deadline = lobby.deadline();

            tokio::select! {
                _ = requested(&mut self.shutdown), if !self.shutting_down => {
                    info!("Shutdown requested during registration");
                    self.shutting_down = true;
                    for player in lobby.drain() {
                        refuse(player.connection, player.addr).await;
                    }
                    return Ok(None);
                }

                left = waiting_left(lobby.waiting()) => {
                    info!("Player {} left before an opponent arrived", left);
                    lobby.drain();
                }

                _ = until(deadline) => match lobby.expire(Instant::now()) {
                    Expiry::Evicted(player) => refuse(player.connection, player.addr).await,
                    Expiry::Solo(players) => return Ok(Some(players)),
                    Expiry::Pending => {}
                },

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => match lobby.admit(stream, addr, Instant::now()) {
                        Admission::Waiting { player_id } => {
                            debug!("Player {} waiting for an opponent", player_id);
                        }
                        Admission::Ready(players) => return Ok(Some(players)),
                    },
                    Err(e) if is_transient(&e) => warn!("Accept interrupted, retrying: {}", e),
                    Err(e) => return Err(ServerError::Accept(e)),
                },
            }
        }
    }

    /// Runs one match while turning away anyone else who connects.
    async fn play(&mut self, players: Vec<Player<TcpStream>>) -> Result<MatchOutcome, ServerError> {
        let seats: Vec<_> = players
            .into_iter()
            .map(|player| {
                let (reader, writer) = player.connection.into_split();
                Seat {
                    id: player.id,
                    reader,
                    writer,
                }
            })
            .collect();

        let map = self.config.map.clone();
        let game = run_match(Arc::clone(&self.engine), &map, seats);
        tokio::pin!(game);

        loop {
            tokio::select! {
                outcome = &mut game => return Ok(outcome),

                _ = requested(&mut self.shutdown), if !self.shutting_down => {
                    info!("Shutdown requested, waiting for the current match to end");
                    self.shutting_down = true;
                }

                accepted = self.listener.accept(), if !self.shutting_down => match accepted {
                    Ok((stream, addr)) => {
                        info!("Session full, refusing {}", addr);
                        refuse(stream, addr).await;
                    }
                    Err(e) if is_transient(&e) => warn!("Accept interrupted, retrying: {}", e),
                    Err(e) => return Err(ServerError::Accept(e)),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Maze;
    use shared::protocol::{read_registration, MOVEMENT_TAG, REGISTRATION_TAG};
    use shared::update::{GameUpdate, UpdateReader};
    use shared::Direction;
    use tokio::io::AsyncReadExt;
    use tokio::time::timeout;

    const MAP: &str = "#1..2#\n";

    fn config() -> ServerConfig {
        let mut config = ServerConfig::new("127.0.0.1:0", MAP);
        config.registration_timeout = Duration::from_millis(200);
        config
    }

    /// Reads from `stream` until `count` updates have arrived.
    async fn updates(stream: &mut TcpStream, count: usize) -> Vec<GameUpdate> {
        let mut reader = UpdateReader::new();
        let mut received = Vec::new();
        while received.len() < count {
            let mut chunk = [0u8; 512];
            let len = timeout(Duration::from_secs(2), stream.read(&mut chunk))
                .await
                .unwrap()
                .unwrap();
            assert!(len > 0, "connection closed early");
            reader.push(&chunk[..len]);
            received.extend(reader.drain().unwrap());
        }
        received
    }

    #[test]
    fn test_transient_accept_errors() {
        for kind in [
            io::ErrorKind::Interrupted,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::WouldBlock,
        ] {
            assert!(is_transient(&io::Error::from(kind)));
        }
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::new("0.0.0.0:15563", MAP);
        assert_eq!(config.registration_timeout, Duration::from_secs(30));
        assert_eq!(config.timeout_policy, TimeoutPolicy::Evict);
        assert!(!config.single_shot);
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_map() {
        let (_tx, rx) = watch::channel(false);
        let config = ServerConfig::new("127.0.0.1:0", "#1#\n");
        match Server::bind(config, Maze, rx).await {
            Err(ServerError::Map(GameError::MissingSpawn(2))) => {}
            other => panic!("expected map error, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_shutdown_during_registration() {
        let (tx, rx) = watch::channel(false);
        let server = Server::bind(config(), Maze, rx).await.unwrap();
        let addr = server.local_addr().unwrap();
        let running = tokio::spawn(server.run());

        let mut waiting = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let outcomes = timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(outcomes.is_empty());

        assert_eq!(read_registration(&mut waiting).await.unwrap(), REFUSED);
        assert_eq!(waiting.read(&mut [0u8; 8]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_timeout_notice_then_fresh_registration() {
        let (tx, rx) = watch::channel(false);
        let server = Server::bind(config(), Maze, rx).await.unwrap();
        let addr = server.local_addr().unwrap();
        let running = tokio::spawn(server.run());

        let mut lonely = TcpStream::connect(addr).await.unwrap();
        let mut frame = [0u8; 2];
        timeout(Duration::from_secs(2), lonely.read_exact(&mut frame))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, [REGISTRATION_TAG, REFUSED]);
        assert_eq!(lonely.read(&mut [0u8; 8]).await.unwrap(), 0);

        // The lobby is empty again: two new players get ids 1 and 2.
        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();
        assert_eq!(read_registration(&mut first).await.unwrap(), 1);
        assert_eq!(read_registration(&mut second).await.unwrap(), 2);

        drop(first);
        drop(second);
        tx.send(true).unwrap();
        let outcomes = timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcomes.len(), 1);
    }

    #[tokio::test]
    async fn test_solo_policy_starts_match() {
        let (_tx, rx) = watch::channel(false);
        let mut config = config();
        config.timeout_policy = TimeoutPolicy::PlaySolo;
        config.single_shot = true;
        let server = Server::bind(config, Maze, rx).await.unwrap();
        let addr = server.local_addr().unwrap();
        let running = tokio::spawn(server.run());

        let mut lonely = TcpStream::connect(addr).await.unwrap();
        assert_eq!(
            timeout(Duration::from_secs(2), read_registration(&mut lonely))
                .await
                .unwrap()
                .unwrap(),
            1
        );
        drop(lonely);

        let outcomes = timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcomes, vec![MatchOutcome::Abandoned { leaver: 1 }]);
    }

    #[tokio::test]
    async fn test_shutdown_during_match_drains() {
        let (tx, rx) = watch::channel(false);
        let server = Server::bind(config(), Maze, rx).await.unwrap();
        let addr = server.local_addr().unwrap();
        let running = tokio::spawn(server.run());

        let mut first = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let mut second = TcpStream::connect(addr).await.unwrap();
        assert_eq!(read_registration(&mut first).await.unwrap(), 1);
        assert_eq!(read_registration(&mut second).await.unwrap(), 2);

        tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Latecomers are no longer answered.
        let mut late = TcpStream::connect(addr).await.unwrap();
        assert!(
            timeout(Duration::from_millis(200), late.read(&mut [0u8; 2]))
                .await
                .is_err()
        );

        // The running match carries on.
        first
            .write_all(&[MOVEMENT_TAG, Direction::Right.code()])
            .await
            .unwrap();
        let seen = updates(&mut second, 2).await;
        assert!(matches!(seen[0], GameUpdate::Snapshot { .. }));
        assert!(matches!(seen[1], GameUpdate::Moved { player: 1, x: 2, .. }));
        assert!(!running.is_finished());

        drop(second);
        let outcomes = timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcomes, vec![MatchOutcome::Abandoned { leaver: 2 }]);
    }

    #[tokio::test]
    async fn test_waiting_player_hang_up_frees_seat() {
        let (tx, rx) = watch::channel(false);
        let mut config = config();
        config.registration_timeout = Duration::from_secs(5);
        let server = Server::bind(config, Maze, rx).await.unwrap();
        let addr = server.local_addr().unwrap();
        let running = tokio::spawn(server.run());

        let gone = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(gone);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let mut second = TcpStream::connect(addr).await.unwrap();
        assert_eq!(
            timeout(Duration::from_secs(2), read_registration(&mut first))
                .await
                .unwrap()
                .unwrap(),
            1
        );
        assert_eq!(read_registration(&mut second).await.unwrap(), 2);

        drop(first);
        drop(second);
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        let outcomes = timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcomes.len(), 1);
    }
}
