//! Game phase of a session: one handler task per player feeding moves into
//! the shared state, and one broadcaster task fanning the resulting updates
//! out to every player.
//!
//! ```text
//!   player 1 socket ──read──> handler 1 ─┐   lock(state)
//!                                         ├─> apply_move + enqueue ──> events ──> broadcaster ──write──> all sockets
//!   player 2 socket ──read──> handler 2 ─┘
//! ```
//!
//! The lock covers exactly `apply_move` and the enqueue of its payload, so the
//! order of events on the channel always matches the order in which the state
//! was mutated. No socket I/O happens while the lock is held. The
//! broadcaster never touches the state; it only sees payloads.
//!
//! The end of the match is recorded inside the same lock as the final (or
//! forfeit) payload, so no move can be applied after it.

use crate::game::GameEngine;
use log::{debug, error, info, warn};
use shared::protocol::{read_movement, write_registration, REFUSED};
use shared::PlayerId;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;

/// How a match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The engine reported the match over.
    Finished,
    /// A player dropped out; the others were told and the match was closed.
    Abandoned { leaver: PlayerId },
    /// The match could not start.
    Aborted,
}

/// One registered player's connection, split for concurrent use by its
/// handler (reads) and the broadcaster (writes).
pub struct Seat<R, W> {
    pub id: PlayerId,
    pub reader: R,
    pub writer: W,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerExit {
    GameOver,
    Disconnected,
    Stopped,
}

/// Game state plus the flag closing it to further moves.
struct Table<S> {
    state: S,
    closed: bool,
}

struct PlayerHandler<E: GameEngine, R> {
    id: PlayerId,
    reader: R,
    engine: Arc<E>,
    table: Arc<Mutex<Table<E::State>>>,
    events: mpsc::UnboundedSender<Vec<u8>>,
    over: watch::Receiver<bool>,
}

impl<E, R> PlayerHandler<E, R>
where
    E: GameEngine,
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn run(mut self) -> (PlayerId, HandlerExit) {
        let exit = self.relay_moves().await;
        debug!("Handler for player {} exiting ({:?})", self.id, exit);
        (self.id, exit)
    }

    async fn relay_moves(&mut self) -> HandlerExit {
        loop {
            let read = tokio::select! {
                biased;
                _ = match_over(&mut self.over) => return HandlerExit::Stopped,
                read = read_movement(&mut self.reader) => read,
            };

            let direction = match read {
                Ok(Some(direction)) => direction,
                Ok(None) => {
                    info!("Player {} closed the connection", self.id);
                    return HandlerExit::Disconnected;
                }
                Err(e) if e.is_discardable() => {
                    debug!("Discarding frame from player {}: {}", self.id, e);
                    continue;
                }
                Err(e) => {
                    warn!("Read error from player {}: {}", self.id, e);
                    return HandlerExit::Disconnected;
                }
            };

            let mut table = self.table.lock().await;
            if table.closed {
                debug!("Dropping {} from player {}: match over", direction, self.id);
                return HandlerExit::Stopped;
            }
            let outcome = match self.engine.apply_move(&mut table.state, self.id, direction) {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Failed to apply {} from player {}: {}", direction, self.id, e);
                    continue;
                }
            };
            // Enqueued before the lock is released.
            table.closed = outcome.over;
            if self.events.send(outcome.payload).is_err() {
                return HandlerExit::Stopped;
            }
            drop(table);

            if outcome.over {
                return HandlerExit::GameOver;
            }
        }
    }
}

/// Resolves once the match-over flag is raised or its sender is gone.
async fn match_over(over: &mut watch::Receiver<bool>) {
    while !*over.borrow() {
        if over.changed().await.is_err() {
            return;
        }
    }
}

struct Recipient<W> {
    id: PlayerId,
    writer: W,
    alive: bool,
}

/// Writes every event to every player, in player-id order.
pub struct Broadcaster<W> {
    recipients: Vec<Recipient<W>>,
}

impl<W> Broadcaster<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(writers: Vec<(PlayerId, W)>) -> Self {
        let mut recipients: Vec<Recipient<W>> = writers
            .into_iter()
            .map(|(id, writer)| Recipient {
                id,
                writer,
                alive: true,
            })
            .collect();
        recipients.sort_by_key(|recipient| recipient.id);
        Self { recipients }
    }

    /// Tells each player which id it plays as.
    pub async fn announce_registrations(&mut self) {
        for recipient in &mut self.recipients {
            if let Err(e) = write_registration(&mut recipient.writer, recipient.id).await {
                warn!("Failed to register player {}: {}", recipient.id, e);
                recipient.alive = false;
            }
        }
    }

    /// Best-effort delivery: a failing player is skipped from then on and
    /// the others still receive the payload.
    pub async fn deliver(&mut self, payload: &[u8]) {
        for recipient in self.recipients.iter_mut().filter(|r| r.alive) {
            let result = async {
                recipient.writer.write_all(payload).await?;
                recipient.writer.flush().await
            }
            .await;

            if let Err(e) = result {
                warn!("Dropping broadcast to player {}: {}", recipient.id, e);
                recipient.alive = false;
            }
        }
    }

    /// Relays events until every producer has gone, then closes the writers.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<Vec<u8>>) {
        self.announce_registrations().await;

        let mut delivered = 0usize;
        while let Some(payload) = events.recv().await {
            self.deliver(&payload).await;
            delivered += 1;
        }
        debug!("Broadcaster drained after {} events", delivered);

        for recipient in &mut self.recipients {
            let _ = recipient.writer.shutdown().await;
        }
    }
}

/// Runs one match to completion and releases every per-match resource
/// before returning.
pub async fn run_match<E, R, W>(engine: Arc<E>, map: &str, seats: Vec<Seat<R, W>>) -> MatchOutcome
where
    E: GameEngine,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let loaded = engine
        .load(map)
        .and_then(|state| engine.snapshot(&state).map(|snapshot| (state, snapshot)));
    let (state, snapshot) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Cannot start match: {}", e);
            for mut seat in seats {
                let _ = write_registration(&mut seat.writer, REFUSED).await;
                let _ = seat.writer.shutdown().await;
            }
            return MatchOutcome::Aborted;
        }
    };

    let ids: Vec<PlayerId> = seats.iter().map(|seat| seat.id).collect();
    info!("Match started with players {:?}", ids);

    // Fully initialized before any handler can observe it.
    let table = Arc::new(Mutex::new(Table {
        state,
        closed: false,
    }));
    let (event_tx, event_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (over_tx, over_rx) = watch::channel(false);
    let _ = event_tx.send(snapshot);

    let mut writers = Vec::with_capacity(seats.len());
    let mut handlers = JoinSet::new();
    for seat in seats {
        writers.push((seat.id, seat.writer));
        handlers.spawn(
            PlayerHandler {
                id: seat.id,
                reader: seat.reader,
                engine: Arc::clone(&engine),
                table: Arc::clone(&table),
                events: event_tx.clone(),
                over: over_rx.clone(),
            }
            .run(),
        );
    }
    let broadcaster = tokio::spawn(Broadcaster::new(writers).run(event_rx));

    let mut outcome = None;
    while let Some(joined) = handlers.join_next().await {
        let (id, exit) = match joined {
            Ok(report) => report,
            Err(e) => {
                error!("Player handler failed: {}", e);
                outcome.get_or_insert(MatchOutcome::Aborted);
                table.lock().await.closed = true;
                over_tx.send_replace(true);
                continue;
            }
        };

        match exit {
            HandlerExit::GameOver => {
                info!("Player {} made the final move", id);
                outcome.get_or_insert(MatchOutcome::Finished);
                over_tx.send_replace(true);
            }
            HandlerExit::Disconnected if outcome.is_none() => {
                let mut table = table.lock().await;
                if table.closed {
                    // The final move landed before the disconnect was seen.
                    outcome = Some(MatchOutcome::Finished);
                } else {
                    outcome = Some(MatchOutcome::Abandoned { leaver: id });
                    table.closed = true;
                    match engine.forfeit(&table.state, id) {
                        Ok(payload) => {
                            let _ = event_tx.send(payload);
                        }
                        Err(e) => error!("Failed to build forfeit notice: {}", e),
                    }
                }
                drop(table);
                over_tx.send_replace(true);
            }
            HandlerExit::Disconnected | HandlerExit::Stopped => {}
        }
    }

    drop(event_tx);
    if let Err(e) = broadcaster.await {
        error!("Broadcaster failed: {}", e);
    }

    let outcome = outcome.unwrap_or(MatchOutcome::Finished);
    info!("Match over: {:?}", outcome);
    outcome
}
