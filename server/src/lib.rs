//! # Duel Server Library
//!
//! This library implements the backend of a two-player real-time game. It
//! admits exactly two clients into a session, relays their moves into a
//! shared game state and broadcasts every resulting update back to both of
//! them over their TCP connections.
//!
//! ## Core Responsibilities
//!
//! ### Registration
//! The first connection takes seat 1 and arms a registration timer. A second
//! connection before the timer fires takes seat 2 and starts the match. If
//! the timer fires first, the lone player receives a refusal frame, is
//! disconnected, and the lobby starts over. Anyone connecting while a match
//! is running is refused immediately without disturbing it.
//!
//! ### Game Phase
//! Each player gets a dedicated handler task that reads its movement frames
//! and applies them to the game state under a single lock. A broadcaster task
//! writes every resulting update to every player in the order the updates
//! were produced.
//!
//! ### Session Lifecycle
//! A match ends when the engine reports it over or when a player drops out.
//! All per-match resources are released before registration reopens, or
//! before the process exits in single-shot mode.
//!
//! ## Architecture Design
//!
//! ### Task Per Role
//! The coordinator, each handler and the broadcaster are independent tokio
//! tasks. Handlers block on their own socket reads without stalling each
//! other; the coordinator keeps accepting (and refusing) connections while a
//! match runs.
//!
//! ### Lock Discipline
//! The game state is guarded by one mutex. The critical section is exactly
//! the engine's `apply_move` call plus the enqueue of its payload onto the
//! broadcaster's channel, so update order always matches mutation order. The
//! lock is never held across socket I/O.
//!
//! ### Explicit Cancellation
//! Termination signals arrive through a `watch` channel passed into the
//! coordinator. During registration a shutdown closes the lobby at once;
//! during a match it stops accepting and lets the match finish.
//!
//! ## Module Organization
//!
//! ### Lobby Module (`lobby`)
//! The registration state machine: seat assignment, deadline bookkeeping and
//! the timeout policy.
//!
//! ### Session Module (`session`)
//! The game phase: player handlers, the broadcaster and match outcome.
//!
//! ### Network Module (`network`)
//! The coordinator that owns the listening socket and drives the lobby and
//! matches in a loop.
//!
//! ### Game Module (`game`)
//! The engine seam (`GameEngine`) and the maze engine served by default.
//!
//! ### Shutdown Module (`shutdown`)
//! Signal handling feeding the coordinator's cancellation channel.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::game::Maze;
//! use server::network::{Server, ServerConfig};
//! use server::shutdown::listen_for_signals;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let map = std::fs::read_to_string("maps/duel.txt")?;
//!     let config = ServerConfig::new("0.0.0.0:15563", map);
//!
//!     let server = Server::bind(config, Maze, listen_for_signals()).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod lobby;
pub mod network;
pub mod session;
pub mod shutdown;
