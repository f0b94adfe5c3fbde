//! # Duel Client Library
//!
//! Client side of the two-player session protocol. The client does not draw
//! anything itself: a graphical front end (or a scripted input stream) sits
//! on the other side and exchanges raw bytes with it.
//!
//! ## Session Flow
//!
//! 1. Connect to the server and read exactly one registration frame. An id
//!    of `0` means the server turned us away.
//! 2. Relay direction bytes from the front end to the server as movement
//!    frames, dropping anything outside `0..=3`.
//! 3. Relay every broadcast byte from the server to the front end verbatim.
//!
//! The session ends when the server closes the connection or the front end
//! stops accepting updates.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! `ClientSession`: registration and the two relay duties.
//!
//! ### Input Module (`input`)
//! Movement relay and move-file parsing for scripted players.
//!
//! ### Frontend Module (`frontend`)
//! Spawning the graphical front end as a child process with piped stdio.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{ClientConfig, ClientSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = ClientSession::connect(&ClientConfig::new("127.0.0.1:15563")).await?;
//!     session.run(tokio::io::stdin(), tokio::io::stdout()).await?;
//!     Ok(())
//! }
//! ```

pub mod frontend;
pub mod input;
pub mod network;
