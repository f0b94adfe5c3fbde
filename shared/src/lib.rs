//! Types shared by the duel server and client: the binary wire protocol
//! spoken over the session socket and the update payload the game engine
//! broadcasts through it.

use std::fmt;
use std::io;
use thiserror::Error;

pub mod protocol;
pub mod update;

pub use protocol::{Message, MovementEncoding};
pub use update::GameUpdate;

/// Player identifier assigned by admission order. `0` never names a player;
/// on the wire it means "registration refused".
pub type PlayerId = u8;

/// Seats available in one session.
pub const MAX_PLAYERS: usize = 2;

/// Direction codes as they travel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    Down = 0,
    Right = 1,
    Left = 2,
    Up = 3,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Down,
        Direction::Right,
        Direction::Left,
        Direction::Up,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Grid offset `(dx, dy)` with y growing downwards.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Down => (0, 1),
            Direction::Right => (1, 0),
            Direction::Left => (-1, 0),
            Direction::Up => (0, -1),
        }
    }

    /// Parses the symbols used in scripted movement files.
    pub fn from_symbol(symbol: char) -> Option<Direction> {
        match symbol {
            'v' => Some(Direction::Down),
            '>' => Some(Direction::Right),
            '<' => Some(Direction::Left),
            '^' => Some(Direction::Up),
            _ => None,
        }
    }
}

impl TryFrom<u8> for Direction {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Direction::Down),
            1 => Ok(Direction::Right),
            2 => Ok(Direction::Left),
            3 => Ok(Direction::Up),
            other => Err(ProtocolError::InvalidDirection(other)),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Down => "DOWN",
            Direction::Right => "RIGHT",
            Direction::Left => "LEFT",
            Direction::Up => "UP",
        };
        f.write_str(name)
    }
}

/// Errors raised while reading or writing protocol frames and payloads.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid direction byte {0}")]
    InvalidDirection(u8),

    #[error("unexpected frame tag {0:#04x}")]
    UnexpectedTag(u8),

    #[error("update record too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("malformed update payload: {0}")]
    Payload(#[from] bincode::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Malformed bytes from a peer are dropped and the stream keeps going;
    /// everything else means the connection is no longer usable.
    pub fn is_discardable(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidDirection(_) | ProtocolError::UnexpectedTag(_)
        )
    }
}
