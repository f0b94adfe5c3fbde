//! Update records broadcast by the game engine.
//!
//! A broadcast payload is a sequence of records, each a 4-byte big-endian
//! length followed by a bincode-encoded [`GameUpdate`]. The server core never
//! looks inside a payload; only the engine, front ends and test harnesses do.

use crate::{PlayerId, ProtocolError};
use serde::{Deserialize, Serialize};

/// Upper bound for a single encoded record. Snapshots of the largest maps
/// stay well below it.
pub const MAX_UPDATE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PlayerView {
    pub id: PlayerId,
    pub x: u16,
    pub y: u16,
    pub score: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum GameUpdate {
    Snapshot {
        width: u16,
        height: u16,
        walls: Vec<(u16, u16)>,
        food: Vec<(u16, u16)>,
        players: Vec<PlayerView>,
    },
    Moved {
        player: PlayerId,
        x: u16,
        y: u16,
        score: u32,
    },
    FoodEaten {
        x: u16,
        y: u16,
    },
    GameOver {
        winner: Option<PlayerId>,
        scores: Vec<(PlayerId, u32)>,
    },
    Forfeit {
        leaver: PlayerId,
    },
}

pub fn encode_updates(updates: &[GameUpdate]) -> Result<Vec<u8>, ProtocolError> {
    let mut payload = Vec::new();
    for update in updates {
        let body = bincode::serialize(update)?;
        if body.len() > MAX_UPDATE_SIZE {
            return Err(ProtocolError::PayloadTooLarge(body.len()));
        }
        payload.extend_from_slice(&(body.len() as u32).to_be_bytes());
        payload.extend_from_slice(&body);
    }
    Ok(payload)
}

/// Decodes every complete record in `bytes`. A trailing partial record is an
/// error; callers that read from a stream should use [`UpdateReader`].
pub fn decode_updates(bytes: &[u8]) -> Result<Vec<GameUpdate>, ProtocolError> {
    let mut reader = UpdateReader::new();
    reader.push(bytes);
    let updates = reader.drain()?;
    if reader.pending() > 0 {
        return Err(ProtocolError::Payload(Box::new(bincode::ErrorKind::Custom(
            format!("truncated update record ({} bytes left)", reader.pending()),
        ))));
    }
    Ok(updates)
}

/// Reassembles update records from arbitrarily split broadcast chunks.
#[derive(Debug, Default)]
pub struct UpdateReader {
    buffer: Vec<u8>,
}

impl UpdateReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes buffered that do not yet form a complete record.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Returns every record completed so far.
    pub fn drain(&mut self) -> Result<Vec<GameUpdate>, ProtocolError> {
        let mut updates = Vec::new();
        let mut offset = 0;

        while self.buffer.len() - offset >= 4 {
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&self.buffer[offset..offset + 4]);
            let len = u32::from_be_bytes(len_bytes) as usize;
            if len > MAX_UPDATE_SIZE {
                return Err(ProtocolError::PayloadTooLarge(len));
            }
            if self.buffer.len() - offset - 4 < len {
                break;
            }

            let body = &self.buffer[offset + 4..offset + 4 + len];
            updates.push(bincode::deserialize(body)?);
            offset += 4 + len;
        }

        self.buffer.drain(..offset);
        Ok(updates)
    }
}
