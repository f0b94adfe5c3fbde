//! Binary framing for the session socket.
//!
//! Three kinds of message travel between client and server:
//!
//! | Kind         | Bytes               | Direction        |
//! |--------------|---------------------|------------------|
//! | Registration | `[0x0B, player_id]` | server -> client |
//! | Movement     | `[0x0D, direction]` | client -> server |
//! | Movement     | `[direction]`       | client -> server (legacy, untagged) |
//! | Broadcast    | raw payload bytes   | server -> client |
//!
//! The tag values lie outside the direction range `0..=3`, so a reader can
//! tell a tagged movement frame from a legacy one by its first byte alone.
//! That lets the server accept both encodings on the same stream.

use crate::{Direction, PlayerId, ProtocolError};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const REGISTRATION_TAG: u8 = 0x0B;
pub const MOVEMENT_TAG: u8 = 0x0D;

/// Player id carried by a Registration frame that refuses entry.
pub const REFUSED: PlayerId = 0;

/// Size of a single read when relaying broadcast bytes.
pub const BROADCAST_CHUNK: usize = 4096;

/// How movement frames are written by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MovementEncoding {
    /// `[MOVEMENT_TAG, direction]`
    #[default]
    Tagged,
    /// A bare direction byte, as produced by plain test input streams.
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Registration { player_id: PlayerId },
    Movement { direction: Direction },
    Broadcast { payload: Vec<u8> },
}

impl Message {
    pub fn refused() -> Self {
        Message::Registration { player_id: REFUSED }
    }

    /// Serializes the message as it appears on the wire. The encoding only
    /// affects movement frames.
    pub fn to_bytes(&self, encoding: MovementEncoding) -> Vec<u8> {
        match self {
            Message::Registration { player_id } => vec![REGISTRATION_TAG, *player_id],
            Message::Movement { direction } => match encoding {
                MovementEncoding::Tagged => vec![MOVEMENT_TAG, direction.code()],
                MovementEncoding::Raw => vec![direction.code()],
            },
            Message::Broadcast { payload } => payload.clone(),
        }
    }
}

/// Parses a registration frame.
pub fn decode_registration(frame: [u8; 2]) -> Result<PlayerId, ProtocolError> {
    match frame {
        [REGISTRATION_TAG, player_id] => Ok(player_id),
        [tag, _] => Err(ProtocolError::UnexpectedTag(tag)),
    }
}

async fn read_byte<R>(reader: &mut R) -> io::Result<Option<u8>>
where
    R: AsyncRead + Unpin,
{
    match reader.read_u8().await {
        Ok(byte) => Ok(Some(byte)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// Reads the next movement frame, accepting both tagged and legacy encodings.
///
/// Returns `Ok(None)` once the stream ends. A malformed frame yields a
/// discardable error after consuming exactly its bytes, so the caller may
/// keep reading from the same stream.
pub async fn read_movement<R>(reader: &mut R) -> Result<Option<Direction>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let first = match read_byte(reader).await? {
        Some(byte) => byte,
        None => return Ok(None),
    };

    if first != MOVEMENT_TAG {
        return Direction::try_from(first).map(Some);
    }

    match read_byte(reader).await? {
        Some(code) => Direction::try_from(code).map(Some),
        None => Ok(None),
    }
}

/// Reads exactly one registration frame and returns the assigned id.
pub async fn read_registration<R>(reader: &mut R) -> Result<PlayerId, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut frame = [0u8; 2];
    reader.read_exact(&mut frame).await?;
    decode_registration(frame)
}

/// Reads one chunk of broadcast bytes. `Ok(None)` means the peer closed the
/// stream.
pub async fn read_broadcast<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; BROADCAST_CHUNK];
    let len = reader.read(&mut buffer).await?;
    if len == 0 {
        return Ok(None);
    }
    buffer.truncate(len);
    Ok(Some(buffer))
}

pub async fn write_message<W>(
    writer: &mut W,
    message: &Message,
    encoding: MovementEncoding,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&message.to_bytes(encoding)).await?;
    writer.flush().await
}

pub async fn write_registration<W>(writer: &mut W, player_id: PlayerId) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_message(
        writer,
        &Message::Registration { player_id },
        MovementEncoding::Tagged,
    )
    .await
}

pub async fn write_movement<W>(
    writer: &mut W,
    direction: Direction,
    encoding: MovementEncoding,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_message(writer, &Message::Movement { direction }, encoding).await
}
