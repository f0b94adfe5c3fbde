//! Local movement sources: the front end's byte stream and scripted move
//! files.

use log::{debug, warn};
use shared::protocol::{read_movement, write_movement, MovementEncoding};
use shared::{Direction, ProtocolError};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Forwards every valid direction read from `input` to the server as a
/// movement frame. Out-of-range bytes are dropped. When `input` ends the
/// write half is shut down so the server sees the player leave.
///
/// Returns the number of moves sent.
pub async fn relay_moves<I, W>(
    mut input: I,
    mut server: W,
    encoding: MovementEncoding,
) -> Result<usize, ProtocolError>
where
    I: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut sent = 0;

    loop {
        let direction = match read_movement(&mut input).await {
            Ok(Some(direction)) => direction,
            Ok(None) => break,
            Err(e) if e.is_discardable() => {
                debug!("Dropping local input: {}", e);
                continue;
            }
            Err(e) => return Err(e),
        };

        write_movement(&mut server, direction, encoding).await?;
        sent += 1;
    }

    server.shutdown().await?;
    Ok(sent)
}

/// Parses a move file: `v` `>` `<` `^` separated by optional whitespace.
/// Unknown symbols are reported and played as DOWN.
pub fn parse_script(script: &str) -> Vec<Direction> {
    script
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|symbol| {
            Direction::from_symbol(symbol).unwrap_or_else(|| {
                warn!("Invalid move symbol {:?}, playing DOWN", symbol);
                Direction::Down
            })
        })
        .collect()
}
