use crate::input::relay_moves;
use log::{debug, error, info, warn};
use shared::protocol::{read_broadcast, read_registration, MovementEncoding, REFUSED};
use shared::{PlayerId, ProtocolError};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot connect to {0}: {1}")]
    Connect(String, io::Error),

    #[error("registration refused by the server")]
    Refused,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("connection error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    /// Encoding used for outgoing movement frames.
    pub encoding: MovementEncoding,
}

impl ClientConfig {
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            encoding: MovementEncoding::Tagged,
        }
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The server closed the connection.
    ServerClosed,
    /// The local front end stopped accepting broadcasts.
    FrontendClosed,
}

/// A registered connection to the game server.
pub struct ClientSession<S> {
    stream: S,
    player_id: PlayerId,
    encoding: MovementEncoding,
}

impl ClientSession<TcpStream> {
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        info!("Connecting to {}", config.server_addr);
        let stream = TcpStream::connect(&config.server_addr)
            .await
            .map_err(|e| ClientError::Connect(config.server_addr.clone(), e))?;
        stream.set_nodelay(true)?;

        Self::register(stream, config.encoding).await
    }
}

impl<S> ClientSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Waits for the registration frame on an open connection.
    pub async fn register(mut stream: S, encoding: MovementEncoding) -> Result<Self, ClientError> {
        let player_id = read_registration(&mut stream).await?;
        if player_id == REFUSED {
            error!("Registration refused");
            return Err(ClientError::Refused);
        }

        info!("Registered as player {}", player_id);
        Ok(Self {
            stream,
            player_id,
            encoding,
        })
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    /// Relays moves from `input` to the server and broadcasts from the server
    /// to `output` until the server closes the connection or `output` fails.
    ///
    /// Running out of input does not end the session: the server may still
    /// have updates to deliver. The socket is closed on return.
    pub async fn run<I, O>(self, input: I, output: O) -> Result<SessionEnd, ClientError>
    where
        I: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let player_id = self.player_id;
        let (reader, writer) = tokio::io::split(self.stream);

        let outbound = relay_moves(input, writer, self.encoding);
        let inbound = relay_broadcasts(reader, output);
        tokio::pin!(outbound);
        tokio::pin!(inbound);

        let mut input_done = false;
        loop {
            tokio::select! {
                end = &mut inbound => {
                    let end = end?;
                    info!("Player {} session ended: {:?}", player_id, end);
                    return Ok(end);
                }

                sent = &mut outbound, if !input_done => {
                    input_done = true;
                    match sent {
                        Ok(sent) => debug!("Input exhausted after {} moves", sent),
                        Err(e) => warn!("Stopped relaying moves: {}", e),
                    }
                }
            }
        }
    }
}

async fn relay_broadcasts<R, O>(mut server: R, mut output: O) -> Result<SessionEnd, ClientError>
where
    R: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    while let Some(chunk) = read_broadcast(&mut server).await? {
        let delivered = async {
            output.write_all(&chunk).await?;
            output.flush().await
        }
        .await;

        if let Err(e) = delivered {
            warn!("Front end closed: {}", e);
            return Ok(SessionEnd::FrontendClosed);
        }
    }

    let _ = output.shutdown().await;
    Ok(SessionEnd::ServerClosed)
}
