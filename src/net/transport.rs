//! Transport module
//!
//! Wraps a WebSocket stream and converts between text frames and protocol
//! messages. The same transport serves the server side (accepted streams)
//! and the client side (connected streams).

use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::trace;

use crate::error::{NetworkError, ProtocolError, Result};
use crate::protocol::messages;

/// One inbound frame, classified
#[derive(Debug)]
pub enum Inbound<M> {
    /// A decoded protocol message
    Message(M),
    /// Peer closed the connection (close frame or end of stream)
    Closed,
    /// A frame that carries nothing for the protocol (ping, pong, raw frame)
    ///
    /// Pings are answered by tungstenite itself on the next read or write.
    Skip,
    /// A frame that could not be decoded; the connection stays usable
    Invalid(ProtocolError),
}

/// WebSocket transport carrying JSON text frames
pub struct WebSocketTransport<S> {
    stream: WebSocketStream<S>,
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new transport from an already-upgraded WebSocket stream
    pub fn new(stream: WebSocketStream<S>) -> Self {
        Self { stream }
    }

    /// Read the next frame
    ///
    /// Reads exactly one frame per call, so it can be raced in `select!`
    /// without losing data.
    pub async fn recv<M: DeserializeOwned>(&mut self) -> Result<Inbound<M>> {
        let message = match self.stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(NetworkError::from(e).into()),
            None => return Ok(Inbound::Closed),
        };

        Ok(match message {
            Message::Text(text) => {
                trace!(len = text.len(), "Received text WebSocket message");
                match messages::decode::<M>(&text) {
                    Ok(decoded) => Inbound::Message(decoded),
                    Err(e) => Inbound::Invalid(e),
                }
            }
            Message::Binary(data) => Inbound::Invalid(ProtocolError::UnexpectedBinaryFrame(data.len())),
            Message::Close(_) => Inbound::Closed,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Inbound::Skip,
        })
    }

    /// Encode and send a protocol message
    pub async fn send<M: Serialize>(&mut self, message: &M) -> Result<()> {
        let text = messages::encode(message)?;
        trace!(len = text.len(), "Sending text WebSocket message");
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| NetworkError::from(e).into())
    }

    /// Close the WebSocket connection gracefully
    pub async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            Err(e) => match NetworkError::from(e) {
                // Peer already went away
                NetworkError::ConnectionClosed => Ok(()),
                other => Err(other.into()),
            },
        }
    }
}
