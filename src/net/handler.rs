//! Connection handler module
//!
//! Handles the lifecycle of one client connection:
//! - WebSocket upgrade
//! - Session registration with the hub
//! - Inbound frame routing into the session state machine
//! - Draining the connection's outbound queue onto the socket
//! - Closing the session (and broadcasting `player_left`) however the loop ends

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::accept_async;
use tracing::{debug, info, trace, warn};

use crate::error::{NetworkError, Result};
use crate::net::hub::Inbox;
use crate::net::session::{Dispatch, Session};
use crate::net::transport::{Inbound, WebSocketTransport};
use crate::protocol::messages::ClientMessage;
use crate::AppState;

/// Connection handler for processing client connections
pub struct ConnectionHandler {
    /// Shared application state
    state: Arc<AppState>,
}

impl ConnectionHandler {
    /// Create a new connection handler
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Handle a WebSocket connection
    pub async fn handle_websocket(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(address = %addr, "Handling WebSocket connection");

        stream.set_nodelay(true)?;

        let ws_stream = accept_async(stream)
            .await
            .map_err(NetworkError::from)?;

        info!(address = %addr, "WebSocket connection established");

        self.handle_connection(WebSocketTransport::new(ws_stream), addr)
            .await
    }

    /// Main connection handling loop over an upgraded transport
    pub async fn handle_connection<S>(
        &self,
        mut transport: WebSocketTransport<S>,
        addr: SocketAddr,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut session, mut inbox) = Session::open(self.state.hub.clone(), addr);
        debug!(connection_id = session.id, address = %addr, "Starting connection handler");

        let result = self
            .process_connection(&mut transport, &mut session, &mut inbox)
            .await;

        // Cleanup
        if let Some(participant) = session.close() {
            debug!(
                connection_id = session.id,
                participant = %participant,
                "Session closed with participant"
            );
        }

        if let Err(e) = transport.close().await {
            trace!(connection_id = session.id, error = %e, "Error during transport shutdown");
        }

        debug!(connection_id = session.id, lifetime = ?session.age(), "Connection handler ending");
        result
    }

    async fn process_connection<S>(
        &self,
        transport: &mut WebSocketTransport<S>,
        session: &mut Session,
        inbox: &mut Inbox,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut shutdown_rx = self.state.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                inbound = transport.recv::<ClientMessage>() => {
                    match inbound? {
                        Inbound::Message(message) => {
                            let dispatch = session.handle(message);
                            trace!(connection_id = session.id, ?dispatch, "Event handled");
                            if let Dispatch::Ignored(reason) = dispatch {
                                debug!(connection_id = session.id, ?reason, "Event ignored");
                            }
                        }
                        Inbound::Closed => {
                            debug!(connection_id = session.id, "Connection closed by peer");
                            break;
                        }
                        Inbound::Skip => {}
                        Inbound::Invalid(e) => {
                            warn!(connection_id = session.id, error = %e, "Dropping undecodable frame");
                        }
                    }
                }
                outbound = inbox.recv() => {
                    match outbound {
                        Some(message) => transport.send(&message).await?,
                        None => break,
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!(connection_id = session.id, "Connection closing for shutdown");
                    break;
                }
            }
        }

        Ok(())
    }
}
