//! Client runtime
//!
//! Runs a presence client as one cooperative task: a single `select!` loop
//! owns the shadow store, so server events, sweeps and frame ticks never
//! interleave mid-mutation. Only visual instantiation runs elsewhere, on a
//! `JoinSet`, and its results are folded back into the loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use crate::client::collaborators::{MovementSource, PresenceSink, Visuals};
use crate::client::shadow::{ApplyOutcome, ShadowStore};
use crate::client::sweeper::LivenessSweeper;
use crate::config::ClientConfig;
use crate::error::{NetworkError, PresenceError, Result};
use crate::net::transport::{Inbound, WebSocketTransport};
use crate::protocol::messages::{ClientMessage, ServerMessage};
use crate::protocol::types::ParticipantId;

type Instantiations<H> = JoinSet<(ParticipantId, anyhow::Result<H>)>;

/// A connected presence participant
pub struct PresenceClient<V, S, M>
where
    V: Visuals,
    S: PresenceSink<V::Handle>,
    M: MovementSource,
{
    config: ClientConfig,
    store: ShadowStore<V>,
    sweeper: LivenessSweeper,
    sink: S,
    movement: M,
}

impl<V, S, M> PresenceClient<V, S, M>
where
    V: Visuals,
    S: PresenceSink<V::Handle>,
    M: MovementSource,
{
    pub fn new(config: ClientConfig, local_id: ParticipantId, visuals: Arc<V>, sink: S, movement: M) -> Self {
        let sweeper = LivenessSweeper::new(config.sweep_interval(), config.player_timeout());
        Self {
            config,
            store: ShadowStore::new(local_id, visuals),
            sweeper,
            sink,
            movement,
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        self.store.local_id()
    }

    pub fn store(&self) -> &ShadowStore<V> {
        &self.store
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Connect to the configured server and run until shutdown or disconnect
    pub async fn run(&mut self, shutdown_rx: &mut broadcast::Receiver<()>) -> Result<()> {
        self.config
            .validate()
            .map_err(|e| PresenceError::Config(format!("{:#}", e)))?;

        let (ws_stream, _) = connect_async(self.config.server_url.as_str())
            .await
            .map_err(NetworkError::from)?;
        info!(url = %self.config.server_url, participant = %self.local_id(), "Connected to presence server");

        self.run_with_transport(WebSocketTransport::new(ws_stream), shutdown_rx)
            .await
    }

    /// Run over an already-established transport
    pub async fn run_with_transport<T>(
        &mut self,
        mut transport: WebSocketTransport<T>,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        transport
            .send(&ClientMessage::enter(
                self.local_id().clone(),
                self.config.name.clone(),
                self.config.contact.clone(),
            ))
            .await?;

        let mut instantiations: Instantiations<V::Handle> = JoinSet::new();

        let mut sweep = interval(self.sweeper.period());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut frame = interval(self.config.frame_interval());
        frame.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_frame = Instant::now();

        let result = loop {
            tokio::select! {
                inbound = transport.recv::<ServerMessage>() => {
                    match inbound {
                        Ok(Inbound::Message(message)) => self.handle_server_message(message, &mut instantiations),
                        Ok(Inbound::Closed) => {
                            info!("Presence server closed the connection");
                            break Ok(());
                        }
                        Ok(Inbound::Skip) => {}
                        Ok(Inbound::Invalid(e)) => {
                            warn!(error = %e, "Dropping undecodable server frame");
                        }
                        Err(e) => break Err(e),
                    }
                }
                Some(joined) = instantiations.join_next(), if !instantiations.is_empty() => {
                    match joined {
                        Ok((id, result)) => {
                            self.store.complete_instantiation(id, result, Instant::now(), &mut self.sink);
                        }
                        Err(e) => warn!(error = %e, "Instantiation task cancelled"),
                    }
                }
                _ = sweep.tick() => {
                    self.sweeper.sweep(&mut self.store, Instant::now(), &mut self.sink);
                }
                _ = frame.tick() => {
                    let now = Instant::now();
                    let elapsed = now.saturating_duration_since(last_frame);
                    last_frame = now;

                    if let Some(pose) = self.movement.sample(elapsed) {
                        let message = ClientMessage::update(self.local_id().clone(), pose);
                        if let Err(e) = transport.send(&message).await {
                            break Err(e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("Presence client shutting down");
                    break Ok(());
                }
            }
        };

        instantiations.abort_all();
        if let Err(e) = transport.close().await {
            debug!(error = %e, "Error closing presence connection");
        }
        result
    }

    fn handle_server_message(&mut self, message: ServerMessage, instantiations: &mut Instantiations<V::Handle>) {
        match message {
            ServerMessage::Update(update) => {
                let outcome = self.store.apply_update(update, Instant::now(), &mut self.sink);
                if let ApplyOutcome::Instantiate(request) = outcome {
                    let visuals = self.store.visuals();
                    instantiations.spawn(async move {
                        let result = AssertUnwindSafe(visuals.instantiate(&request.name))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|panic| Err(panic_error(panic)));
                        (request.id, result)
                    });
                }
            }
            ServerMessage::PlayerLeft(id) => {
                self.store.remove(&id, &mut self.sink);
            }
        }
    }
}

fn panic_error(panic: Box<dyn Any + Send>) -> anyhow::Error {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    anyhow::anyhow!("instantiation panicked: {}", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::shadow::tests::{CountingVisuals, Event, RecordingSink};
    use crate::client::shadow::Lifecycle;
    use crate::protocol::types::{ParticipantUpdate, Pose};
    use std::time::Duration;
    use tokio::io::duplex;
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::WebSocketStream;

    struct Still;

    impl MovementSource for Still {
        fn sample(&mut self, _elapsed: Duration) -> Option<Pose> {
            None
        }
    }

    fn peer_update(id: &str) -> ServerMessage {
        ServerMessage::Update(ParticipantUpdate {
            id: ParticipantId::new(id),
            pose: Pose::new(1.0, 1.0, 0.0),
            name: id.to_string(),
            contact: String::new(),
        })
    }

    #[tokio::test]
    async fn test_client_reconciles_server_stream() {
        let (server_io, client_io) = duplex(64 * 1024);
        let mut server = WebSocketTransport::new(
            WebSocketStream::from_raw_socket(server_io, Role::Server, None).await,
        );
        let client_transport = WebSocketTransport::new(
            WebSocketStream::from_raw_socket(client_io, Role::Client, None).await,
        );

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let mut client = PresenceClient::new(
            ClientConfig::default(),
            ParticipantId::new("me"),
            Arc::new(CountingVisuals::default()),
            RecordingSink::default(),
            Still,
        );

        let server_side = async move {
            match server.recv::<ClientMessage>().await.unwrap() {
                Inbound::Message(ClientMessage::Enter(payload)) => assert_eq!(payload.id.as_str(), "me"),
                other => panic!("expected enter, got {:?}", other),
            }

            server.send(&peer_update("me")).await.unwrap();
            server.send(&peer_update("b")).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            server.send(&peer_update("b")).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            server
                .send(&ServerMessage::PlayerLeft(ParticipantId::new("b")))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown_tx.send(()).unwrap();
            server
        };

        let (result, _server) = tokio::join!(
            client.run_with_transport(client_transport, &mut shutdown_rx),
            server_side
        );
        result.unwrap();

        assert_eq!(client.store().lifecycle(&ParticipantId::new("me")), Lifecycle::Absent);
        assert_eq!(client.store().lifecycle(&ParticipantId::new("b")), Lifecycle::Absent);
        assert_eq!(
            client.sink().events,
            vec![
                Event::Appeared("b".to_string()),
                Event::Moved("b".to_string(), Pose::new(1.0, 1.0, 0.0)),
                Event::Left("b".to_string()),
            ]
        );
    }

    /// Visuals whose instantiation panics
    struct PanickingVisuals;

    #[async_trait::async_trait]
    impl Visuals for PanickingVisuals {
        type Handle = u32;

        async fn instantiate(&self, name: &str) -> anyhow::Result<u32> {
            panic!("no model for {}", name);
        }

        fn release(&self, _handle: u32) {}
    }

    /// Visuals that take a while to load
    #[derive(Default)]
    struct SlowVisuals {
        released: parking_lot::Mutex<Vec<u32>>,
    }

    #[async_trait::async_trait]
    impl Visuals for SlowVisuals {
        type Handle = u32;

        async fn instantiate(&self, _name: &str) -> anyhow::Result<u32> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(3)
        }

        fn release(&self, handle: u32) {
            self.released.lock().push(handle);
        }
    }

    async fn transport_pair() -> (
        WebSocketTransport<tokio::io::DuplexStream>,
        WebSocketTransport<tokio::io::DuplexStream>,
    ) {
        let (server_io, client_io) = duplex(64 * 1024);
        let server = WebSocketTransport::new(
            WebSocketStream::from_raw_socket(server_io, Role::Server, None).await,
        );
        let client = WebSocketTransport::new(
            WebSocketStream::from_raw_socket(client_io, Role::Client, None).await,
        );
        (server, client)
    }

    #[tokio::test]
    async fn test_panicking_instantiation_reaches_sink() {
        let (mut server, client_transport) = transport_pair().await;
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let mut client = PresenceClient::new(
            ClientConfig::default(),
            ParticipantId::new("me"),
            Arc::new(PanickingVisuals),
            RecordingSink::default(),
            Still,
        );

        let server_side = async move {
            let _ = server.recv::<ClientMessage>().await.unwrap();
            server.send(&peer_update("b")).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            shutdown_tx.send(()).unwrap();
            server
        };

        let (result, _server) = tokio::join!(
            client.run_with_transport(client_transport, &mut shutdown_rx),
            server_side
        );
        result.unwrap();

        assert_eq!(client.store().lifecycle(&ParticipantId::new("b")), Lifecycle::Pending);
        assert_eq!(client.sink().events, vec![Event::Failed("b".to_string())]);
    }

    #[tokio::test]
    async fn test_leave_during_instantiation_never_appears() {
        let (mut server, client_transport) = transport_pair().await;
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let visuals = Arc::new(SlowVisuals::default());
        let mut client = PresenceClient::new(
            ClientConfig::default(),
            ParticipantId::new("me"),
            visuals.clone(),
            RecordingSink::default(),
            Still,
        );

        let server_side = async move {
            let _ = server.recv::<ClientMessage>().await.unwrap();
            server.send(&peer_update("b")).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            server
                .send(&ServerMessage::PlayerLeft(ParticipantId::new("b")))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(250)).await;
            shutdown_tx.send(()).unwrap();
            server
        };

        let (result, _server) = tokio::join!(
            client.run_with_transport(client_transport, &mut shutdown_rx),
            server_side
        );
        result.unwrap();

        assert_eq!(client.store().lifecycle(&ParticipantId::new("b")), Lifecycle::Absent);
        assert!(client.sink().events.is_empty());
        assert_eq!(*visuals.released.lock(), vec![3]);
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_config() {
        let (_shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let config = ClientConfig {
            name: String::new(),
            // Never dialled
            server_url: "ws://127.0.0.1:1".to_string(),
            ..Default::default()
        };
        let mut client = PresenceClient::new(
            config,
            ParticipantId::new("me"),
            Arc::new(CountingVisuals::default()),
            RecordingSink::default(),
            Still,
        );

        let err = client.run(&mut shutdown_rx).await.unwrap_err();
        assert!(matches!(err, PresenceError::Config(_)));
    }
}
