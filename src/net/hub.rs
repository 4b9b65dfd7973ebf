//! Presence hub
//!
//! Owns the participant registry together with the outbound queue of every
//! open connection. Each operation takes the lock once, mutates the
//! registry and queues its broadcasts before releasing it, so handlers for
//! different connections never observe each other's partial state.
//!
//! Outbound queues are unbounded and delivery is fire-and-forget: a
//! message queued for a connection that has already gone away is dropped.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::{HostParticipantConfig, UpdatePolicy};
use crate::game::registry::{MoveOutcome, ParticipantState, Registry};
use crate::net::session::{ConnectionId, HOST_CONNECTION};
use crate::protocol::messages::ServerMessage;
use crate::protocol::types::{EnterPayload, ParticipantId, UpdatePayload};

/// Sending half of a connection's outbound queue
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

/// Receiving half of a connection's outbound queue
pub type Inbox = mpsc::UnboundedReceiver<ServerMessage>;

/// Result of routing a client update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Stored and broadcast to this many other connections
    Broadcast(usize),
    /// No such participant
    UnknownParticipant,
    /// Rejected by the owner-only policy
    NotOwner,
}

struct OpenConnection {
    address: SocketAddr,
    outbound: Outbound,
}

#[derive(Default)]
struct HubInner {
    registry: Registry,
    connections: HashMap<ConnectionId, OpenConnection>,
}

impl HubInner {
    fn deliver(&self, connection: ConnectionId, message: ServerMessage) -> bool {
        let Some(open) = self.connections.get(&connection) else {
            return false;
        };
        if open.outbound.send(message).is_err() {
            trace!(connection_id = connection, "Dropped message for closed connection");
            return false;
        }
        true
    }

    /// Queue `message` for every open connection except `except`
    fn broadcast_except(&self, except: Option<ConnectionId>, message: &ServerMessage) -> usize {
        self.connections
            .keys()
            .filter(|&&id| Some(id) != except)
            .filter(|&&id| self.deliver(id, message.clone()))
            .count()
    }
}

/// Shared presence state for all connections
pub struct PresenceHub {
    inner: Mutex<HubInner>,
    next_connection_id: AtomicU64,
    policy: UpdatePolicy,
}

impl PresenceHub {
    pub fn new(policy: UpdatePolicy) -> Self {
        Self {
            inner: Mutex::new(HubInner::default()),
            // 0 is reserved for the host participant
            next_connection_id: AtomicU64::new(HOST_CONNECTION + 1),
            policy,
        }
    }

    pub fn policy(&self) -> UpdatePolicy {
        self.policy
    }

    /// Open a connection and return its id and outbound queue
    pub fn connect(&self, address: SocketAddr) -> (ConnectionId, Inbox) {
        let id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
        let (outbound, inbox) = mpsc::unbounded_channel();

        self.inner
            .lock()
            .connections
            .insert(id, OpenConnection { address, outbound });

        debug!(connection_id = id, address = %address, "Connection opened");
        (id, inbox)
    }

    /// Register the server's own synthetic participant
    pub fn register_host(&self, host: &HostParticipantConfig) {
        let id = ParticipantId::new(host.id.clone());
        self.inner.lock().registry.join(
            id.clone(),
            host.name.clone(),
            host.contact.clone(),
            HOST_CONNECTION,
            Instant::now(),
        );
        info!(participant = %id, name = %host.name, "Host participant registered");
    }

    /// Join a participant and send the full snapshot back to the joiner
    ///
    /// Returns the number of snapshot entries queued.
    pub fn enter(&self, connection: ConnectionId, payload: EnterPayload) -> usize {
        let mut inner = self.inner.lock();

        if inner.registry.contains(&payload.id) {
            debug!(participant = %payload.id, "Duplicate enter, overwriting");
        }
        inner.registry.join(
            payload.id.clone(),
            payload.name,
            payload.contact,
            connection,
            Instant::now(),
        );

        let snapshot = inner.registry.snapshot();
        for state in &snapshot {
            inner.deliver(connection, ServerMessage::Update(state.to_update()));
        }

        info!(
            connection_id = connection,
            participant = %payload.id,
            snapshot = snapshot.len(),
            "Participant entered"
        );
        snapshot.len()
    }

    /// Apply a pose update and broadcast it to every other connection
    pub fn update(&self, connection: ConnectionId, payload: UpdatePayload) -> UpdateOutcome {
        let mut inner = self.inner.lock();

        if self.policy == UpdatePolicy::OwnerOnly
            && inner.registry.contains(&payload.id)
            && !inner.registry.owns(connection, &payload.id)
        {
            warn!(
                connection_id = connection,
                participant = %payload.id,
                "Rejected update for participant owned by another connection"
            );
            return UpdateOutcome::NotOwner;
        }

        match inner
            .registry
            .move_participant(&payload.id, payload.pose, Instant::now())
        {
            MoveOutcome::Applied => {}
            MoveOutcome::Ignored => {
                warn!(
                    connection_id = connection,
                    participant = %payload.id,
                    "Got update for participant not in registry"
                );
                return UpdateOutcome::UnknownParticipant;
            }
        }

        let message = match inner.registry.get(&payload.id) {
            Some(state) => ServerMessage::Update(state.to_update()),
            None => return UpdateOutcome::UnknownParticipant,
        };
        let delivered = inner.broadcast_except(Some(connection), &message);
        trace!(
            connection_id = connection,
            participant = %payload.id,
            delivered,
            "Update broadcast"
        );
        UpdateOutcome::Broadcast(delivered)
    }

    /// Close a connection, broadcasting `player_left` if it owned a participant
    pub fn disconnect(&self, connection: ConnectionId) -> Option<ParticipantId> {
        let mut inner = self.inner.lock();

        let address = inner.connections.remove(&connection).map(|open| open.address);
        let left = inner.registry.leave_by_connection(connection);

        if let Some(id) = &left {
            let delivered = inner.broadcast_except(None, &ServerMessage::PlayerLeft(id.clone()));
            info!(
                connection_id = connection,
                participant = %id,
                delivered,
                "Participant left"
            );
        }

        debug!(connection_id = connection, address = ?address, "Connection closed");
        left
    }

    /// Evict participants silent for longer than `threshold`
    ///
    /// The host participant is never evicted. Each evicted id is broadcast
    /// as `player_left` to every connection other than its owner.
    pub fn sweep_stale(&self, now: Instant, threshold: Duration) -> Vec<ParticipantId> {
        let mut inner = self.inner.lock();
        let stale = inner.registry.stale(now, threshold, HOST_CONNECTION);

        for id in &stale {
            if let Some(state) = inner.registry.remove(id) {
                inner.broadcast_except(Some(state.connection), &ServerMessage::PlayerLeft(id.clone()));
                info!(
                    participant = %id,
                    connection_id = state.connection,
                    idle = ?now.saturating_duration_since(state.last_seen),
                    "Evicted stale participant"
                );
            }
        }

        stale
    }

    /// Run the stale sweep until shutdown
    pub async fn run_stale_sweeper(
        self: Arc<Self>,
        period: Duration,
        threshold: Duration,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) {
        info!(period = ?period, threshold = ?threshold, "Starting stale participant sweep");

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_stale(Instant::now(), threshold);
                }
                _ = shutdown_rx.recv() => {
                    info!("Stale participant sweep shutting down");
                    break;
                }
            }
        }
    }

    /// Full current membership
    pub fn snapshot(&self) -> Vec<ParticipantState> {
        self.inner.lock().registry.snapshot()
    }

    pub fn participant_count(&self) -> usize {
        self.inner.lock().registry.len()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().connections.len()
    }

    /// Participant owned by a connection
    pub fn owner_of(&self, connection: ConnectionId) -> Option<ParticipantId> {
        self.inner.lock().registry.owner_of(connection).cloned()
    }
}

impl Default for PresenceHub {
    fn default() -> Self {
        Self::new(UpdatePolicy::default())
    }
}
