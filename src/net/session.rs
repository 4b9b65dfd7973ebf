//! Session management module
//!
//! One `Session` per transport connection, driving the per-connection state
//! machine:
//!
//! ```text
//! Connected --enter--> Joined --close--> Closed
//!     |                                    ^
//!     +---------------close----------------+
//! ```
//!
//! - `Connected` accepts only `enter`; anything else is dropped.
//! - `Joined` accepts `update`; a second `enter` is dropped.
//! - `Closed` is terminal.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::net::hub::{Inbox, PresenceHub, UpdateOutcome};
use crate::protocol::messages::ClientMessage;
use crate::protocol::types::ParticipantId;

/// Unique connection identifier
pub type ConnectionId = u64;

/// Connection handle reserved for the server's synthetic host participant
pub const HOST_CONNECTION: ConnectionId = 0;

/// Session state in the connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Transport open, waiting for `enter`
    Connected,
    /// Participant registered, accepting updates
    Joined,
    /// Transport closed
    Closed,
}

impl SessionState {
    /// Get a human-readable name for the state
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Connected => "Connected",
            SessionState::Joined => "Joined",
            SessionState::Closed => "Closed",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Why an inbound event was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Event other than `enter` before joining
    NotJoined,
    /// `enter` after already joining
    AlreadyJoined,
    /// `update` for an id not in the registry
    UnknownParticipant,
    /// `update` for an id owned by another connection
    NotOwner,
    /// Event after close
    Closed,
}

/// What a session did with an inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Joined; this many snapshot entries were queued
    Joined { snapshot: usize },
    /// Update stored and broadcast to this many connections
    Moved { delivered: usize },
    /// Dropped without effect
    Ignored(IgnoreReason),
}

/// A connected client session
pub struct Session {
    /// Unique connection identifier
    pub id: ConnectionId,
    /// Remote address of the client
    pub address: SocketAddr,
    /// Time of session creation
    pub created_at: Instant,
    state: SessionState,
    participant: Option<ParticipantId>,
    hub: Arc<PresenceHub>,
}

impl Session {
    /// Open a session on `hub`, returning it with the connection's outbound queue
    pub fn open(hub: Arc<PresenceHub>, address: SocketAddr) -> (Self, Inbox) {
        let (id, inbox) = hub.connect(address);
        let session = Self {
            id,
            address,
            created_at: Instant::now(),
            state: SessionState::Connected,
            participant: None,
            hub,
        };
        (session, inbox)
    }

    /// Get the current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Participant announced by this session's `enter`
    pub fn participant(&self) -> Option<&ParticipantId> {
        self.participant.as_ref()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn set_state(&mut self, new_state: SessionState) {
        let old_state = self.state;
        self.state = new_state;
        debug!(
            connection_id = self.id,
            old_state = %old_state,
            new_state = %new_state,
            "Session state changed"
        );
    }

    /// Handle one inbound client event
    pub fn handle(&mut self, message: ClientMessage) -> Dispatch {
        match (self.state, message) {
            (SessionState::Closed, message) => {
                debug!(
                    connection_id = self.id,
                    event = message.event_name(),
                    "Event after close dropped"
                );
                Dispatch::Ignored(IgnoreReason::Closed)
            }
            (SessionState::Connected, ClientMessage::Enter(payload)) => {
                self.participant = Some(payload.id.clone());
                let snapshot = self.hub.enter(self.id, payload);
                self.set_state(SessionState::Joined);
                Dispatch::Joined { snapshot }
            }
            (SessionState::Connected, message) => {
                debug!(
                    connection_id = self.id,
                    event = message.event_name(),
                    "Event before enter dropped"
                );
                Dispatch::Ignored(IgnoreReason::NotJoined)
            }
            (SessionState::Joined, ClientMessage::Enter(payload)) => {
                warn!(
                    connection_id = self.id,
                    participant = %payload.id,
                    "Repeated enter on joined session dropped"
                );
                Dispatch::Ignored(IgnoreReason::AlreadyJoined)
            }
            (SessionState::Joined, ClientMessage::Update(payload)) => {
                match self.hub.update(self.id, payload) {
                    UpdateOutcome::Broadcast(delivered) => Dispatch::Moved { delivered },
                    UpdateOutcome::UnknownParticipant => {
                        Dispatch::Ignored(IgnoreReason::UnknownParticipant)
                    }
                    UpdateOutcome::NotOwner => Dispatch::Ignored(IgnoreReason::NotOwner),
                }
            }
        }
    }

    /// Close the session, returning the participant that left if any
    ///
    /// Safe to call more than once; only the first call has an effect.
    pub fn close(&mut self) -> Option<ParticipantId> {
        if self.state == SessionState::Closed {
            return None;
        }
        let left = self.hub.disconnect(self.id);
        self.set_state(SessionState::Closed);
        left
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state)
            .field("participant", &self.participant)
            .field("created_at", &self.created_at)
            .finish()
    }
}
