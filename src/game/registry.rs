//! Participant registry
//!
//! The authoritative record of who is present and where. The registry is a
//! plain owned store with no interior locking; the hub wraps it together
//! with the connection table so that a mutation and its broadcast happen
//! under one lock.
//!
//! Invariants:
//! - at most one entry per participant id
//! - a connection owns at most one participant, tracked in `owners`

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::net::session::ConnectionId;
use crate::protocol::types::{ParticipantId, ParticipantUpdate, Pose};

/// Last-known state of a participant
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantState {
    pub id: ParticipantId,
    pub name: String,
    pub contact: String,
    pub pose: Pose,
    /// Connection that owns this participant
    pub connection: ConnectionId,
    /// Time of the last join or move
    pub last_seen: Instant,
}

impl ParticipantState {
    /// Wire representation sent to other clients
    pub fn to_update(&self) -> ParticipantUpdate {
        ParticipantUpdate {
            id: self.id.clone(),
            pose: self.pose,
            name: self.name.clone(),
            contact: self.contact.clone(),
        }
    }
}

/// Result of a move request
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Pose stored
    Applied,
    /// Id not present; nothing changed
    Ignored,
}

/// Mapping from participant id to last-known state
#[derive(Debug, Default)]
pub struct Registry {
    participants: HashMap<ParticipantId, ParticipantState>,
    owners: HashMap<ConnectionId, ParticipantId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a participant at the origin pose
    ///
    /// A repeated join for the same id replaces the previous entry and moves
    /// ownership to `connection`. If `connection` already owned a different
    /// participant, that participant is dropped.
    pub fn join(
        &mut self,
        id: ParticipantId,
        name: impl Into<String>,
        contact: impl Into<String>,
        connection: ConnectionId,
        now: Instant,
    ) {
        if let Some(previous) = self.participants.get(&id) {
            if previous.connection != connection {
                debug!(
                    participant = %id,
                    old_connection = previous.connection,
                    new_connection = connection,
                    "Participant re-joined from another connection"
                );
                self.owners.remove(&previous.connection);
            }
        }

        if let Some(old_id) = self.owners.insert(connection, id.clone()) {
            if old_id != id {
                debug!(
                    connection_id = connection,
                    participant = %old_id,
                    "Connection joined again, dropping its previous participant"
                );
                self.participants.remove(&old_id);
            }
        }

        self.participants.insert(
            id.clone(),
            ParticipantState {
                id,
                name: name.into(),
                contact: contact.into(),
                pose: Pose::origin(),
                connection,
                last_seen: now,
            },
        );
    }

    /// Update the pose of a present participant
    pub fn move_participant(&mut self, id: &ParticipantId, pose: Pose, now: Instant) -> MoveOutcome {
        match self.participants.get_mut(id) {
            Some(state) => {
                state.pose = pose;
                state.last_seen = now;
                MoveOutcome::Applied
            }
            None => MoveOutcome::Ignored,
        }
    }

    /// Remove the participant owned by `connection`, returning its id
    pub fn leave_by_connection(&mut self, connection: ConnectionId) -> Option<ParticipantId> {
        let id = self.owners.remove(&connection)?;
        self.participants.remove(&id);
        Some(id)
    }

    /// Remove a participant by id
    pub fn remove(&mut self, id: &ParticipantId) -> Option<ParticipantState> {
        let state = self.participants.remove(id)?;
        self.owners.remove(&state.connection);
        Some(state)
    }

    /// Full current membership, ordered by id
    pub fn snapshot(&self) -> Vec<ParticipantState> {
        let mut entries: Vec<_> = self.participants.values().cloned().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    /// Participants silent for longer than `threshold`, skipping `exempt`
    pub fn stale(&self, now: Instant, threshold: Duration, exempt: ConnectionId) -> Vec<ParticipantId> {
        self.participants
            .values()
            .filter(|state| state.connection != exempt)
            .filter(|state| now.saturating_duration_since(state.last_seen) > threshold)
            .map(|state| state.id.clone())
            .collect()
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&ParticipantState> {
        self.participants.get(id)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.contains_key(id)
    }

    /// Participant owned by a connection
    pub fn owner_of(&self, connection: ConnectionId) -> Option<&ParticipantId> {
        self.owners.get(&connection)
    }

    /// Whether `connection` owns `id`
    pub fn owns(&self, connection: ConnectionId, id: &ParticipantId) -> bool {
        self.owners.get(&connection) == Some(id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
