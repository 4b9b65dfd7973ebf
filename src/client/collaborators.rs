//! Collaborator interfaces
//!
//! The presence client consumes a rendering layer (`Visuals`), a local input
//! layer (`MovementSource`), and reports to a UI layer (`PresenceSink`).
//! None of them are implemented here beyond the headless variants.

use std::time::Duration;

use async_trait::async_trait;

use crate::client::shadow::ShadowParticipant;
use crate::protocol::types::{ParticipantId, Pose};

/// Creates and releases the visual representation of a participant
#[async_trait]
pub trait Visuals: Send + Sync + 'static {
    /// Handle to an instantiated representation
    type Handle: Send + 'static;

    /// Instantiate a representation labelled with `name`; may be slow
    async fn instantiate(&self, name: &str) -> anyhow::Result<Self::Handle>;

    /// Detach a representation from the scene
    fn release(&self, handle: Self::Handle);
}

/// Receives presence changes for the UI layer
pub trait PresenceSink<H> {
    /// A remote participant became visible
    fn player_appeared(&mut self, participant: &ShadowParticipant<H>);

    /// A known remote participant moved
    fn player_moved(&mut self, id: &ParticipantId, pose: Pose);

    /// A remote participant left or timed out
    fn player_left(&mut self, id: &ParticipantId);

    /// Instantiating a participant's representation failed
    fn instantiation_failed(&mut self, id: &ParticipantId, error: &anyhow::Error) {
        tracing::error!(participant = %id, error = %error, "Failed to instantiate participant");
    }
}

/// Source of the local participant's movement
pub trait MovementSource: Send {
    /// Sample the pose for this frame; `None` while the participant is not moving
    fn sample(&mut self, elapsed: Duration) -> Option<Pose>;
}
