//! Presence client
//!
//! Mirrors the server's participant set locally as shadow participants and
//! reports the local participant's movement.

pub mod collaborators;
pub mod headless;
pub mod runtime;
pub mod shadow;
pub mod sweeper;

pub use collaborators::{MovementSource, PresenceSink, Visuals};
pub use runtime::PresenceClient;
pub use shadow::{ApplyOutcome, Lifecycle, ShadowParticipant, ShadowStore};
pub use sweeper::LivenessSweeper;
