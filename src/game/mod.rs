//! Game state module
//!
//! Server-side authoritative presence state.

pub mod registry;

pub use registry::{MoveOutcome, ParticipantState, Registry};
