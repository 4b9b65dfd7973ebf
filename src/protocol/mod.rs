//! Protocol module
//!
//! This module contains the presence event protocol:
//! - Identity, pose and payload types shared by server and client
//! - Client and server message enums with their JSON text-frame encoding

pub mod messages;
pub mod types;

pub use messages::{ClientMessage, ServerMessage};
pub use types::{EnterPayload, ParticipantId, ParticipantUpdate, Pose, UpdatePayload};
