//! Protocol data types
//!
//! Field names follow the wire contract: a participant id travels as `uuid`
//! and its contact string as `social`.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque participant identifier, chosen by the joining client
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier (UUID v4)
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for ParticipantId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Planar position plus heading (radians)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub angle: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, angle: f64) -> Self {
        Self { x, y, angle }
    }

    /// The pose every participant starts with on join
    pub fn origin() -> Self {
        Self::default()
    }
}

/// `enter` payload, sent once per session right after connecting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnterPayload {
    #[serde(rename = "uuid")]
    pub id: ParticipantId,
    pub name: String,
    #[serde(rename = "social", default)]
    pub contact: String,
}

/// Client-to-server `update` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePayload {
    #[serde(rename = "uuid")]
    pub id: ParticipantId,
    #[serde(flatten)]
    pub pose: Pose,
}

/// Server-to-client `update` payload
///
/// Carries the name and contact as well as the pose so that a client seeing
/// an id for the first time can create its shadow without a separate lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantUpdate {
    #[serde(rename = "uuid")]
    pub id: ParticipantId,
    #[serde(flatten)]
    pub pose: Pose,
    pub name: String,
    #[serde(rename = "social", default)]
    pub contact: String,
}
