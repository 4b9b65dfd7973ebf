//! Presence messages
//!
//! Every message is a single JSON object of the form
//! `{"event": <name>, "data": <payload>}` carried in one WebSocket text frame.
//!
//! | direction       | event         | data                                         |
//! |-----------------|---------------|----------------------------------------------|
//! | client → server | `enter`       | `{uuid, name, social}`                       |
//! | client → server | `update`      | `{uuid, x, y, angle}`                        |
//! | server → client | `update`      | `{uuid, x, y, angle, name, social}`          |
//! | server → client | `player_left` | `"<uuid>"`                                   |

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::protocol::types::{
    EnterPayload, ParticipantId, ParticipantUpdate, Pose, UpdatePayload,
};

/// Messages sent from a client to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the shared space
    Enter(EnterPayload),
    /// Report a new pose for a participant
    Update(UpdatePayload),
}

impl ClientMessage {
    pub fn enter(id: ParticipantId, name: impl Into<String>, contact: impl Into<String>) -> Self {
        ClientMessage::Enter(EnterPayload {
            id,
            name: name.into(),
            contact: contact.into(),
        })
    }

    pub fn update(id: ParticipantId, pose: Pose) -> Self {
        ClientMessage::Update(UpdatePayload { id, pose })
    }

    /// Event name as it appears on the wire
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::Enter(_) => "enter",
            ClientMessage::Update(_) => "update",
        }
    }
}

/// Messages sent from the server to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Current state of a participant (snapshot entry or broadcast move)
    Update(ParticipantUpdate),
    /// A participant has left
    PlayerLeft(ParticipantId),
}

impl ServerMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Update(_) => "update",
            ServerMessage::PlayerLeft(_) => "player_left",
        }
    }

    /// Participant the message is about
    pub fn participant(&self) -> &ParticipantId {
        match self {
            ServerMessage::Update(update) => &update.id,
            ServerMessage::PlayerLeft(id) => id,
        }
    }
}

/// Encode a message into its text-frame representation
pub fn encode<M: Serialize>(message: &M) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a text frame into a message
pub fn decode<'a, M: Deserialize<'a>>(text: &'a str) -> Result<M, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_enter() {
        let msg: ClientMessage = decode(
            r#"{"event":"enter","data":{"name":"Alice","social":"","uuid":"a"}}"#,
        )
        .unwrap();
        assert_eq!(msg, ClientMessage::enter(ParticipantId::new("a"), "Alice", ""));
        assert_eq!(msg.event_name(), "enter");
    }

    #[test]
    fn test_decode_client_update() {
        let msg: ClientMessage = decode(
            r#"{"event":"update","data":{"uuid":"a","x":1,"y":2,"angle":0.5}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::update(ParticipantId::new("a"), Pose::new(1.0, 2.0, 0.5))
        );
    }

    #[test]
    fn test_player_left_payload_is_bare_id() {
        let msg = ServerMessage::PlayerLeft(ParticipantId::new("b"));
        assert_eq!(
            encode(&msg).unwrap(),
            r#"{"event":"player_left","data":"b"}"#
        );
    }

    #[test]
    fn test_server_update_carries_identity() {
        let msg = ServerMessage::Update(ParticipantUpdate {
            id: ParticipantId::new("a"),
            pose: Pose::new(1.0, 2.0, 0.5),
            name: "Alice".to_string(),
            contact: "https://example.org".to_string(),
        });
        let value: serde_json::Value = serde_json::from_str(&encode(&msg).unwrap()).unwrap();
        assert_eq!(value["event"], "update");
        assert_eq!(value["data"]["uuid"], "a");
        assert_eq!(value["data"]["name"], "Alice");
        assert_eq!(value["data"]["social"], "https://example.org");
        assert_eq!(value["data"]["angle"], 0.5);
        assert_eq!(msg.participant().as_str(), "a");
    }

    #[test]
    fn test_unknown_event_is_malformed() {
        let result = decode::<ClientMessage>(r#"{"event":"leave","data":"a"}"#);
        assert!(matches!(result, Err(ProtocolError::MalformedMessage(_))));
    }

    #[test]
    fn test_client_cannot_send_player_left() {
        // player_left only flows server -> client
        let result = decode::<ClientMessage>(r#"{"event":"player_left","data":"a"}"#);
        assert!(result.is_err());
    }
}
