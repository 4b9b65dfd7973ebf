//! Error handling module
//!
//! Defines the error types for the presence server and client.
//!
//! Most protocol anomalies (updates for unknown participants, events sent
//! before `enter`, duplicate joins) are not errors at all: they are logged and
//! dropped where they happen. The types here cover the failures that do
//! terminate an operation, such as a broken transport or an undecodable frame.

use std::io;

use thiserror::Error;

/// Main error type for the presence core
#[derive(Error, Debug)]
pub enum PresenceError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration rejected before starting
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Network-specific errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

/// Protocol-specific errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Unexpected binary frame ({0} bytes)")]
    UnexpectedBinaryFrame(usize),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::MalformedMessage(err.to_string())
    }
}

impl From<tungstenite::Error> for NetworkError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                NetworkError::ConnectionClosed
            }
            other => NetworkError::WebSocket(other.to_string()),
        }
    }
}

/// Result type alias for presence operations
pub type Result<T> = std::result::Result<T, PresenceError>;
