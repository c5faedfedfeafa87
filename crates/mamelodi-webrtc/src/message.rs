//! Payload envelope exchanged over data connections
//!
//! JSON objects tagged by `type`:
//! - `{"type":"ChatMessage","message":"..","sent":1700000000000}`
//! - `{"type":"UserInfo","displayName":".."}`

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::ConnectedPeer;

/// Message envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Chat text with the sender's timestamp (ms since Unix epoch)
    #[serde(rename = "ChatMessage")]
    Chat {
        message: String,
        #[serde(default = "now_millis")]
        sent: u64,
    },

    /// Sender's display name
    #[serde(rename = "UserInfo")]
    UserInfo {
        #[serde(rename = "displayName")]
        display_name: String,
    },
}

impl Message {
    /// Chat message stamped with the current time
    pub fn chat(message: impl Into<String>) -> Self {
        Message::Chat {
            message: message.into(),
            sent: now_millis(),
        }
    }

    pub fn user_info(display_name: impl Into<String>) -> Self {
        Message::UserInfo {
            display_name: display_name.into(),
        }
    }

    /// Greeting sent when a connection opens
    pub fn greeting(local_id: &str, remote_id: &str) -> Self {
        Self::chat(format!("Hello {}, this is {}", remote_id, local_id))
    }

    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// What an inbound payload turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceivedMessageType {
    Chat,
    UserInfo,
    /// Not an envelope; delivered verbatim
    Text,
}

/// An inbound payload, as presented to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Receive time (ms since Unix epoch)
    pub timestamp: u64,
    pub kind: ReceivedMessageType,
    /// Chat text, display name, or the raw payload
    pub message: String,
    pub peer: Option<ConnectedPeer>,
}

impl ReceivedMessage {
    /// Interpret a raw payload received from `peer`
    pub fn from_payload(payload: &str, peer: Option<ConnectedPeer>) -> Self {
        let (kind, message) = match Message::from_payload(payload) {
            Ok(Message::Chat { message, .. }) => (ReceivedMessageType::Chat, message),
            Ok(Message::UserInfo { display_name }) => (ReceivedMessageType::UserInfo, display_name),
            Err(_) => (ReceivedMessageType::Text, payload.to_string()),
        };
        Self {
            timestamp: now_millis(),
            kind,
            message,
            peer,
        }
    }
}
