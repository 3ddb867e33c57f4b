use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const ERR_INVALID_FORMAT: &str = "invalid message format";
pub const ERR_NOTE_MISMATCH: &str = "note id mismatch";
pub const ERR_SAVE_FAILED: &str = "failed to save note";
pub const ERR_UNSUPPORTED: &str = "unsupported message type";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatchMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_id: Option<i64>,
    pub patch: String,
    #[serde(default)]
    pub version: i64,
}

/// Frames sent by clients, discriminated by `type`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ReceivedMessage {
    #[serde(rename = "patch")]
    Patch(PatchMessage),
    #[serde(other)]
    Unsupported,
}

impl ReceivedMessage {
    pub fn note_id(&self) -> Option<i64> {
        match self {
            ReceivedMessage::Patch(msg) => msg.note_id,
            ReceivedMessage::Unsupported => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatchBroadcast {
    pub note_id: i64,
    pub patch: String,
    pub user_id: i64,
    pub version: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMessage {
    pub note_id: i64,
    pub active_user: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub note_id: i64,
    pub error: String,
}

/// Frames sent to clients, discriminated by `type`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum SendMessage {
    #[serde(rename = "patch")]
    Patch(PatchBroadcast),
    #[serde(rename = "presence")]
    Presence(PresenceMessage),
    #[serde(rename = "error")]
    Error(ErrorMessage),
}

impl SendMessage {
    pub fn error(note_id: i64, error: &str) -> Self {
        SendMessage::Error(ErrorMessage { note_id, error: error.to_string() })
    }

    /// Serialize into the shared payload handed to outbound queues.
    pub fn encode(&self) -> Result<Payload, serde_json::Error> {
        serde_json::to_string(self).map(Payload::from)
    }
}

/// An encoded server frame. Cloning only bumps a refcount, so one encoding is
/// shared across every member of a room.
pub type Payload = Arc<str>;

/// Envelope submitted to the hub for fan-out. Recipients are resolved from
/// room membership when the hub processes it.
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    pub note_id: i64,
    pub payload: Payload,
}
