/// file: src/types.rs
/// description: wire-level frame definitions for the inbox WebSocket endpoint
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// Frame tags emitted by the inbox service
pub const NEW_MESSAGE: &str = "new_message";
pub const MESSAGE_READ: &str = "message_read";
pub const MESSAGE_EDITED: &str = "message_edited";
pub const MESSAGE_DELETED: &str = "message_deleted";
pub const REACTION_ADDED: &str = "reaction_added";
pub const REACTION_REMOVED: &str = "reaction_removed";
pub const TYPING: &str = "typing";
pub const PING: &str = "ping";
pub const PONG: &str = "pong";

/// Envelope of every inbound text frame: `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub data: Option<WireEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    pub conversation_id: String,
    #[serde(default)]
    pub message: Option<Value>,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// Outbound frame; the keepalive is `{"type":"ping"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl OutboundFrame {
    pub fn ping() -> Self {
        Self {
            frame_type: PING.to_string(),
            data: None,
        }
    }
}

/// Typed accessors over the free-form `metadata` object.
pub(crate) mod meta {
    use chrono::{DateTime, Utc};
    use serde_json::{Map, Value};

    pub fn string(metadata: Option<&Map<String, Value>>, key: &str) -> Option<String> {
        metadata?.get(key)?.as_str().map(str::to_owned)
    }

    pub fn boolean(metadata: Option<&Map<String, Value>>, key: &str) -> Option<bool> {
        metadata?.get(key)?.as_bool()
    }

    pub fn timestamp(metadata: Option<&Map<String, Value>>, key: &str) -> Option<DateTime<Utc>> {
        let raw = metadata?.get(key)?.as_str()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}
