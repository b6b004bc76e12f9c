/// file: src/events.rs
/// description: typed inbox events decoded from wire frames
use crate::{
    error::DecodeError,
    types::{self, InboundFrame, WireEvent, meta},
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    NewMessage {
        message: Option<Value>,
    },
    MessageRead {
        reader_id: Option<String>,
    },
    MessageEdited {
        edited_at: Option<DateTime<Utc>>,
        message: Option<Value>,
    },
    MessageDeleted {
        deleted_at: Option<DateTime<Utc>>,
    },
    ReactionAdded {
        emoji: Option<String>,
        is_added: Option<bool>,
    },
    ReactionRemoved {
        emoji: Option<String>,
        is_added: Option<bool>,
    },
    Typing,
    /// Any tag this client does not know yet; kept verbatim.
    Unknown {
        event_type: String,
        message: Option<Value>,
        metadata: Map<String, Value>,
    },
}

/// An immutable inbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub conversation_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: EventPayload,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            timestamp,
            payload,
        }
    }

    /// The wire tag listeners are keyed on.
    pub fn event_type(&self) -> &str {
        match &self.payload {
            EventPayload::NewMessage { .. } => types::NEW_MESSAGE,
            EventPayload::MessageRead { .. } => types::MESSAGE_READ,
            EventPayload::MessageEdited { .. } => types::MESSAGE_EDITED,
            EventPayload::MessageDeleted { .. } => types::MESSAGE_DELETED,
            EventPayload::ReactionAdded { .. } => types::REACTION_ADDED,
            EventPayload::ReactionRemoved { .. } => types::REACTION_REMOVED,
            EventPayload::Typing => types::TYPING,
            EventPayload::Unknown { event_type, .. } => event_type.as_str(),
        }
    }

    pub fn message(&self) -> Option<&Value> {
        match &self.payload {
            EventPayload::NewMessage { message }
            | EventPayload::MessageEdited { message, .. }
            | EventPayload::Unknown { message, .. } => message.as_ref(),
            _ => None,
        }
    }

    /// Id of the chat message carried by the event, if the server sent one.
    pub fn message_id(&self) -> Option<String> {
        match self.message()?.get("id")? {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    /// Best-effort text body of the carried chat message.
    pub fn message_text(&self) -> Option<&str> {
        let message = self.message()?;
        if let Some(text) = message.as_str() {
            return Some(text);
        }
        ["content", "body", "text"]
            .iter()
            .find_map(|key| message.get(*key).and_then(Value::as_str))
    }
}

/// Decode one text frame.
///
/// Keepalive frames and frames without a `data` object carry no event and
/// decode to `Ok(None)`.
pub fn decode_frame(text: &str) -> Result<Option<Event>, DecodeError> {
    let frame: InboundFrame = serde_json::from_str(text)?;

    if frame.frame_type == types::PONG || frame.frame_type == types::PING {
        return Ok(None);
    }

    let Some(data) = frame.data else {
        return Ok(None);
    };

    from_wire(frame.frame_type, data).map(Some)
}

fn from_wire(frame_type: String, data: WireEvent) -> Result<Event, DecodeError> {
    if data.conversation_id.is_empty() {
        return Err(DecodeError::MissingField {
            frame_type,
            field: "conversation_id",
        });
    }

    let metadata = data.metadata.as_ref();
    let payload = match frame_type.as_str() {
        types::NEW_MESSAGE => EventPayload::NewMessage {
            message: data.message,
        },
        types::MESSAGE_READ => EventPayload::MessageRead {
            reader_id: meta::string(metadata, "reader_id"),
        },
        types::MESSAGE_EDITED => EventPayload::MessageEdited {
            edited_at: meta::timestamp(metadata, "edited_at"),
            message: data.message,
        },
        types::MESSAGE_DELETED => EventPayload::MessageDeleted {
            deleted_at: meta::timestamp(metadata, "deleted_at"),
        },
        types::REACTION_ADDED => EventPayload::ReactionAdded {
            emoji: meta::string(metadata, "emoji"),
            is_added: meta::boolean(metadata, "is_added"),
        },
        types::REACTION_REMOVED => EventPayload::ReactionRemoved {
            emoji: meta::string(metadata, "emoji"),
            is_added: meta::boolean(metadata, "is_added"),
        },
        types::TYPING => EventPayload::Typing,
        _ => EventPayload::Unknown {
            event_type: frame_type,
            message: data.message,
            metadata: data.metadata.unwrap_or_default(),
        },
    };

    Ok(Event {
        conversation_id: data.conversation_id,
        user_id: data.user_id,
        timestamp: data.timestamp,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_new_message() {
        let text = r#"{"type":"new_message","data":{"type":"new_message","conversation_id":"c1","user_id":"u2","timestamp":"2025-03-01T10:00:00Z","message":{"id":"m9","content":"hello"}}}"#;
        let event = decode_frame(text).unwrap().unwrap();

        assert_eq!(event.event_type(), "new_message");
        assert_eq!(event.conversation_id, "c1");
        assert_eq!(event.user_id, "u2");
        assert_eq!(event.message_id().as_deref(), Some("m9"));
        assert_eq!(event.message_text(), Some("hello"));
    }

    #[test]
    fn decodes_reaction_metadata() {
        let text = r#"{"type":"reaction_added","data":{"conversation_id":"c1","user_id":"u2","timestamp":"2025-03-01T10:00:00Z","metadata":{"emoji":"🎉","is_added":true}}}"#;
        let event = decode_frame(text).unwrap().unwrap();

        assert_eq!(
            event.payload,
            EventPayload::ReactionAdded {
                emoji: Some("🎉".to_string()),
                is_added: Some(true),
            }
        );

        let removed = r#"{"type":"reaction_removed","data":{"conversation_id":"c1","user_id":"u2","timestamp":"2025-03-01T10:00:00Z","metadata":{"emoji":"🎉","is_added":false}}}"#;
        let event = decode_frame(removed).unwrap().unwrap();
        assert_eq!(
            event.payload,
            EventPayload::ReactionRemoved {
                emoji: Some("🎉".to_string()),
                is_added: Some(false),
            }
        );
    }

    #[test]
    fn unknown_tag_is_preserved() {
        let text = r#"{"type":"hire_request","data":{"conversation_id":"c1","user_id":"u2","timestamp":"2025-03-01T10:00:00Z","metadata":{"offer":1200}}}"#;
        let event = decode_frame(text).unwrap().unwrap();

        assert_eq!(event.event_type(), "hire_request");
        match event.payload {
            EventPayload::Unknown { metadata, .. } => {
                assert_eq!(metadata.get("offer"), Some(&Value::from(1200)));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn keepalive_and_empty_frames_carry_no_event() {
        assert!(decode_frame(r#"{"type":"pong"}"#).unwrap().is_none());
        assert!(decode_frame(r#"{"type":"new_message"}"#).unwrap().is_none());
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(
            decode_frame("not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode_frame(r#"{"type":"new_message","data":{"conversation_id":"c1"}}"#),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode_frame(
                r#"{"type":"typing","data":{"conversation_id":"","user_id":"u","timestamp":"2025-03-01T10:00:00Z"}}"#
            ),
            Err(DecodeError::MissingField { .. })
        ));
    }
}
