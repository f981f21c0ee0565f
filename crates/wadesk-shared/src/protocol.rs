//! Webhook wire protocol spoken by the WAHA gateway.
//!
//! Every webhook call carries exactly one envelope
//! `{ "event": string, "session": string, "payload": object }`. The envelope
//! is validated here into a closed [`EventKind`] before any business logic
//! runs. Unknown event kinds are not an error: they become
//! [`EventKind::Unknown`] so the caller can acknowledge them without side
//! effects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EventError;
use crate::types::{Direction, MessageType};

/// A validated webhook event.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    /// Gateway session name, the join key from gateway to organization.
    pub session: String,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// `message` or `message.any`
    Message(ChatEvent),
    /// `message.ack`
    MessageAck(AckPayload),
    /// `session.status`
    SessionStatus(SessionStatusPayload),
    /// Anything else, kept by name for logging.
    Unknown(String),
}

impl EventKind {
    pub fn name(&self) -> &str {
        match self {
            Self::Message(_) => "message",
            Self::MessageAck(_) => "message.ack",
            Self::SessionStatus(_) => "session.status",
            Self::Unknown(name) => name,
        }
    }
}

/// Raw `message` payload as the gateway sends it. Extra fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: String,
    pub from: String,
    #[serde(default)]
    pub body: Option<String>,
    /// Unix seconds.
    pub timestamp: i64,
    #[serde(default, rename = "type")]
    pub message_type: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub notify_name: Option<String>,
}

/// A chat message event after validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub external_id: String,
    /// The counterpart: the sender for incoming messages, the recipient for
    /// outgoing ones.
    pub contact_id: String,
    pub contact_name: Option<String>,
    pub body: String,
    pub message_type: MessageType,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
}

impl TryFrom<MessagePayload> for ChatEvent {
    type Error = String;

    fn try_from(p: MessagePayload) -> Result<Self, Self::Error> {
        if p.id.trim().is_empty() {
            return Err("empty message id".into());
        }

        let (direction, contact) = if p.from_me {
            (Direction::Outgoing, p.to.unwrap_or_default())
        } else {
            (Direction::Incoming, p.from)
        };
        if contact.trim().is_empty() {
            return Err("missing contact identifier".into());
        }

        if p.timestamp <= 0 {
            return Err(format!("invalid timestamp {}", p.timestamp));
        }
        let timestamp = DateTime::<Utc>::from_timestamp(p.timestamp, 0)
            .ok_or_else(|| format!("timestamp out of range: {}", p.timestamp))?;

        Ok(Self {
            external_id: p.id,
            contact_id: contact,
            contact_name: p.notify_name.filter(|n| !n.trim().is_empty()),
            body: p.body.unwrap_or_default(),
            message_type: MessageType::from_gateway(p.message_type.as_deref()),
            direction,
            timestamp,
        })
    }
}

/// Delivery acknowledgement for a previously seen message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckPayload {
    pub id: String,
    pub ack: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatusPayload {
    pub status: String,
}

impl WebhookEvent {
    /// Parse a raw request body.
    pub fn from_slice(body: &[u8]) -> Result<Self, EventError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| EventError::InvalidJson(e.to_string()))?;
        Self::from_value(value)
    }

    /// Validate an already-decoded JSON envelope.
    pub fn from_value(value: Value) -> Result<Self, EventError> {
        let Value::Object(mut envelope) = value else {
            return Err(EventError::MissingField("event"));
        };

        let event = match envelope.remove("event") {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            _ => return Err(EventError::MissingField("event")),
        };
        let session = match envelope.remove("session") {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            _ => return Err(EventError::MissingField("session")),
        };
        let payload = match envelope.remove("payload") {
            Some(p @ Value::Object(_)) => p,
            _ => return Err(EventError::MissingField("payload")),
        };

        let invalid = |reason: String| EventError::InvalidPayload {
            kind: event.clone(),
            reason,
        };

        let kind = match event.as_str() {
            "message" | "message.any" => {
                let raw: MessagePayload =
                    serde_json::from_value(payload).map_err(|e| invalid(e.to_string()))?;
                EventKind::Message(ChatEvent::try_from(raw).map_err(invalid)?)
            }
            "message.ack" => EventKind::MessageAck(
                serde_json::from_value(payload).map_err(|e| invalid(e.to_string()))?,
            ),
            "session.status" => {
                let status: SessionStatusPayload =
                    serde_json::from_value(payload).map_err(|e| invalid(e.to_string()))?;
                if status.status.trim().is_empty() {
                    return Err(invalid("empty status".into()));
                }
                EventKind::SessionStatus(status)
            }
            _ => EventKind::Unknown(event.clone()),
        };

        Ok(Self { session, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_inbound_message() {
        let event = WebhookEvent::from_value(json!({
            "event": "message",
            "session": "org-42",
            "payload": {
                "id": "wamid.ABC",
                "from": "491701234567@c.us",
                "body": "Termin bestätigt",
                "timestamp": 1700000000,
                "type": "text"
            }
        }))
        .unwrap();

        assert_eq!(event.session, "org-42");
        let EventKind::Message(msg) = event.kind else {
            panic!("expected message event");
        };
        assert_eq!(msg.external_id, "wamid.ABC");
        assert_eq!(msg.contact_id, "491701234567@c.us");
        assert_eq!(msg.direction, Direction::Incoming);
        assert_eq!(msg.message_type, MessageType::Text);
        assert_eq!(msg.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn outgoing_message_uses_recipient_as_contact() {
        let event = WebhookEvent::from_value(json!({
            "event": "message.any",
            "session": "s",
            "payload": {
                "id": "out-1",
                "from": "me@c.us",
                "to": "4915112345@c.us",
                "fromMe": true,
                "body": "hi",
                "timestamp": 1700000100
            }
        }))
        .unwrap();

        let EventKind::Message(msg) = event.kind else {
            panic!("expected message event");
        };
        assert_eq!(msg.direction, Direction::Outgoing);
        assert_eq!(msg.contact_id, "4915112345@c.us");
    }

    #[test]
    fn unknown_kind_is_not_an_error() {
        let event = WebhookEvent::from_value(json!({
            "event": "presence.update",
            "session": "s",
            "payload": { "whatever": true }
        }))
        .unwrap();
        assert_eq!(event.kind, EventKind::Unknown("presence.update".into()));
    }

    #[test]
    fn missing_envelope_fields_are_rejected() {
        let no_session = json!({ "event": "message", "payload": {} });
        assert_eq!(
            WebhookEvent::from_value(no_session),
            Err(EventError::MissingField("session"))
        );

        let payload_not_object = json!({ "event": "message", "session": "s", "payload": "x" });
        assert_eq!(
            WebhookEvent::from_value(payload_not_object),
            Err(EventError::MissingField("payload"))
        );

        assert!(matches!(
            WebhookEvent::from_slice(b"not json"),
            Err(EventError::InvalidJson(_))
        ));
    }

    #[test]
    fn message_without_id_is_rejected() {
        let err = WebhookEvent::from_value(json!({
            "event": "message",
            "session": "s",
            "payload": { "from": "1@c.us", "timestamp": 1700000000 }
        }))
        .unwrap_err();
        assert!(matches!(err, EventError::InvalidPayload { .. }));
    }

    #[test]
    fn outgoing_message_without_recipient_is_rejected() {
        let err = WebhookEvent::from_value(json!({
            "event": "message.any",
            "session": "s",
            "payload": { "id": "x", "from": "me@c.us", "fromMe": true, "timestamp": 1700000000 }
        }))
        .unwrap_err();
        assert!(matches!(err, EventError::InvalidPayload { .. }));
    }

    #[test]
    fn session_status_requires_status() {
        assert!(WebhookEvent::from_value(json!({
            "event": "session.status",
            "session": "s",
            "payload": {}
        }))
        .is_err());

        let ok = WebhookEvent::from_value(json!({
            "event": "session.status",
            "session": "s",
            "payload": { "status": "WORKING" }
        }))
        .unwrap();
        assert_eq!(
            ok.kind,
            EventKind::SessionStatus(SessionStatusPayload {
                status: "WORKING".into()
            })
        );
    }
}
