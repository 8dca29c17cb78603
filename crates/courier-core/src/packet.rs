//! Packet shapes exchanged between client and server.
//!
//! These are the canonical forms every transport maps to and from. A
//! [`Request`] carries an `id` and expects a correlated sequence of
//! [`WritePacket`]s; an [`Event`] has no `id` and expects nothing back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ErrorBody;
use crate::pattern::Pattern;

/// Logical payload of an outbound request or event, before an id is attached.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReadPacket {
    /// Route identifier (scalar or structured).
    pub pattern: Pattern,
    /// Payload handed to the handler.
    #[serde(default)]
    pub data: Value,
}

/// A request: a [`ReadPacket`] plus a correlation id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id shared by every response packet.
    pub id: String,
    /// Route identifier.
    pub pattern: Pattern,
    /// Payload handed to the handler.
    #[serde(default)]
    pub data: Value,
}

impl Request {
    /// Build a request with a fresh UUID v7 id.
    pub fn new(pattern: impl Into<Pattern>, data: Value) -> Self {
        Self::with_id(uuid::Uuid::now_v7().to_string(), pattern, data)
    }

    /// Build a request with an explicit id.
    pub fn with_id(id: impl Into<String>, pattern: impl Into<Pattern>, data: Value) -> Self {
        Self {
            id: id.into(),
            pattern: pattern.into(),
            data,
        }
    }

    /// Drop the id, keeping pattern and data.
    pub fn into_read_packet(self) -> ReadPacket {
        ReadPacket {
            pattern: self.pattern,
            data: self.data,
        }
    }
}

/// A fire-and-forget event. Distinguished from [`Request`] only by the absent id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Route identifier.
    pub pattern: Pattern,
    /// Payload handed to the handler.
    #[serde(default)]
    pub data: Value,
}

impl Event {
    /// Build an event.
    pub fn new(pattern: impl Into<Pattern>, data: Value) -> Self {
        Self {
            pattern: pattern.into(),
            data,
        }
    }
}

impl From<Event> for ReadPacket {
    fn from(event: Event) -> Self {
        Self {
            pattern: event.pattern,
            data: event.data,
        }
    }
}

/// One frame of a response sequence.
///
/// Zero or more of these correlate to a request. The last one carries
/// `is_disposed = true`; a packet with `err` set ends the sequence.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WritePacket {
    /// Failure payload. Terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<Value>,
    /// Successful payload. A present `null` decodes as `Some(Value::Null)`.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub response: Option<Value>,
    /// No further packets follow.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_disposed: bool,
    /// Optional transport status annotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl WritePacket {
    /// A single successful payload.
    pub fn response(value: Value) -> Self {
        Self {
            response: Some(value),
            ..Self::default()
        }
    }

    /// A failure frame carrying an error body.
    pub fn error(body: &ErrorBody) -> Self {
        Self {
            err: Some(body.to_value()),
            ..Self::default()
        }
    }

    /// The bare completion marker.
    pub fn disposed() -> Self {
        Self {
            is_disposed: true,
            ..Self::default()
        }
    }

    /// Whether this packet ends its response sequence.
    pub fn is_terminal(&self) -> bool {
        self.is_disposed || self.err.is_some()
    }

    /// Attach a correlation id for the wire.
    pub fn with_id(self, id: impl Into<String>) -> IncomingResponse {
        IncomingResponse {
            id: Some(id.into()),
            packet: self,
        }
    }
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// A [`WritePacket`] as it travels on the wire, tagged with its request id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IncomingResponse {
    /// Request id this packet answers. Absent for unrecognized external payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The response frame.
    #[serde(flatten)]
    pub packet: WritePacket,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_ids_are_unique() {
        let a = Request::new("sum", json!([1, 2]));
        let b = Request::new("sum", json!([1, 2]));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn event_serializes_without_id() {
        let event = Event::new("user.created", json!({"name": "ada"}));
        let v = serde_json::to_value(&event).unwrap();
        assert!(v.get("id").is_none());
        assert_eq!(v["pattern"], "user.created");
        assert_eq!(v["data"]["name"], "ada");
    }

    #[test]
    fn write_packet_uses_wire_names() {
        let mut packet = WritePacket::response(json!(3));
        packet.is_disposed = true;
        let v = serde_json::to_value(&packet).unwrap();
        assert_eq!(v, json!({"response": 3, "isDisposed": true}));
    }

    #[test]
    fn write_packet_omits_false_disposal() {
        let v = serde_json::to_value(WritePacket::response(json!("x"))).unwrap();
        assert!(v.get("isDisposed").is_none());
    }

    #[test]
    fn terminal_packets() {
        assert!(WritePacket::disposed().is_terminal());
        assert!(WritePacket::error(&ErrorBody::new("E", "boom")).is_terminal());
        assert!(!WritePacket::response(json!(1)).is_terminal());
    }

    #[test]
    fn incoming_response_flattens_packet() {
        let incoming = WritePacket::disposed().with_id("req_1");
        let v = serde_json::to_value(&incoming).unwrap();
        assert_eq!(v, json!({"id": "req_1", "isDisposed": true}));

        let back: IncomingResponse = serde_json::from_value(v).unwrap();
        assert_eq!(back.id.as_deref(), Some("req_1"));
        assert!(back.packet.is_disposed);
    }

    #[test]
    fn null_response_is_kept_apart_from_absent() {
        let v = serde_json::to_value(WritePacket {
            is_disposed: true,
            ..WritePacket::response(Value::Null)
        })
        .unwrap();
        assert_eq!(v, json!({"response": null, "isDisposed": true}));

        let back: IncomingResponse =
            serde_json::from_value(json!({"id": "r1", "response": null, "isDisposed": true}))
                .unwrap();
        assert_eq!(back.packet.response, Some(Value::Null));

        let bare: IncomingResponse =
            serde_json::from_value(json!({"id": "r1", "isDisposed": true})).unwrap();
        assert_eq!(bare.packet.response, None);
    }

    #[test]
    fn request_without_data_defaults_to_null() {
        let req: Request = serde_json::from_value(json!({"id": "1", "pattern": "ping"})).unwrap();
        assert_eq!(req.data, Value::Null);
    }
}
