//! Serializer / deserializer pipeline.
//!
//! Transports move raw JSON values. Before the server or client touches one,
//! it is decoded in a single step into a [`WireShape`]: either a canonical
//! packet or an external payload that must be wrapped. Which markers count
//! as canonical depends on the [`Side`] doing the decoding:
//!
//! - consumer (server) side: `pattern` or `data` present
//! - producer (client) side: `err`, `response` or `isDisposed` present
//!
//! Serializers run the other way. The default [`IdentitySerializer`] emits the
//! canonical shape unchanged.

use serde::Serialize;
use serde_json::Value;

use crate::errors::CodecError;
use crate::packet::{Event, IncomingResponse, Request, WritePacket};
use crate::pattern::Pattern;

const REQUEST_MARKERS: [&str; 2] = ["pattern", "data"];
const RESPONSE_MARKERS: [&str; 3] = ["err", "response", "isDisposed"];

/// Which end of the pipeline is decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    /// Server side: inbound requests and events.
    Consumer,
    /// Client side: inbound responses.
    Producer,
}

/// A raw inbound value after disambiguation.
#[derive(Clone, Debug, PartialEq)]
pub enum WireShape {
    /// Not in canonical shape; the transport's own payload.
    External(Value),
    /// Canonical request (has an id).
    Request(Request),
    /// Canonical event (no id).
    Event(Event),
    /// Canonical response frame.
    Response(IncomingResponse),
}

impl WireShape {
    /// Decode a raw value from the given side's perspective.
    ///
    /// Consumer-side decoding never yields [`WireShape::Response`] and
    /// producer-side decoding never yields requests or events.
    pub fn classify(value: Value, side: Side) -> Result<Self, CodecError> {
        match side {
            Side::Consumer if has_marker(&value, &REQUEST_MARKERS) => {
                let has_id = value.get("id").is_some_and(|id| !id.is_null());
                if has_id {
                    Ok(Self::Request(decode(value, "request")?))
                } else {
                    Ok(Self::Event(decode(value, "event")?))
                }
            }
            Side::Producer if has_marker(&value, &RESPONSE_MARKERS) => {
                Ok(Self::Response(decode(value, "response")?))
            }
            _ => Ok(Self::External(value)),
        }
    }

    /// Whether this is an external payload.
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External(_))
    }
}

fn has_marker(value: &Value, markers: &[&str]) -> bool {
    value
        .as_object()
        .is_some_and(|map| markers.iter().any(|key| map.contains_key(*key)))
}

fn decode<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> Result<T, CodecError> {
    serde_json::from_value(value).map_err(|e| CodecError::InvalidShape(format!("{what}: {e}")))
}

/// Transport metadata accompanying an inbound value.
#[derive(Clone, Debug, Default)]
pub struct DeserializeOptions {
    /// Channel (or subject/topic) the value arrived on; used as the pattern of
    /// external payloads.
    pub channel: Option<Pattern>,
}

impl DeserializeOptions {
    /// Options naming the inbound channel.
    pub fn channel(channel: impl Into<Pattern>) -> Self {
        Self {
            channel: Some(channel.into()),
        }
    }
}

/// Converts a raw wire value into a canonical packet.
pub trait Deserializer: Send + Sync {
    /// Canonical output type.
    type Output;

    /// Decode `value`, wrapping it if it is not already canonical.
    fn deserialize(
        &self,
        value: Value,
        options: &DeserializeOptions,
    ) -> Result<Self::Output, CodecError>;
}

/// Converts a canonical packet into the transport's wire value.
pub trait Serializer<T>: Send + Sync {
    /// Encode `value`.
    fn serialize(&self, value: &T) -> Result<Value, CodecError>;
}

/// Emits the canonical JSON shape unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentitySerializer;

impl<T: Serialize> Serializer<T> for IdentitySerializer {
    fn serialize(&self, value: &T) -> Result<Value, CodecError> {
        Ok(serde_json::to_value(value)?)
    }
}

/// A decoded server-side inbound packet.
#[derive(Clone, Debug, PartialEq)]
pub enum IncomingPacket {
    /// Expects a response sequence.
    Request(Request),
    /// Fire-and-forget.
    Event(Event),
}

impl IncomingPacket {
    /// Route pattern.
    pub fn pattern(&self) -> &Pattern {
        match self {
            Self::Request(r) => &r.pattern,
            Self::Event(e) => &e.pattern,
        }
    }

    /// Payload.
    pub fn data(&self) -> &Value {
        match self {
            Self::Request(r) => &r.data,
            Self::Event(e) => &e.data,
        }
    }

    /// Correlation id, if this is a request.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Event(_) => None,
        }
    }
}

/// Consumer-side deserializer used by the server.
#[derive(Clone, Copy, Debug, Default)]
pub struct IncomingRequestDeserializer;

impl IncomingRequestDeserializer {
    /// `false` when the value already carries `pattern` or `data`.
    pub fn is_external(&self, value: &Value) -> bool {
        !has_marker(value, &REQUEST_MARKERS)
    }

    /// Wrap an external payload as an event on the inbound channel.
    ///
    /// Without a channel there is nothing to route on, so both pattern and
    /// data come back null.
    pub fn map_to_schema(&self, value: Value, options: &DeserializeOptions) -> IncomingPacket {
        match &options.channel {
            Some(channel) => IncomingPacket::Event(Event {
                pattern: channel.clone(),
                data: value,
            }),
            None => IncomingPacket::Event(Event {
                pattern: Pattern::default(),
                data: Value::Null,
            }),
        }
    }
}

impl Deserializer for IncomingRequestDeserializer {
    type Output = IncomingPacket;

    fn deserialize(
        &self,
        value: Value,
        options: &DeserializeOptions,
    ) -> Result<IncomingPacket, CodecError> {
        Ok(match WireShape::classify(value, Side::Consumer)? {
            WireShape::Request(request) => IncomingPacket::Request(request),
            WireShape::Event(event) => IncomingPacket::Event(event),
            WireShape::External(value) => self.map_to_schema(value, options),
            WireShape::Response(response) => {
                return Err(CodecError::InvalidShape(format!(
                    "response frame on consumer side: {:?}",
                    response.id
                )));
            }
        })
    }
}

/// Producer-side deserializer used by the client.
#[derive(Clone, Copy, Debug, Default)]
pub struct IncomingResponseDeserializer;

impl IncomingResponseDeserializer {
    /// `false` when the value already carries `err`, `response` or `isDisposed`.
    pub fn is_external(&self, value: &Value) -> bool {
        !has_marker(value, &RESPONSE_MARKERS)
    }

    /// Treat an unrecognized value as a single, terminal, successful response.
    pub fn map_to_schema(&self, value: Value) -> IncomingResponse {
        let id = value
            .get("id")
            .and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        IncomingResponse {
            id,
            packet: WritePacket {
                response: Some(value),
                is_disposed: true,
                ..WritePacket::default()
            },
        }
    }
}

impl Deserializer for IncomingResponseDeserializer {
    type Output = IncomingResponse;

    fn deserialize(
        &self,
        value: Value,
        _options: &DeserializeOptions,
    ) -> Result<IncomingResponse, CodecError> {
        Ok(match WireShape::classify(value, Side::Producer)? {
            WireShape::Response(response) => response,
            WireShape::External(value) => self.map_to_schema(value),
            WireShape::Request(_) | WireShape::Event(_) => {
                return Err(CodecError::InvalidShape(
                    "request frame on producer side".into(),
                ));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    // ── WireShape ───────────────────────────────────────────────────

    #[test]
    fn classify_request_and_event() {
        let req = WireShape::classify(json!({"id": "1", "pattern": "p", "data": 1}), Side::Consumer)
            .unwrap();
        assert_matches!(req, WireShape::Request(r) if r.id == "1");

        let event = WireShape::classify(json!({"pattern": "p", "data": 1}), Side::Consumer).unwrap();
        assert_matches!(event, WireShape::Event(_));
    }

    #[test]
    fn null_id_is_an_event() {
        let shape =
            WireShape::classify(json!({"id": null, "pattern": "p"}), Side::Consumer).unwrap();
        assert_matches!(shape, WireShape::Event(_));
    }

    #[test]
    fn classify_external_values() {
        for raw in [json!(null), json!(0), json!("text"), json!({"foo": 1}), json!([1, 2])] {
            let shape = WireShape::classify(raw, Side::Consumer).unwrap();
            assert!(shape.is_external());
        }
    }

    #[test]
    fn response_markers_ignored_on_consumer_side() {
        let shape = WireShape::classify(json!({"response": 1}), Side::Consumer).unwrap();
        assert!(shape.is_external());
    }

    #[test]
    fn malformed_canonical_value_is_an_error() {
        let err = WireShape::classify(json!({"id": "1", "pattern": "p", "isDisposed": "yes"}), Side::Producer)
            .unwrap_err();
        assert_matches!(err, CodecError::InvalidShape(_));
    }

    // ── Consumer side ───────────────────────────────────────────────

    #[test]
    fn canonical_request_passes_through_unchanged() {
        let de = IncomingRequestDeserializer;
        let raw = json!({"id": "r1", "pattern": {"cmd": "sum"}, "data": [1, 2]});
        assert!(!de.is_external(&raw));

        let packet = de.deserialize(raw, &DeserializeOptions::default()).unwrap();
        assert_eq!(
            packet,
            IncomingPacket::Request(Request::with_id("r1", json!({"cmd": "sum"}), json!([1, 2])))
        );
    }

    #[test]
    fn external_value_is_wrapped_with_channel() {
        let de = IncomingRequestDeserializer;
        let raw = json!({"temperature": 21});
        assert!(de.is_external(&raw));

        let packet = de
            .deserialize(raw.clone(), &DeserializeOptions::channel("sensors"))
            .unwrap();
        assert_eq!(packet.pattern(), &Pattern::from("sensors"));
        assert_eq!(packet.data(), &raw);
        assert!(packet.id().is_none());
    }

    #[test]
    fn external_value_without_channel_is_empty() {
        let packet = IncomingRequestDeserializer
            .deserialize(json!("payload"), &DeserializeOptions::default())
            .unwrap();
        assert!(packet.pattern().is_nil());
        assert_eq!(packet.data(), &Value::Null);
    }

    // ── Producer side ───────────────────────────────────────────────

    #[test]
    fn canonical_response_passes_through_unchanged() {
        let de = IncomingResponseDeserializer;
        let raw = json!({"id": "r1", "response": "world", "isDisposed": true});
        assert!(!de.is_external(&raw));

        let resp = de.deserialize(raw, &DeserializeOptions::default()).unwrap();
        assert_eq!(resp.id.as_deref(), Some("r1"));
        assert_eq!(resp.packet.response, Some(json!("world")));
        assert!(resp.packet.is_disposed);
    }

    #[test]
    fn external_response_becomes_terminal_success() {
        let de = IncomingResponseDeserializer;
        let raw = json!({"id": 7, "total": 3});
        let resp = de.deserialize(raw.clone(), &DeserializeOptions::default()).unwrap();
        assert_eq!(resp.id.as_deref(), Some("7"));
        assert_eq!(resp.packet.response, Some(raw));
        assert!(resp.packet.is_disposed);
        assert!(resp.packet.err.is_none());
    }

    #[test]
    fn error_frame_is_canonical() {
        let raw = json!({"id": "r1", "err": {"code": "X", "message": "m"}});
        let resp = IncomingResponseDeserializer
            .deserialize(raw, &DeserializeOptions::default())
            .unwrap();
        assert!(resp.packet.err.is_some());
        assert!(resp.packet.is_terminal());
    }

    // ── Serializer ──────────────────────────────────────────────────

    #[test]
    fn identity_serializer_keeps_canonical_shape() {
        let request = Request::with_id("r1", "greet", json!("world"));
        let wire = IdentitySerializer.serialize(&request).unwrap();
        assert_eq!(wire, json!({"id": "r1", "pattern": "greet", "data": "world"}));

        let back = IncomingRequestDeserializer
            .deserialize(wire, &DeserializeOptions::default())
            .unwrap();
        assert_eq!(back, IncomingPacket::Request(request));
    }

    #[test]
    fn response_fields_survive_the_pipeline() {
        let out = WritePacket::response(json!({"n": 1})).with_id("r9");
        let wire = IdentitySerializer.serialize(&out).unwrap();
        let back = IncomingResponseDeserializer
            .deserialize(wire, &DeserializeOptions::default())
            .unwrap();
        assert_eq!(back, out);
    }
}
