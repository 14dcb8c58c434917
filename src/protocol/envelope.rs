#![forbid(unsafe_code)]

// Envelope codec - tag-prefixed frames layered over the WebSocket text stream
//
//   42["<event>",<json>]    event
//   40{"<key>":<json>}      connect (carries the bearer credential)
//   41                      disconnect
//   3                       pong, reply to the inbound "2" probe

use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use super::events::EventKind;
use crate::error::FrameError;

pub const EVENT_TAG: &str = "42";
pub const CONNECT_TAG: &str = "40";
pub const DISCONNECT_TAG: &str = "41";
pub const PONG_TAG: &str = "3";
/// Keep-alive probe sent by the server; answered with [`Frame::Ping`].
pub const PROBE: &str = "2";

pub const AUTH_KEY: &str = "Authorization";

/// Client send time
pub const TS_SENT: &str = "_ts_1";
/// Server receive time, stamped by the server on relayed events
pub const TS_SERVER_RECEIVED: &str = "_ts_3";
/// Client receive time
pub const TS_RECEIVED: &str = "_ts_4";
pub const CORRELATION_ID: &str = "uuid";

/// Longest slice of offending text kept in a [`FrameError::NotEnvelope`]
const MAX_ERROR_TEXT: usize = 120;

/// Outbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Connect { key: String, value: Value },
    Event { name: String, payload: Value },
    Disconnect,
    Ping,
}

impl Frame {
    pub fn event(kind: EventKind, payload: Value) -> Self {
        Frame::Event {
            name: kind.wire_name().to_string(),
            payload,
        }
    }

    pub fn authorization(token: &str) -> Self {
        Frame::Connect {
            key: AUTH_KEY.to_string(),
            value: Value::String(format!("Bearer {token}")),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Frame::Event { name, payload } => {
                let body = Value::Array(vec![Value::String(name.clone()), payload.clone()]);
                format!("{EVENT_TAG}{body}")
            }
            Frame::Connect { key, value } => {
                let mut body = Map::new();
                body.insert(key.clone(), value.clone());
                format!("{CONNECT_TAG}{}", Value::Object(body))
            }
            Frame::Disconnect => DISCONNECT_TAG.to_string(),
            Frame::Ping => PONG_TAG.to_string(),
        }
    }
}

/// Decoded inbound text
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event {
        tag: String,
        name: String,
        payload: Value,
    },
    /// The bare keep-alive probe
    Probe,
    /// Any other tag-only or tag+object frame (open handshake, connect ack, pong)
    Control { tag: String, body: String },
}

pub fn decode(text: &str) -> Result<Inbound, FrameError> {
    if text == PROBE {
        return Ok(Inbound::Probe);
    }

    let digits = text.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return Err(not_envelope(text));
    }
    let (tag, body) = text.split_at(digits);

    if digits == 2 && body.starts_with('[') {
        let parts: Vec<Value> = serde_json::from_str(body)?;
        let mut parts = parts.into_iter();
        let name = match parts.next() {
            Some(Value::String(name)) => name,
            _ => return Err(FrameError::MissingName),
        };
        let payload = parts.next().unwrap_or(Value::Null);
        return Ok(Inbound::Event {
            tag: tag.to_string(),
            name,
            payload,
        });
    }

    if body.is_empty() || body.starts_with('{') {
        return Ok(Inbound::Control {
            tag: tag.to_string(),
            body: body.to_string(),
        });
    }

    Err(not_envelope(text))
}

fn not_envelope(text: &str) -> FrameError {
    FrameError::NotEnvelope(text.chars().take(MAX_ERROR_TEXT).collect())
}

/// Adds the send timestamp and a fresh correlation id to object payloads.
///
/// A null payload becomes an empty object first. Acknowledgement events pass
/// through untouched so their round-trip timestamps survive.
pub fn stamp(kind: EventKind, payload: Value, now_ms: i64) -> Value {
    let mut payload = match payload {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    if kind.is_acknowledgement() {
        return payload;
    }
    if let Value::Object(map) = &mut payload {
        map.insert(TS_SENT.to_string(), Value::from(now_ms));
        map.insert(
            CORRELATION_ID.to_string(),
            Value::String(Uuid::new_v4().to_string()),
        );
    }
    payload
}

/// If the payload was relayed through the server with a receive stamp, marks
/// the client receive time and returns the four-timestamp acknowledgement body.
pub fn timestamp_ack(payload: &mut Value, now_ms: i64) -> Option<Value> {
    let map = payload.as_object_mut()?;
    if !map.contains_key(TS_SERVER_RECEIVED) {
        return None;
    }
    map.insert(TS_RECEIVED.to_string(), Value::from(now_ms));
    Some(Value::Object(map.clone()))
}

/// Delivery delay in milliseconds between the original send and local receipt.
/// `None` when either stamp is missing or the difference is negative or
/// out of range.
pub fn delivery_delay_ms(payload: &Value) -> Option<u64> {
    let sent = payload.get(TS_SENT)?.as_i64()?;
    let received = payload.get(TS_RECEIVED)?.as_i64()?;
    received
        .checked_sub(sent)
        .and_then(|delay| u64::try_from(delay).ok())
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
