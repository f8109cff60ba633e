//! NIP-01 relay wire messages.
//!
//! The bridge only ever publishes, so the client side is a single frame
//! (`["EVENT", <event>]`). Every relay frame is parsed so that unexpected
//! traffic can be logged instead of tearing the connection down.

use crate::error::RelayError;
use crossnostr_identity::SignedEvent;
use serde_json::Value;

/// Serializes `["EVENT", <event>]`.
pub fn event_frame(event: &SignedEvent) -> Result<String, RelayError> {
    Ok(serde_json::to_string(&("EVENT", event))?)
}

/// Messages sent from relay to client.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// `["OK", <event_id>, <true|false>, <message>]`
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    /// `["NOTICE", <message>]`
    Notice { message: String },
    /// `["EOSE", <subscription_id>]`
    Eose { subscription_id: String },
    /// `["CLOSED", <subscription_id>, <message>]`
    Closed {
        subscription_id: String,
        message: String,
    },
    /// `["AUTH", <challenge>]`
    Auth { challenge: String },
    /// `["EVENT", <subscription_id>, <event>]`; the event is left unparsed.
    Event {
        subscription_id: String,
        event: Value,
    },
}

impl RelayMessage {
    pub fn from_json(json: &str) -> Result<Self, RelayError> {
        let frame: Vec<Value> = serde_json::from_str(json)
            .map_err(|e| RelayError::Protocol(format!("frame is not a json array: {e}")))?;

        let kind = frame
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::Protocol("missing message type".to_string()))?;

        match kind {
            "OK" => Ok(RelayMessage::Ok {
                event_id: string_at(&frame, 1, "event id")?,
                accepted: frame
                    .get(2)
                    .and_then(Value::as_bool)
                    .ok_or_else(|| RelayError::Protocol("OK status is not a boolean".to_string()))?,
                message: optional_string_at(&frame, 3),
            }),
            "NOTICE" => Ok(RelayMessage::Notice {
                message: string_at(&frame, 1, "notice")?,
            }),
            "EOSE" => Ok(RelayMessage::Eose {
                subscription_id: string_at(&frame, 1, "subscription id")?,
            }),
            "CLOSED" => Ok(RelayMessage::Closed {
                subscription_id: string_at(&frame, 1, "subscription id")?,
                message: optional_string_at(&frame, 2),
            }),
            "AUTH" => Ok(RelayMessage::Auth {
                challenge: string_at(&frame, 1, "challenge")?,
            }),
            "EVENT" => Ok(RelayMessage::Event {
                subscription_id: string_at(&frame, 1, "subscription id")?,
                event: frame
                    .get(2)
                    .cloned()
                    .ok_or_else(|| RelayError::Protocol("EVENT without event".to_string()))?,
            }),
            other => Err(RelayError::Protocol(format!("unknown message type '{other}'"))),
        }
    }
}

fn string_at(frame: &[Value], index: usize, field: &str) -> Result<String, RelayError> {
    frame
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RelayError::Protocol(format!("missing {field}")))
}

fn optional_string_at(frame: &[Value], index: usize) -> String {
    frame
        .get(index)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
