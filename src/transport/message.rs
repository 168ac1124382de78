//! Wire envelope
//!
//! Every text frame is `<prefix><json>` where the prefix selects the channel
//! (`m:` for data, `c:` for control) and the JSON is `{"type": .., "payload": ..}`.
//! Frames that fail to parse are not errors: `deserialize` returns `None` and
//! the caller drops them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DATA_PREFIX: &str = "m:";
pub const CONTROL_PREFIX: &str = "c:";

/// The two logical channels multiplexed over one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Data,
    Control,
}

impl Channel {
    pub fn prefix(self) -> &'static str {
        match self {
            Channel::Data => DATA_PREFIX,
            Channel::Control => CONTROL_PREFIX,
        }
    }
}

/// A decoded `{type, payload}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl SocketMessage {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Frames a message for `channel`. Key order is always `type` then `payload`.
pub fn serialize(channel: Channel, kind: &str, payload: &Value) -> String {
    format!(
        "{}{{\"type\":{},\"payload\":{}}}",
        channel.prefix(),
        Value::String(kind.to_string()),
        payload
    )
}

/// Parses a frame if it carries `channel`'s prefix and a JSON object. A
/// missing or non-string `type` decodes as the empty string, which no typed
/// listener matches; a missing `payload` decodes as `null`.
pub fn deserialize(channel: Channel, text: &str) -> Option<SocketMessage> {
    let body = text.strip_prefix(channel.prefix())?.trim();
    let value: Value = serde_json::from_str(body).ok()?;
    let Value::Object(mut object) = value else {
        return None;
    };
    let kind = match object.remove("type") {
        Some(Value::String(kind)) => kind,
        _ => String::new(),
    };
    let payload = object.remove("payload").unwrap_or(Value::Null);
    Some(SocketMessage { kind, payload })
}

/// Tries both channels, data first.
pub fn classify(text: &str) -> Option<(Channel, SocketMessage)> {
    if let Some(message) = deserialize(Channel::Data, text) {
        return Some((Channel::Data, message));
    }
    deserialize(Channel::Control, text).map(|message| (Channel::Control, message))
}
