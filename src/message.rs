//! Message catalog and wire envelope.
//!
//! The set of message kinds is closed. Each kind has a stable lowercase wire
//! identifier; unknown identifiers are rejected rather than mapped to a
//! fallback kind.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Content type marker set on every published payload.
pub const CONTENT_TYPE: &str = "application/json";

/// Kind of work a relayed message asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "notification")]
    Notification,
    #[serde(rename = "email")]
    Email,
    #[serde(rename = "log")]
    Log,
    #[serde(rename = "data_process")]
    DataProcessing,
    #[serde(rename = "report")]
    Report,
}

impl MessageKind {
    /// Every kind, in catalog order.
    pub const ALL: [MessageKind; 5] = [
        MessageKind::Notification,
        MessageKind::Email,
        MessageKind::Log,
        MessageKind::DataProcessing,
        MessageKind::Report,
    ];

    /// Stable wire identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Notification => "notification",
            MessageKind::Email => "email",
            MessageKind::Log => "log",
            MessageKind::DataProcessing => "data_process",
            MessageKind::Report => "report",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EnvelopeError::UnknownKind(s.to_string()))
    }
}

/// Errors raised while decoding a delivery body.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Body is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown message type: {0}")]
    UnknownKind(String),
}

impl EnvelopeError {
    /// True when the payload itself could not be parsed.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, EnvelopeError::UnknownKind(_))
    }
}

/// Publish payload and queue delivery body.
///
/// Serialized flat as `{"type": "<kind>", "content": "<string>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageEnvelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
}

/// Envelope as read off the wire, before the kind is resolved.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<String>,
}

impl MessageEnvelope {
    pub fn new(kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }

    /// Serialize to the UTF-8 JSON wire format.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse a delivery body.
    ///
    /// A missing or null `content` decodes as the empty string. A body that
    /// parses but names an unknown kind yields [`EnvelopeError::UnknownKind`].
    pub fn decode(body: &[u8]) -> Result<Self, EnvelopeError> {
        let text = std::str::from_utf8(body)?;
        let raw: RawEnvelope = serde_json::from_str(text)?;
        let kind = raw.kind.parse()?;
        Ok(Self {
            kind,
            content: raw.content.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_identifiers() {
        let wire: Vec<&str> = MessageKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(
            wire,
            vec!["notification", "email", "log", "data_process", "report"]
        );
    }

    #[test]
    fn test_serde_matches_as_str() {
        for kind in MessageKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = "sms".parse::<MessageKind>().unwrap_err();
        assert!(matches!(err, EnvelopeError::UnknownKind(ref s) if s == "sms"));
        assert!(!err.is_malformed());
        // Case matters on the wire
        assert!("LOG".parse::<MessageKind>().is_err());
    }

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = MessageEnvelope::new(MessageKind::Log, "hello");
        let body = envelope.encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, serde_json::json!({"type": "log", "content": "hello"}));
    }

    #[test]
    fn test_roundtrip_all_kinds() {
        for kind in MessageKind::ALL {
            for content in ["", "hello", "안녕하세요 ✉️", "quote \" and \\ slash"] {
                let envelope = MessageEnvelope::new(kind, content);
                let decoded = MessageEnvelope::decode(&envelope.encode().unwrap()).unwrap();
                assert_eq!(decoded, envelope);
            }
        }
    }

    #[test]
    fn test_missing_content_defaults_to_empty() {
        let decoded = MessageEnvelope::decode(br#"{"type": "email"}"#).unwrap();
        assert_eq!(decoded.content, "");

        let decoded = MessageEnvelope::decode(br#"{"type": "email", "content": null}"#).unwrap();
        assert_eq!(decoded.content, "");
    }

    #[test]
    fn test_malformed_bodies() {
        for body in [
            &b"not json"[..],
            &b"{\"content\": \"no type\"}"[..],
            &b"{\"type\": 42}"[..],
            &[0xff, 0xfe, 0x00][..],
        ] {
            let err = MessageEnvelope::decode(body).unwrap_err();
            assert!(err.is_malformed(), "expected malformed for {:?}", body);
        }
    }

    #[test]
    fn test_unknown_kind_in_body() {
        let err = MessageEnvelope::decode(br#"{"type": "fax", "content": "x"}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::UnknownKind(ref s) if s == "fax"));
    }
}
