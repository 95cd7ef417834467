//! Wire-level envelope exchanged between publisher and consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MessageParseError;

/// Routing metadata carried with every message.
///
/// `message_type` is the dispatch discriminator; an envelope without one
/// is considered malformed and is never acknowledged by the consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub message_type: String,
    pub correlation_id: Uuid,
    pub sent_at: DateTime<Utc>,
    pub source: String,
}

/// Header + payload unit carried over the broker as UTF-8 JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub header: Header,
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Build a new envelope with a fresh correlation id and current timestamp.
    pub fn new(message_type: impl Into<String>, source: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            header: Header {
                message_type: message_type.into(),
                correlation_id: Uuid::new_v4(),
                sent_at: Utc::now(),
                source: source.into(),
            },
            payload,
        }
    }

    /// Decode an envelope from raw delivery bytes.
    ///
    /// Fails if the JSON is invalid, the `header` block is missing, or
    /// `messageType` is empty.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageParseError> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        if envelope.header.message_type.is_empty() {
            return Err(MessageParseError::MissingMessageType);
        }
        Ok(envelope)
    }

    /// Serialize the envelope to wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_field_names_are_camel_case() {
        let envelope = Envelope::new("NewCustomer", "test", json!({}));
        let value: serde_json::Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();

        let header = &value["header"];
        assert_eq!(header["messageType"], "NewCustomer");
        assert!(header["correlationId"].is_string());
        assert!(header["sentAt"].is_string());
        assert_eq!(header["source"], "test");
    }

    #[test]
    fn test_missing_header_is_parse_error() {
        let raw = br#"{"payload":{}}"#;
        assert!(matches!(
            Envelope::from_bytes(raw),
            Err(MessageParseError::Json(_))
        ));
    }

    #[test]
    fn test_empty_message_type_is_parse_error() {
        let raw = serde_json::to_vec(&json!({
            "header": {
                "messageType": "",
                "correlationId": Uuid::new_v4(),
                "sentAt": Utc::now(),
                "source": "test"
            },
            "payload": {}
        }))
        .unwrap();
        assert!(matches!(
            Envelope::from_bytes(&raw),
            Err(MessageParseError::MissingMessageType)
        ));
    }

    #[test]
    fn test_round_trip() {
        let envelope = Envelope::new("PaymentReceived", "billing", json!({"amount": 12.5}));
        let decoded = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.header.message_type, "PaymentReceived");
        assert_eq!(decoded.header.correlation_id, envelope.header.correlation_id);
        assert_eq!(decoded.payload["amount"], 12.5);
    }
}
