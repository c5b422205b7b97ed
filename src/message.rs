//! Ingested publications
//!
//! `Message` is what a session's run-loop hands to its sink pipeline. Notes
//! on fields:
//! - `sequence_number`: monotonic per session, starting at 1 and never reset
//!   by reconnects; used for ordering, incremental polling and gap detection
//! - `received_at`: ingestion-side timestamp, not the broker's
//! - `payload`: raw bytes as delivered; `format` says how they decoded. A
//!   payload that is not JSON is not an error, it only gets another tag.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    Json,
    Text,
    Binary,
}

impl PayloadFormat {
    pub fn detect(payload: &[u8]) -> Self {
        if serde_json::from_slice::<serde_json::Value>(payload).is_ok() {
            PayloadFormat::Json
        } else if std::str::from_utf8(payload).is_ok() {
            PayloadFormat::Text
        } else {
            PayloadFormat::Binary
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub session_id: String,
    pub topic: String,
    pub sequence_number: u64,
    pub received_at: DateTime<Utc>,
    pub qos: u8,
    pub retain: bool,
    pub format: PayloadFormat,
    pub payload: Vec<u8>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageView<'a> {
    session_id: &'a str,
    topic: &'a str,
    sequence_number: u64,
    received_at: DateTime<Utc>,
    qos: u8,
    retain: bool,
    format: PayloadFormat,
    payload: serde_json::Value,
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        MessageView {
            session_id: &self.session_id,
            topic: &self.topic,
            sequence_number: self.sequence_number,
            received_at: self.received_at,
            qos: self.qos,
            retain: self.retain,
            format: self.format,
            payload: self.payload_value(),
        }
        .serialize(serializer)
    }
}

impl Message {
    pub fn new(
        session_id: impl Into<String>,
        topic: impl Into<String>,
        sequence_number: u64,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            topic: topic.into(),
            sequence_number,
            received_at: Utc::now(),
            qos: 0,
            retain: false,
            format: PayloadFormat::detect(&payload),
            payload,
        }
    }

    pub fn with_delivery(mut self, qos: u8, retain: bool) -> Self {
        self.qos = qos;
        self.retain = retain;
        self
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    /// Structured view of the payload: parsed JSON, a string, or base64 for
    /// anything that is not UTF-8.
    pub fn payload_value(&self) -> serde_json::Value {
        match self.format {
            PayloadFormat::Json => serde_json::from_slice(&self.payload)
                .unwrap_or_else(|_| serde_json::Value::String(self.payload_text())),
            PayloadFormat::Text => serde_json::Value::String(self.payload_text()),
            PayloadFormat::Binary => serde_json::Value::String(STANDARD.encode(&self.payload)),
        }
    }

    fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// One JSON document per message; the append-log line format.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_payload_formats() {
        assert_eq!(PayloadFormat::detect(br#"{"temp":25}"#), PayloadFormat::Json);
        assert_eq!(PayloadFormat::detect(b"42"), PayloadFormat::Json);
        assert_eq!(PayloadFormat::detect(b"motion detected"), PayloadFormat::Text);
        assert_eq!(PayloadFormat::detect(&[0xff, 0xd8, 0xff]), PayloadFormat::Binary);
    }

    #[test]
    fn json_payloads_render_as_structured_values() {
        let msg = Message::new("camA", "cam/01", 7, br#"{"temp":25}"#.to_vec());
        let value: serde_json::Value = serde_json::from_str(&msg.to_json_line().unwrap()).unwrap();
        assert_eq!(value["sessionId"], "camA");
        assert_eq!(value["sequenceNumber"], 7);
        assert_eq!(value["format"], "json");
        assert_eq!(value["payload"]["temp"], 25);
    }

    #[test]
    fn binary_payloads_render_as_base64() {
        let msg = Message::new("camA", "cam/01", 1, vec![0xff, 0xd8, 0xff]);
        assert_eq!(msg.format, PayloadFormat::Binary);
        assert_eq!(msg.payload_value(), serde_json::json!("/9j/"));
    }

    #[test]
    fn with_delivery_sets_qos_and_retain() {
        let msg = Message::new("s", "t", 1, b"x".to_vec()).with_delivery(1, true);
        assert_eq!(msg.qos, 1);
        assert!(msg.retain);
    }
}
