use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use stockflow_core::MessageId;

use crate::event::{Event, JSON_FORMAT};

/// Header carrying the event type (e.g. `stock.sold`).
pub const HEADER_TYPE: &str = "type";
/// Header carrying the body content type.
pub const HEADER_FORMAT: &str = "format";
/// Header carrying the unique message identifier.
pub const HEADER_MSG_ID: &str = "msg_id";

/// Envelope for an event, containing routing and message metadata.
///
/// This is the unit that travels over the bus.
///
/// Notes:
/// - `subject` addresses the message (e.g. `warehouse.46.product.Apples`).
/// - `message_id` is unique per published message and survives redelivery,
///   so consumers can detect duplicates.
/// - `payload` is the event body (JSON on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    message_id: MessageId,
    subject: String,
    event_type: String,
    format: String,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        message_id: MessageId,
        subject: impl Into<String>,
        event_type: impl Into<String>,
        format: impl Into<String>,
        payload: E,
    ) -> Self {
        Self {
            message_id,
            subject: subject.into(),
            event_type: event_type.into(),
            format: format.into(),
            payload,
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    /// Message headers in wire order: `type`, `format`, `msg_id`.
    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            (HEADER_TYPE, self.event_type.clone()),
            (HEADER_FORMAT, self.format.clone()),
            (HEADER_MSG_ID, self.message_id.to_string()),
        ]
    }
}

impl EventEnvelope<JsonValue> {
    /// Wrap a typed event into a JSON envelope with a fresh message id.
    pub fn encode<E: Event>(subject: impl Into<String>, event: &E) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            MessageId::new(),
            subject,
            event.event_type(),
            JSON_FORMAT,
            serde_json::to_value(event)?,
        ))
    }

    /// Decode the JSON body into a typed payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}
