//! Sealed messages on the bus.

use serde::{Deserialize, Serialize};
use tracing::info;

use stockflow_events::{EventBus, Routed};

use crate::keys::{CurveKeyPair, SecureError, parse_public_key};

/// Subject sealed messages are exchanged on.
pub const SECURE_SUBJECT: &str = "secure.data";

/// Fixed payload of the demo exchange.
pub const SECURE_PLAINTEXT: &str = "Hello Secure World";

/// A sealed payload plus the sender's public key needed to open it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedMessage {
    pub subject: String,
    /// Hex-encoded X25519 public key of the sender.
    pub sender: String,
    /// Hex-encoded `nonce || ciphertext`.
    pub data: String,
}

impl Routed for SealedMessage {
    fn subject(&self) -> &str {
        &self.subject
    }
}

/// Seal `plaintext` for `recipient` (hex public key) and publish it once.
pub fn send_sealed<B>(
    bus: &B,
    keys: &CurveKeyPair,
    recipient: &str,
    plaintext: &[u8],
) -> Result<SealedMessage, SecureError>
where
    B: EventBus<SealedMessage>,
{
    let recipient_key = parse_public_key(recipient)?;
    let sealed = keys.seal(plaintext, &recipient_key)?;

    let message = SealedMessage {
        subject: SECURE_SUBJECT.to_string(),
        sender: keys.public_key(),
        data: hex::encode(sealed),
    };

    bus.publish(message.clone())
        .map_err(|e| SecureError::Publish(e.to_string()))?;
    info!(subject = SECURE_SUBJECT, bytes = plaintext.len(), "sealed message sent");

    Ok(message)
}

/// Open a received message with our keys and the sender key it carries.
pub fn open_sealed(keys: &CurveKeyPair, message: &SealedMessage) -> Result<Vec<u8>, SecureError> {
    let sender = parse_public_key(&message.sender)?;
    let sealed = hex::decode(&message.data).map_err(|e| SecureError::InvalidPayload(e.to_string()))?;
    keys.open(&sealed, &sender)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use stockflow_events::{InMemoryEventBus, SubjectFilter};

    #[test]
    fn exchange_over_the_bus() {
        let bus: InMemoryEventBus<SealedMessage> = InMemoryEventBus::new();
        let receiver = CurveKeyPair::generate();
        let sender = CurveKeyPair::generate();

        let inbox = bus.subscribe(&SubjectFilter::parse(SECURE_SUBJECT).unwrap());
        send_sealed(&bus, &sender, &receiver.public_key(), SECURE_PLAINTEXT.as_bytes()).unwrap();

        let message = inbox.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(message.subject, SECURE_SUBJECT);
        assert_eq!(message.sender, sender.public_key());

        let opened = open_sealed(&receiver, &message).unwrap();
        assert_eq!(String::from_utf8(opened).unwrap(), SECURE_PLAINTEXT);
    }

    #[test]
    fn invalid_recipient_key_is_rejected_before_publishing() {
        let bus: InMemoryEventBus<SealedMessage> = InMemoryEventBus::new();
        let sender = CurveKeyPair::generate();

        let err = send_sealed(&bus, &sender, "not-hex", b"x").unwrap_err();
        assert!(matches!(err, SecureError::InvalidPublicKey(_)));
        assert!(bus.published().is_empty());
    }

    #[test]
    fn sealed_message_json_shape() {
        let message = SealedMessage {
            subject: SECURE_SUBJECT.into(),
            sender: "ab".into(),
            data: "cd".into(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json, serde_json::json!({"subject": "secure.data", "sender": "ab", "data": "cd"}));
    }

    #[test]
    fn garbled_data_is_an_invalid_payload() {
        let receiver = CurveKeyPair::generate();
        let sender = CurveKeyPair::generate();
        let message = SealedMessage {
            subject: SECURE_SUBJECT.into(),
            sender: sender.public_key(),
            data: "xyz".into(),
        };
        assert!(matches!(open_sealed(&receiver, &message), Err(SecureError::InvalidPayload(_))));
    }
}
