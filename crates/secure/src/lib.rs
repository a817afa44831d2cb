//! Sealed point-to-point messages between two peers.
//!
//! Each peer holds an X25519 key pair. A sender seals a payload for one
//! recipient; only that recipient can open it, and opening also proves the
//! message came from the holder of the sender key carried alongside it.

pub mod keys;
pub mod message;

pub use keys::{CurveKeyPair, NONCE_LEN, SecureError, parse_public_key};
pub use message::{SECURE_PLAINTEXT, SECURE_SUBJECT, SealedMessage, open_sealed, send_sealed};
