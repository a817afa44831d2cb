//! Key pairs and the seal/open primitives.
//!
//! Sealing:
//! 1. X25519 agreement between the sender secret and the recipient public key
//! 2. SHA-256 over a domain tag, the shared secret and both public keys
//! 3. XChaCha20-Poly1305 with a random 24-byte nonce prefixed to the output

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

/// XChaCha20 nonce size.
pub const NONCE_LEN: usize = 24;

const KDF_DOMAIN: &[u8] = b"stockflow-secure-v1";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecureError {
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid sealed payload: {0}")]
    InvalidPayload(String),

    #[error("encryption failed")]
    Seal,

    /// Wrong recipient, wrong sender or tampered payload.
    #[error("decryption failed")]
    Open,

    #[error("failed to publish sealed message: {0}")]
    Publish(String),
}

/// Parse a hex-encoded X25519 public key.
pub fn parse_public_key(hex_key: &str) -> Result<PublicKey, SecureError> {
    let bytes = hex::decode(hex_key.trim()).map_err(|e| SecureError::InvalidPublicKey(e.to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| SecureError::InvalidPublicKey(format!("expected 32 bytes, got {}", b.len())))?;
    Ok(PublicKey::from(bytes))
}

/// An X25519 key pair.
pub struct CurveKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl core::fmt::Debug for CurveKeyPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CurveKeyPair")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

impl CurveKeyPair {
    /// Fresh key pair from the OS random source.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Hex-encoded public key, as shared with peers.
    pub fn public_key(&self) -> String {
        hex::encode(self.public.as_bytes())
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    fn cipher(&self, sender: &PublicKey, recipient: &PublicKey, peer: &PublicKey) -> XChaCha20Poly1305 {
        let shared = self.secret.diffie_hellman(peer);

        let mut hasher = Sha256::new();
        hasher.update(KDF_DOMAIN);
        hasher.update(shared.as_bytes());
        hasher.update(sender.as_bytes());
        hasher.update(recipient.as_bytes());
        let key = hasher.finalize();

        XChaCha20Poly1305::new(Key::from_slice(&key))
    }

    /// Seal `plaintext` for `recipient`. Output is `nonce || ciphertext`.
    pub fn seal(&self, plaintext: &[u8], recipient: &PublicKey) -> Result<Vec<u8>, SecureError> {
        let cipher = self.cipher(&self.public, recipient, recipient);

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| SecureError::Seal)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open a payload sealed for us by `sender`.
    pub fn open(&self, sealed: &[u8], sender: &PublicKey) -> Result<Vec<u8>, SecureError> {
        if sealed.len() <= NONCE_LEN {
            return Err(SecureError::InvalidPayload(format!(
                "payload of {} bytes is shorter than a nonce plus tag",
                sealed.len()
            )));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

        let cipher = self.cipher(sender, &self.public, sender);
        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| SecureError::Open)
    }
}
