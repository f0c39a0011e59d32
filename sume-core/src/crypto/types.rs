use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};

/// Length of symmetric session keys in bytes (AES-256).
pub const SESSION_KEY_LEN: usize = 32;

/// How two endpoints come to share a session key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStrategy {
    /// X25519 agreement; only public keys cross the wire.
    #[default]
    Agreement,
    /// Legacy mode: one side generates the session key and sends it as-is.
    /// Anyone who observes the key envelope can read the whole session.
    Direct,
}

impl KeyStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStrategy::Agreement => "agreement",
            KeyStrategy::Direct => "direct",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "agreement" | "ecdh" => Some(KeyStrategy::Agreement),
            "direct" => Some(KeyStrategy::Direct),
            _ => None,
        }
    }
}

/// Internal key pair for X25519 key exchange
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: StaticSecret,
}

/// Symmetric key securing one connection's data envelopes.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey {
    bytes: [u8; SESSION_KEY_LEN],
}

impl SessionKey {
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.bytes
    }

    /// Short identifier safe to log and to compare keys by.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.bytes)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// First 8 bytes of SHA-256 over `bytes`, hex encoded.
pub fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..8])
}
