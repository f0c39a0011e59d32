//! Key agreement and the authenticated-encryption half of the envelope codec.
//!
//! X25519 supplies key agreement, HKDF-SHA256 turns the shared secret into a
//! session key and AES-256-GCM seals message bodies.

mod cipher;
mod manager;
mod types;

pub use cipher::{open, seal, NONCE_LEN};
pub use manager::KeyAgreementManager;
pub use types::{fingerprint, KeyStrategy, SessionKey, SESSION_KEY_LEN};

use crate::error::{ChatError, Result};
use rand::rngs::OsRng;
use rand::RngCore;

/// Fill `N` bytes from the operating system CSPRNG.
///
/// An RNG failure means the host has no usable cryptography.
pub fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|_| ChatError::CryptoUnavailable)?;
    Ok(bytes)
}
