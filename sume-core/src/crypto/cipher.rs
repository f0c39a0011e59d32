use super::random_bytes;
use super::types::SessionKey;
use crate::envelope::Envelope;
use crate::error::{ChatError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// Encrypt `plaintext` into a data envelope under a fresh random nonce.
pub fn seal(key: &SessionKey, plaintext: &str) -> Result<Envelope> {
    let nonce_bytes = random_bytes::<NONCE_LEN>()?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| ChatError::CryptoUnavailable)?;

    // ciphertext carries the 16-byte tag at its end
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| ChatError::CryptoUnavailable)?;

    Ok(Envelope::Data {
        nonce: nonce_bytes.to_vec(),
        ciphertext,
    })
}

/// Decrypt and authenticate a data envelope body.
///
/// Every failure, including a malformed nonce or non UTF-8 plaintext, is
/// reported as `AuthenticationFailed`.
pub fn open(key: &SessionKey, nonce: &[u8], ciphertext: &[u8]) -> Result<String> {
    if nonce.len() != NONCE_LEN {
        return Err(ChatError::AuthenticationFailed);
    }
    let nonce = Nonce::from_slice(nonce);

    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| ChatError::AuthenticationFailed)?;

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| ChatError::AuthenticationFailed)?;

    String::from_utf8(plaintext).map_err(|_| ChatError::AuthenticationFailed)
}
