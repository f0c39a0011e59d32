use super::random_bytes;
use super::types::{fingerprint, KeyPair, SessionKey, SESSION_KEY_LEN};
use crate::error::{ChatError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hkdf::Hkdf;
use sha2::Sha256;
use tracing::debug;
use x25519_dalek::{PublicKey, StaticSecret};

const SESSION_INFO: &[u8] = b"sume-chat session v1";
const PUBLIC_KEY_LEN: usize = 32;

/// Owns this endpoint's identity key pair and turns remote key material into
/// session keys. The private key never leaves this struct.
pub struct KeyAgreementManager {
    identity: KeyPair,
}

impl KeyAgreementManager {
    /// Generate a fresh X25519 identity from OS randomness.
    pub fn generate_identity() -> Result<Self> {
        let seed = random_bytes::<32>()?;
        let private_key = StaticSecret::from(seed);
        let public_key = PublicKey::from(&private_key);

        debug!(fingerprint = %fingerprint(public_key.as_bytes()), "Generated identity key");

        Ok(Self {
            identity: KeyPair {
                public_key,
                private_key,
            },
        })
    }

    /// Public key in its transportable (base64) form.
    pub fn exported_public_key(&self) -> String {
        STANDARD.encode(self.identity.public_key.as_bytes())
    }

    pub fn public_key_fingerprint(&self) -> String {
        fingerprint(self.identity.public_key.as_bytes())
    }

    /// Derive the session key shared with the owner of `remote_public_key`.
    ///
    /// Deterministic for a given remote key: both peers salt HKDF with the
    /// sorted pair of public keys and end up with the same 32 bytes.
    pub fn derive_session(&self, remote_public_key: &str) -> Result<SessionKey> {
        let remote_bytes = decode_key::<PUBLIC_KEY_LEN>(remote_public_key)?;
        let own_bytes = *self.identity.public_key.as_bytes();

        if remote_bytes == own_bytes {
            return Err(ChatError::InvalidRemoteKey(
                "remote key equals our own".to_string(),
            ));
        }

        let remote_public = PublicKey::from(remote_bytes);
        let shared_secret = self.identity.private_key.diffie_hellman(&remote_public);
        if !shared_secret.was_contributory() {
            return Err(ChatError::DerivationFailed);
        }

        let mut salt = Vec::with_capacity(PUBLIC_KEY_LEN * 2);
        if own_bytes <= remote_bytes {
            salt.extend_from_slice(&own_bytes);
            salt.extend_from_slice(&remote_bytes);
        } else {
            salt.extend_from_slice(&remote_bytes);
            salt.extend_from_slice(&own_bytes);
        }

        let hk = Hkdf::<Sha256>::new(Some(&salt), shared_secret.as_bytes());
        let mut session_key = [0u8; SESSION_KEY_LEN];
        hk.expand(SESSION_INFO, &mut session_key)
            .map_err(|_| ChatError::DerivationFailed)?;

        Ok(SessionKey::from_bytes(session_key))
    }

    /// Legacy strategy: a random session key meant to be sent to the peer as-is.
    pub fn generate_session_key_direct() -> Result<SessionKey> {
        Ok(SessionKey::from_bytes(random_bytes::<SESSION_KEY_LEN>()?))
    }

    /// Wire form of a directly transmitted session key.
    pub fn export_session_key(key: &SessionKey) -> String {
        STANDARD.encode(key.as_bytes())
    }

    /// Import a session key received under the direct strategy.
    pub fn import_session_key(encoded: &str) -> Result<SessionKey> {
        Ok(SessionKey::from_bytes(decode_key::<SESSION_KEY_LEN>(encoded)?))
    }
}

fn decode_key<const N: usize>(encoded: &str) -> Result<[u8; N]> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|_| ChatError::InvalidRemoteKey("not valid base64".to_string()))?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        ChatError::InvalidRemoteKey(format!("expected {} bytes, got {}", N, len))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_sides_derive_same_key() {
        let alice = KeyAgreementManager::generate_identity().unwrap();
        let bob = KeyAgreementManager::generate_identity().unwrap();

        let a = alice.derive_session(&bob.exported_public_key()).unwrap();
        let b = bob.derive_session(&alice.exported_public_key()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_derive_is_deterministic() {
        let alice = KeyAgreementManager::generate_identity().unwrap();
        let bob = KeyAgreementManager::generate_identity().unwrap();
        let remote = bob.exported_public_key();

        let first = alice.derive_session(&remote).unwrap();
        let second = alice.derive_session(&remote).unwrap();
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn test_different_remote_gives_different_key() {
        let alice = KeyAgreementManager::generate_identity().unwrap();
        let bob = KeyAgreementManager::generate_identity().unwrap();
        let carol = KeyAgreementManager::generate_identity().unwrap();

        let with_bob = alice.derive_session(&bob.exported_public_key()).unwrap();
        let with_carol = alice.derive_session(&carol.exported_public_key()).unwrap();
        assert_ne!(with_bob, with_carol);
    }

    #[test]
    fn test_malformed_remote_key() {
        let alice = KeyAgreementManager::generate_identity().unwrap();

        assert!(matches!(
            alice.derive_session("not base64 !!!"),
            Err(ChatError::InvalidRemoteKey(_))
        ));
        assert!(matches!(
            alice.derive_session(&STANDARD.encode([1u8; 16])),
            Err(ChatError::InvalidRemoteKey(_))
        ));
        assert!(matches!(
            alice.derive_session(&alice.exported_public_key()),
            Err(ChatError::InvalidRemoteKey(_))
        ));
    }

    #[test]
    fn test_low_order_point_rejected() {
        let alice = KeyAgreementManager::generate_identity().unwrap();
        let zero_point = STANDARD.encode([0u8; 32]);
        assert_eq!(
            alice.derive_session(&zero_point),
            Err(ChatError::DerivationFailed)
        );
    }

    #[test]
    fn test_direct_key_round_trip() {
        let key = KeyAgreementManager::generate_session_key_direct().unwrap();
        let wire = KeyAgreementManager::export_session_key(&key);
        let imported = KeyAgreementManager::import_session_key(&wire).unwrap();
        assert_eq!(key, imported);
    }
}
