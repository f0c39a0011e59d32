use crate::crypto::KeyStrategy;
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};

/// One logical unit of wire data, identical on every transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Envelope {
    /// Exported public key (agreement) or raw session key (direct).
    #[serde(rename = "key")]
    Key {
        key: String,
        #[serde(default)]
        scheme: KeyStrategy,
    },
    /// Sealed message: nonce plus ciphertext with the tag appended.
    #[serde(rename = "data")]
    Data {
        #[serde(with = "base64_bytes")]
        nonce: Vec<u8>,
        #[serde(with = "base64_bytes")]
        ciphertext: Vec<u8>,
    },
    /// Unencrypted pre-session fallback. Must be shown to the user as such.
    #[serde(rename = "plain")]
    Plain { text: String },
}

impl Envelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ChatError::MalformedEnvelope(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ChatError::MalformedEnvelope(e.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Key { .. } => "key",
            Envelope::Data { .. } => "data",
            Envelope::Plain { .. } => "plain",
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(D::Error::custom)
    }
}
