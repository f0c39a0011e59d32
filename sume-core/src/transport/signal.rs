use serde::{Deserialize, Serialize};

/// Control messages exchanged as text frames before any envelope flows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Signal {
    #[serde(rename = "hello")]
    Hello { peer_id: String },
    #[serde(rename = "welcome")]
    Welcome {
        accepted: bool,
        peer_id: String,
        message: String,
    },
}
