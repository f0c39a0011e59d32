//! Error taxonomy for the secure session core.
//!
//! Every failed decrypt displays as "message could not be read" and nothing more.

use thiserror::Error;

/// Errors produced by the chat core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// The host cannot produce key material. Fatal to the session.
    #[error("cryptography is unavailable on this host")]
    CryptoUnavailable,

    /// The remote key could not be decoded or imported.
    #[error("invalid remote key: {0}")]
    InvalidRemoteKey(String),

    /// Key agreement or key derivation failed.
    #[error("key derivation failed")]
    DerivationFailed,

    /// A data envelope failed authenticated decryption.
    #[error("message could not be read")]
    AuthenticationFailed,

    #[error("connection attempt timed out")]
    TransportOpenTimeout,

    #[error("transport closed")]
    TransportClosed,

    /// Different key material arrived for an already secure session.
    #[error("conflicting session key rejected")]
    SessionKeyConflict,

    /// Another connection is already active.
    #[error("a session with {0} is already active")]
    SessionBusy(String),

    /// The remote peer refused our connection.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("not connected")]
    NotConnected,

    /// An unencrypted envelope arrived while plaintext fallback is disabled.
    #[error("unencrypted message rejected")]
    PlaintextRejected,

    /// The outbound queue was full; this many of the oldest messages were dropped.
    #[error("outbound queue full, {0} unsent message(s) dropped")]
    QueueOverflow(usize),

    /// Too many messages arrived before the session was secure.
    #[error("too many messages before the session was secure, message dropped")]
    InboundOverflow,

    #[error("invalid session transition: {0}")]
    InvalidTransition(String),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ChatError>;

impl ChatError {
    /// True for failures that end any chance of a secure session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChatError::CryptoUnavailable)
    }

    /// True for key-exchange failures the user may retry by re-sending the own key.
    pub fn is_key_exchange_failure(&self) -> bool {
        matches!(
            self,
            ChatError::InvalidRemoteKey(_) | ChatError::DerivationFailed
        )
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(e: rusqlite::Error) -> Self {
        ChatError::Storage(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ChatError::Transport(e.to_string())
    }
}

impl From<std::io::Error> for ChatError {
    fn from(e: std::io::Error) -> Self {
        ChatError::Transport(e.to_string())
    }
}
