use crate::error::{ChatError, Result};
use serde::Serialize;
use std::fmt;

/// Lifecycle of one connection record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    AwaitingKeyExchange,
    Secure,
    Closed,
    Errored,
}

/// Inputs that drive [`SessionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectRequested,
    TransportOpen,
    RemoteKeyAccepted,
    RemoteKeyRejected,
    /// Our own directly generated session key reached the peer.
    LocalKeyDelivered,
    TransportClosed,
    ConnectTimeout,
    Retry { link_open: bool },
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored)
    }

    /// Whether an inbound connection may take over this record's slot.
    pub fn accepts_new_connection(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Closed | SessionState::Errored
        )
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, SessionState::Secure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::AwaitingKeyExchange => "awaiting key exchange",
            SessionState::Secure => "secure",
            SessionState::Closed => "closed",
            SessionState::Errored => "errored",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute the next state. Illegal combinations return an error and the
/// caller keeps the current state.
pub fn transition(state: SessionState, event: SessionEvent) -> Result<SessionState> {
    use SessionEvent as E;
    use SessionState as S;

    let next = match (state, event) {
        (S::Idle | S::Closed | S::Errored, E::ConnectRequested) => S::Connecting,
        (S::Connecting, E::TransportOpen) => S::AwaitingKeyExchange,

        (S::AwaitingKeyExchange, E::RemoteKeyAccepted | E::LocalKeyDelivered) => S::Secure,
        (S::AwaitingKeyExchange | S::Connecting, E::RemoteKeyRejected) => S::Errored,
        // key already derived, applied once the transport opens
        (S::Connecting, E::RemoteKeyAccepted) => S::Connecting,
        // idempotent re-derivation or rejected substitution: session kept
        (S::Secure, E::RemoteKeyAccepted | E::RemoteKeyRejected) => S::Secure,

        (S::Connecting | S::AwaitingKeyExchange | S::Secure, E::TransportClosed) => S::Closed,
        (s, E::ConnectTimeout) if !s.is_terminal() => S::Errored,

        (S::Errored, E::Retry { link_open: true }) => S::AwaitingKeyExchange,
        (S::Errored | S::Closed, E::Retry { link_open: false }) => S::Idle,

        (from, event) => {
            return Err(ChatError::InvalidTransition(format!(
                "{:?} on {:?}",
                event, from
            )))
        }
    };

    Ok(next)
}
