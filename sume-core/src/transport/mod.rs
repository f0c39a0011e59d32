//! Uniform send/receive capability over the two backends.
//!
//! Backends never call into the session layer directly. They post
//! [`TransportEvent`]s into one channel and expose each connection as a
//! [`Link`] whose writes are confirmed by the backend task that owns the
//! underlying socket or characteristic.

pub mod framing;
pub mod network;
mod signal;
pub mod wireless;

pub use network::NetworkTransport;
pub use wireless::{GattLink, WirelessTransport};

use crate::error::{ChatError, Result};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Network,
    Wireless,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Network => f.write_str("network"),
            TransportKind::Wireless => f.write_str("wireless"),
        }
    }
}

/// Work item for the task that owns a connection.
#[derive(Debug)]
pub enum Outgoing {
    /// One serialized envelope. The backend answers on `ack` once written.
    Envelope {
        bytes: Vec<u8>,
        ack: oneshot::Sender<Result<()>>,
    },
    Close,
}

/// Cloneable handle to one open connection.
#[derive(Debug, Clone)]
pub struct Link {
    id: u64,
    remote_id: String,
    kind: TransportKind,
    outbound: bool,
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl Link {
    /// Create a handle plus the receiving end its backend task drains.
    ///
    /// `outbound` is true when this side initiated the connection.
    pub fn new(
        remote_id: impl Into<String>,
        kind: TransportKind,
        outbound: bool,
    ) -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = Self {
            id: NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed),
            remote_id: remote_id.into(),
            kind,
            outbound,
            tx,
        };
        (link, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn is_outbound(&self) -> bool {
        self.outbound
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Send one envelope and wait until the backend confirms the write.
    pub async fn send(&self, bytes: Vec<u8>) -> Result<()> {
        let (ack, confirmed) = oneshot::channel();
        self.tx
            .send(Outgoing::Envelope { bytes, ack })
            .map_err(|_| ChatError::TransportClosed)?;
        confirmed.await.map_err(|_| ChatError::TransportClosed)?
    }

    pub fn close(&self) {
        let _ = self.tx.send(Outgoing::Close);
    }
}

/// Everything a backend reports to the session layer.
#[derive(Debug)]
pub enum TransportEvent {
    /// A dial or attach completed. `link` carries the id the peer announced;
    /// `dialed` is the address that was dialed, when it may differ.
    Opened {
        link: Link,
        dialed: Option<String>,
    },
    OpenFailed {
        remote_id: String,
        error: ChatError,
    },
    /// Inbound connection attempt; answer `true` on `reply` to accept it.
    Incoming {
        link: Link,
        reply: oneshot::Sender<bool>,
    },
    /// One complete envelope, already reassembled.
    Frame {
        remote_id: String,
        kind: TransportKind,
        bytes: Vec<u8>,
    },
    Closed {
        remote_id: String,
        kind: TransportKind,
        link_id: u64,
    },
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
