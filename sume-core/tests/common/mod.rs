//! In-memory harness: links whose backend confirms every write and hands the
//! bytes to the test, plus a peer wrapper around `SessionManager`.

#![allow(dead_code)]

use sume_core::crypto::KeyAgreementManager;
use sume_core::transport::Outgoing;
use sume_core::{ChatEvent, Link, SessionManager, SessionSettings, SessionState, TransportKind};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

pub fn acking_link(
    remote_id: &str,
    kind: TransportKind,
    outbound: bool,
) -> (Link, UnboundedReceiver<Vec<u8>>) {
    let (link, mut rx) = Link::new(remote_id, kind, outbound);
    let (sent_tx, sent_rx) = unbounded_channel();
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            match item {
                Outgoing::Envelope { bytes, ack } => {
                    let _ = sent_tx.send(bytes);
                    let _ = ack.send(Ok(()));
                }
                Outgoing::Close => break,
            }
        }
    });
    (link, sent_rx)
}

/// Both ends of one connection. `left` is held by the dialing side.
pub struct Pipe {
    pub kind: TransportKind,
    pub left: Link,
    pub right: Link,
    pub left_sent: UnboundedReceiver<Vec<u8>>,
    pub right_sent: UnboundedReceiver<Vec<u8>>,
}

pub fn pipe(left_id: &str, right_id: &str, kind: TransportKind) -> Pipe {
    let (left, left_sent) = acking_link(right_id, kind, true);
    let (right, right_sent) = acking_link(left_id, kind, false);
    Pipe {
        kind,
        left,
        right,
        left_sent,
        right_sent,
    }
}

pub struct Peer {
    pub id: String,
    pub mgr: SessionManager,
    pub events: UnboundedReceiver<ChatEvent>,
}

impl Peer {
    pub fn new(id: &str, settings: SessionSettings) -> Self {
        let (tx, events) = unbounded_channel();
        let keys = KeyAgreementManager::generate_identity().unwrap();
        Self {
            id: id.to_string(),
            mgr: SessionManager::new(keys, settings, tx),
            events,
        }
    }

    pub fn drain(&mut self) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Delivered messages as `(text, encrypted)`, consuming other events.
    pub fn messages(&mut self) -> Vec<(String, bool)> {
        self.drain()
            .into_iter()
            .filter_map(|event| match event {
                ChatEvent::Message {
                    text, encrypted, ..
                } => Some((text, encrypted)),
                _ => None,
            })
            .collect()
    }

    pub fn state_with(&self, remote: &Peer) -> Option<SessionState> {
        self.mgr.state_of(&remote.id)
    }
}

/// Hand every frame waiting in `sent` to `to` as if it came from `from_id`.
pub async fn relay(
    sent: &mut UnboundedReceiver<Vec<u8>>,
    to: &mut Peer,
    from_id: &str,
    kind: TransportKind,
) -> usize {
    let mut count = 0;
    while let Ok(bytes) = sent.try_recv() {
        to.mgr.on_frame(from_id, kind, &bytes).await;
        count += 1;
    }
    count
}

/// Dial from `left` to `right` and run the key exchange to completion.
pub async fn establish(left: &mut Peer, right: &mut Peer, kind: TransportKind) -> Pipe {
    left.mgr.connect_requested(&right.id).unwrap();
    let mut pipe = pipe(&left.id, &right.id, kind);
    left.mgr.on_transport_open(pipe.left.clone()).await;
    assert!(right.mgr.on_incoming(&pipe.right));
    right.mgr.on_transport_open(pipe.right.clone()).await;

    let left_id = left.id.clone();
    let right_id = right.id.clone();
    relay(&mut pipe.left_sent, right, &left_id, kind).await;
    relay(&mut pipe.right_sent, left, &right_id, kind).await;
    pipe
}
