use super::state::{transition, SessionEvent, SessionState};
use crate::crypto::SessionKey;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::monitor::ConnectivityMonitor;
use crate::queue::{OutboundQueue, MAX_QUEUED_MESSAGES};
use crate::transport::{Link, TransportKind};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Most data envelopes held for a record while its key exchange is pending.
pub const MAX_HELD_ENVELOPES: usize = MAX_QUEUED_MESSAGES;

/// Logical link to one remote peer.
#[derive(Debug)]
pub struct ConnectionRecord {
    pub(crate) remote_id: String,
    pub(crate) state: SessionState,
    /// True when this side dialed or requested the device.
    pub(crate) initiator: bool,
    pub(crate) network: Option<Link>,
    pub(crate) wireless: Option<Link>,
    pub(crate) route: Option<TransportKind>,
    pub(crate) session_key: Option<SessionKey>,
    /// Data envelopes that arrived before the session became secure.
    pub(crate) pending_inbound: VecDeque<Envelope>,
    pub(crate) queue: OutboundQueue,
}

impl ConnectionRecord {
    pub fn new(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            state: SessionState::Idle,
            initiator: false,
            network: None,
            wireless: None,
            route: None,
            session_key: None,
            pending_inbound: VecDeque::new(),
            queue: OutboundQueue::new(),
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn route(&self) -> Option<TransportKind> {
        self.route
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    /// Advance the state machine. Returns the new state when it changed.
    pub(crate) fn apply(&mut self, event: SessionEvent) -> Result<Option<SessionState>> {
        let next = transition(self.state, event)?;
        if next == self.state {
            debug!(remote = %self.remote_id, state = %next, event = ?event, "State unchanged");
            return Ok(None);
        }
        info!(
            remote = %self.remote_id,
            from = %self.state,
            to = %next,
            "Session state changed"
        );
        self.state = next;
        Ok(Some(next))
    }

    /// Forget everything tied to a previous establishment.
    pub(crate) fn reset_session(&mut self) {
        self.session_key = None;
        self.pending_inbound.clear();
    }

    /// Hold a data envelope until the session is secure. False when full.
    pub(crate) fn hold(&mut self, envelope: Envelope) -> bool {
        if self.pending_inbound.len() >= MAX_HELD_ENVELOPES {
            return false;
        }
        self.pending_inbound.push_back(envelope);
        true
    }

    pub fn link(&self, kind: TransportKind) -> Option<&Link> {
        match kind {
            TransportKind::Network => self.network.as_ref(),
            TransportKind::Wireless => self.wireless.as_ref(),
        }
    }

    pub fn has_link(&self, kind: TransportKind) -> bool {
        self.link(kind).is_some_and(Link::is_open)
    }

    pub fn has_open_link(&self) -> bool {
        self.has_link(TransportKind::Network) || self.has_link(TransportKind::Wireless)
    }

    /// Install `link`, closing any link of the same kind it replaces.
    pub(crate) fn set_link(&mut self, link: Link) {
        let slot = match link.kind() {
            TransportKind::Network => &mut self.network,
            TransportKind::Wireless => &mut self.wireless,
        };
        if let Some(previous) = slot.replace(link) {
            previous.close();
        }
    }

    /// Remove the link with `link_id`. False when that link is no longer installed.
    pub(crate) fn drop_link(&mut self, kind: TransportKind, link_id: u64) -> bool {
        let slot = match kind {
            TransportKind::Network => &mut self.network,
            TransportKind::Wireless => &mut self.wireless,
        };
        if slot.as_ref().is_some_and(|link| link.id() == link_id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn close_links(&mut self) {
        for link in [self.network.take(), self.wireless.take()].into_iter().flatten() {
            link.close();
        }
    }

    pub(crate) fn preferred_route(&self, monitor: &ConnectivityMonitor) -> Option<TransportKind> {
        monitor.preferred_route(
            self.has_link(TransportKind::Network),
            self.has_link(TransportKind::Wireless),
        )
    }

    pub(crate) fn active_link(&self, monitor: &ConnectivityMonitor) -> Option<&Link> {
        self.preferred_route(monitor).and_then(|kind| self.link(kind))
    }
}
