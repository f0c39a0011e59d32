//! Owns every connection record and the single active session.
//!
//! All methods take `&mut self` and are driven one event at a time by the
//! owning loop, so key derivation, the queues and the key fields always have a
//! single writer.

use super::record::ConnectionRecord;
use super::state::{SessionEvent, SessionState};
use crate::crypto::{open, KeyAgreementManager, KeyStrategy, SessionKey};
use crate::envelope::Envelope;
use crate::error::{ChatError, Result};
use crate::models::input::{ConnectTarget, OutgoingText, ValidateExt};
use crate::monitor::{ConnectivityChange, ConnectivityMonitor};
use crate::queue::{FlushReport, OutboundQueue, StopReason};
use crate::transport::{Link, TransportEvent, TransportKind};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Delivered to the user-facing side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Message {
        remote_id: String,
        text: String,
        encrypted: bool,
    },
    /// A message of ours left the queue and its send was confirmed.
    Sent {
        remote_id: String,
        text: String,
        encrypted: bool,
    },
    StateChanged {
        remote_id: String,
        state: SessionState,
    },
    Warning {
        remote_id: Option<String>,
        error: ChatError,
    },
    /// `None` means no transport is usable and sends are queued.
    TransportSwitched {
        remote_id: String,
        kind: Option<TransportKind>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { encrypted: bool },
    Queued,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionSettings {
    pub strategy: KeyStrategy,
    /// Send and accept unencrypted envelopes while no session key exists.
    pub allow_plaintext: bool,
}

pub struct SessionManager {
    keys: KeyAgreementManager,
    settings: SessionSettings,
    records: HashMap<String, ConnectionRecord>,
    /// Dialed address to the id the peer answered with.
    aliases: HashMap<String, String>,
    active: Option<String>,
    /// Messages typed before any peer was chosen.
    detached: OutboundQueue,
    monitor: ConnectivityMonitor,
    events: mpsc::UnboundedSender<ChatEvent>,
}

impl SessionManager {
    pub fn new(
        keys: KeyAgreementManager,
        settings: SessionSettings,
        events: mpsc::UnboundedSender<ChatEvent>,
    ) -> Self {
        if settings.strategy == KeyStrategy::Direct {
            warn!("Direct key transmission enabled: session keys travel in the clear");
        }
        Self {
            keys,
            settings,
            records: HashMap::new(),
            aliases: HashMap::new(),
            active: None,
            detached: OutboundQueue::new(),
            monitor: ConnectivityMonitor::new(),
            events,
        }
    }

    pub fn keys(&self) -> &KeyAgreementManager {
        &self.keys
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    /// The id a record is kept under: `remote_id` itself unless a dial of it
    /// was answered under another id.
    pub fn resolve<'a>(&'a self, remote_id: &'a str) -> &'a str {
        self.aliases.get(remote_id).map_or(remote_id, String::as_str)
    }

    pub fn state_of(&self, remote_id: &str) -> Option<SessionState> {
        self.records
            .get(self.resolve(remote_id))
            .map(ConnectionRecord::state)
    }

    pub fn active_remote(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn record(&self, remote_id: &str) -> Option<&ConnectionRecord> {
        self.records.get(self.resolve(remote_id))
    }

    /// Messages waiting on the active record, plus those typed before any peer was chosen.
    pub fn queued_len(&self) -> usize {
        let active = self
            .active
            .as_ref()
            .and_then(|id| self.records.get(id))
            .map_or(0, |record| record.queue.len());
        active + self.detached.len()
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    fn warn_user(&self, remote_id: Option<&str>, error: ChatError) {
        self.emit(ChatEvent::Warning {
            remote_id: remote_id.map(str::to_string),
            error,
        });
    }

    fn warn_dropped(&self, remote_id: Option<&str>, dropped: usize) {
        if dropped > 0 {
            self.warn_user(remote_id, ChatError::QueueOverflow(dropped));
        }
    }

    fn apply(&mut self, remote_id: &str, event: SessionEvent) -> Result<SessionState> {
        let record = self
            .records
            .get_mut(remote_id)
            .ok_or(ChatError::NotConnected)?;
        if let Some(state) = record.apply(event)? {
            let _ = self.events.send(ChatEvent::StateChanged {
                remote_id: remote_id.to_string(),
                state,
            });
        }
        Ok(record.state)
    }

    /// The active record blocks `remote_id` unless it is that same peer or finished.
    fn busy_with_other(&self, remote_id: &str) -> Option<String> {
        let active = self.active.as_ref()?;
        if active == remote_id {
            return None;
        }
        match self.records.get(active) {
            Some(record) if !record.state.accepts_new_connection() => Some(active.clone()),
            _ => None,
        }
    }

    /// Make `remote_id` the active record in `Connecting`.
    fn begin(&mut self, remote_id: &str, initiator: bool) -> Result<()> {
        let record = self
            .records
            .entry(remote_id.to_string())
            .or_insert_with(|| ConnectionRecord::new(remote_id));
        if !record.state.accepts_new_connection() {
            return Err(ChatError::InvalidTransition(format!(
                "{} is already {}",
                remote_id, record.state
            )));
        }
        record.reset_session();
        record.initiator = initiator;
        record.queue.append(&mut self.detached);
        let dropped = record.queue.take_dropped();
        self.active = Some(remote_id.to_string());
        self.apply(remote_id, SessionEvent::ConnectRequested)?;
        self.warn_dropped(Some(remote_id), dropped);
        Ok(())
    }

    /// True when `remote_id` is the active peer, its session is established or
    /// being keyed, and it has no live link of `kind`. Such a link joins the
    /// session without a new key exchange.
    fn takes_extra_transport(&self, remote_id: &str, kind: TransportKind) -> bool {
        if self.active.as_deref() != Some(remote_id) {
            return false;
        }
        self.records.get(remote_id).is_some_and(|record| {
            matches!(
                record.state,
                SessionState::Secure | SessionState::AwaitingKeyExchange
            ) && !record.has_link(kind)
        })
    }

    /// The user asked to dial `target`. The caller opens the network transport.
    ///
    /// Dialing the active peer again is allowed while it has no network link;
    /// the new link joins the running session.
    pub fn connect_requested(&mut self, target: &str) -> Result<()> {
        let remote_id = self.resolve(target).to_string();
        if let Some(active) = self.busy_with_other(&remote_id) {
            return Err(ChatError::SessionBusy(active));
        }
        if self.takes_extra_transport(&remote_id, TransportKind::Network) {
            info!(remote = %remote_id, "Dialing network transport for running session");
            return Ok(());
        }
        self.begin(&remote_id, true)
    }

    /// A dial answered under `peer_id` instead of the `dialed` address.
    ///
    /// Later dials of the address resolve to `peer_id`, and the record created
    /// for the dial moves under `peer_id`, taking over any queue an earlier
    /// session with that peer left behind.
    fn adopt_peer_id(&mut self, dialed: &str, peer_id: &str) {
        let from = self.resolve(dialed).to_string();
        if from == peer_id {
            return;
        }
        info!(dialed = %dialed, peer_id = %peer_id, "Dialed peer answers under its own id");
        self.aliases.insert(dialed.to_string(), peer_id.to_string());

        if self.active.as_deref() != Some(from.as_str())
            || self.state_of(&from) != Some(SessionState::Connecting)
        {
            return;
        }
        let Some(mut dialing) = self.records.remove(&from) else {
            return;
        };
        for target in self.aliases.values_mut() {
            if *target == from {
                *target = peer_id.to_string();
            }
        }
        dialing.remote_id = peer_id.to_string();
        if let Some(mut previous) = self.records.remove(peer_id) {
            previous.close_links();
            let mut queue = std::mem::take(&mut previous.queue);
            queue.append(&mut dialing.queue);
            dialing.queue = queue;
        }
        let dropped = dialing.queue.take_dropped();
        self.records.insert(peer_id.to_string(), dialing);
        self.active = Some(peer_id.to_string());
        self.warn_dropped(Some(peer_id), dropped);
    }

    /// A dial failed or timed out.
    pub fn on_open_failed(&mut self, target: &str, error: ChatError) {
        let remote_id = self.resolve(target).to_string();
        let remote_id = remote_id.as_str();
        if self.state_of(remote_id) != Some(SessionState::Connecting) {
            debug!(remote = %remote_id, "Ignoring open failure for idle record");
            return;
        }
        warn!(remote = %remote_id, error = %error, "Transport open failed");
        if let Err(e) = self.apply(remote_id, SessionEvent::ConnectTimeout) {
            error!(remote = %remote_id, error = %e, "Unexpected transition failure");
        }
        self.warn_user(Some(remote_id), error);
    }

    /// Decide on an inbound connection. On `true` the caller replies to the
    /// backend and then hands the link to [`Self::on_transport_open`].
    pub fn on_incoming(&mut self, link: &Link) -> bool {
        let remote_id = link.remote_id();
        if self.takes_extra_transport(remote_id, link.kind()) {
            info!(remote = %remote_id, kind = %link.kind(), "Accepting additional transport");
            return true;
        }
        let busy = match self.busy_with_other(remote_id) {
            Some(active) => Some(active),
            None => match self.records.get(remote_id) {
                Some(record) if !record.state.accepts_new_connection() => {
                    Some(remote_id.to_string())
                }
                _ => None,
            },
        };
        if let Some(active) = busy {
            warn!(remote = %remote_id, active = %active, "Refusing second connection");
            self.warn_user(Some(remote_id), ChatError::SessionBusy(active));
            return false;
        }

        match self.begin(remote_id, link.is_outbound()) {
            Ok(()) => true,
            Err(e) => {
                warn!(remote = %remote_id, error = %e, "Could not accept connection");
                false
            }
        }
    }

    /// A transport to the peer is ready. Sends the own key as required by
    /// the configured strategy.
    pub async fn on_transport_open(&mut self, link: Link) {
        let remote_id = link.remote_id().to_string();
        let kind = link.kind();
        if kind == TransportKind::Wireless {
            self.monitor.observe(ConnectivityChange::WirelessAvailable);
        }
        let state = self.state_of(&remote_id).unwrap_or(SessionState::Idle);

        match state {
            SessionState::Secure | SessionState::AwaitingKeyExchange => {
                if let Some(record) = self.records.get_mut(&remote_id) {
                    record.set_link(link);
                }
                info!(remote = %remote_id, kind = %kind, "Additional transport attached");
                self.update_route(&remote_id);
                if state.is_secure() {
                    self.flush_record(&remote_id).await;
                }
                return;
            }
            SessionState::Connecting => {}
            _ => {
                if link.is_outbound() && kind == TransportKind::Network {
                    info!(remote = %remote_id, "Dial completed after the attempt was abandoned");
                    link.close();
                    return;
                }
                if let Some(active) = self.busy_with_other(&remote_id) {
                    warn!(remote = %remote_id, active = %active, "Refusing transport while busy");
                    link.close();
                    self.warn_user(Some(&remote_id), ChatError::SessionBusy(active));
                    return;
                }
                if let Err(e) = self.begin(&remote_id, link.is_outbound()) {
                    warn!(remote = %remote_id, error = %e, "Could not start session");
                    link.close();
                    return;
                }
            }
        }

        if let Some(record) = self.records.get_mut(&remote_id) {
            record.initiator = link.is_outbound();
            record.set_link(link.clone());
        }
        info!(remote = %remote_id, kind = %kind, outbound = link.is_outbound(), "Transport open");
        if let Err(e) = self.apply(&remote_id, SessionEvent::TransportOpen) {
            error!(remote = %remote_id, error = %e, "Unexpected transition failure");
            return;
        }
        self.update_route(&remote_id);
        self.send_own_key(&remote_id, &link).await;
    }

    /// Send this side's key material on `link`, then settle the session if
    /// the remote key is already known.
    async fn send_own_key(&mut self, remote_id: &str, link: &Link) {
        let initiator = self
            .records
            .get(remote_id)
            .is_some_and(|record| record.initiator);

        match self.settings.strategy {
            KeyStrategy::Agreement => {
                let envelope = Envelope::Key {
                    key: self.keys.exported_public_key(),
                    scheme: KeyStrategy::Agreement,
                };
                if let Err(e) = self.send_envelope(link, &envelope).await {
                    warn!(remote = %remote_id, error = %e, "Could not send public key");
                    self.warn_user(Some(remote_id), e);
                    return;
                }
                debug!(remote = %remote_id, fingerprint = %self.keys.public_key_fingerprint(), "Public key sent");
            }
            KeyStrategy::Direct if initiator => {
                let session_key = match KeyAgreementManager::generate_session_key_direct() {
                    Ok(key) => key,
                    Err(e) => {
                        error!(remote = %remote_id, error = %e, "Cannot generate session key");
                        let _ = self.apply(remote_id, SessionEvent::RemoteKeyRejected);
                        self.warn_user(Some(remote_id), e);
                        return;
                    }
                };
                let envelope = Envelope::Key {
                    key: KeyAgreementManager::export_session_key(&session_key),
                    scheme: KeyStrategy::Direct,
                };
                if let Err(e) = self.send_envelope(link, &envelope).await {
                    warn!(remote = %remote_id, error = %e, "Could not send session key");
                    self.warn_user(Some(remote_id), e);
                    return;
                }
                debug!(remote = %remote_id, fingerprint = %session_key.fingerprint(), "Session key delivered");
                if let Some(record) = self.records.get_mut(remote_id) {
                    record.session_key = Some(session_key);
                }
                if self.apply(remote_id, SessionEvent::LocalKeyDelivered).is_ok() {
                    self.on_secure(remote_id).await;
                }
                return;
            }
            KeyStrategy::Direct => {
                debug!(remote = %remote_id, "Waiting for the initiator's session key");
            }
        }

        let has_key = self
            .records
            .get(remote_id)
            .is_some_and(|record| record.session_key.is_some());
        if has_key
            && self.state_of(remote_id) == Some(SessionState::AwaitingKeyExchange)
            && self.apply(remote_id, SessionEvent::RemoteKeyAccepted).is_ok()
        {
            self.on_secure(remote_id).await;
        }
    }

    async fn send_envelope(&self, link: &Link, envelope: &Envelope) -> Result<()> {
        let bytes = envelope.to_bytes()?;
        link.send(bytes).await
    }

    /// One complete envelope arrived from `remote_id`.
    pub async fn on_frame(&mut self, remote_id: &str, kind: TransportKind, bytes: &[u8]) {
        if self.active.as_deref() != Some(remote_id) || !self.records.contains_key(remote_id) {
            warn!(remote = %remote_id, kind = %kind, "Envelope from inactive peer dropped");
            return;
        }

        let envelope = match Envelope::from_bytes(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(remote = %remote_id, kind = %kind, error = %e, "Malformed envelope");
                self.warn_user(Some(remote_id), e);
                return;
            }
        };
        debug!(remote = %remote_id, kind = %kind, envelope = envelope.kind(), "Envelope received");

        match envelope {
            Envelope::Key { key, scheme } => self.on_remote_key(remote_id, &key, scheme).await,
            Envelope::Data { .. } => self.on_data(remote_id, envelope),
            Envelope::Plain { text } => {
                if self.settings.allow_plaintext {
                    warn!(remote = %remote_id, "Unencrypted message delivered");
                    self.emit(ChatEvent::Message {
                        remote_id: remote_id.to_string(),
                        text,
                        encrypted: false,
                    });
                } else {
                    warn!(remote = %remote_id, "Unencrypted message rejected");
                    self.warn_user(Some(remote_id), ChatError::PlaintextRejected);
                }
            }
        }
    }

    fn on_data(&mut self, remote_id: &str, envelope: Envelope) {
        let Some(record) = self.records.get_mut(remote_id) else {
            return;
        };
        match record.state {
            SessionState::Secure => {
                if let Some(key) = record.session_key.clone() {
                    self.deliver(remote_id, &key, envelope);
                }
            }
            SessionState::Connecting
            | SessionState::AwaitingKeyExchange
            | SessionState::Errored => {
                if !record.hold(envelope) {
                    warn!(remote = %remote_id, "Too many envelopes before the key, dropping");
                    self.warn_user(Some(remote_id), ChatError::InboundOverflow);
                    return;
                }
                debug!(
                    remote = %remote_id,
                    pending = record.pending_inbound.len(),
                    "Data envelope held until the session is secure"
                );
            }
            SessionState::Idle | SessionState::Closed => {
                warn!(remote = %remote_id, "Data envelope for closed session dropped");
                self.warn_user(Some(remote_id), ChatError::NotConnected);
            }
        }
    }

    fn deliver(&self, remote_id: &str, key: &SessionKey, envelope: Envelope) {
        let Envelope::Data { nonce, ciphertext } = envelope else {
            return;
        };
        match open(key, &nonce, &ciphertext) {
            Ok(text) => self.emit(ChatEvent::Message {
                remote_id: remote_id.to_string(),
                text,
                encrypted: true,
            }),
            Err(e) => {
                warn!(remote = %remote_id, "Message failed authentication");
                self.warn_user(Some(remote_id), e);
            }
        }
    }

    async fn on_remote_key(&mut self, remote_id: &str, encoded: &str, scheme: KeyStrategy) {
        let derived = if scheme != self.settings.strategy {
            Err(ChatError::InvalidRemoteKey(format!(
                "peer uses {} key exchange, expected {}",
                scheme.as_str(),
                self.settings.strategy.as_str()
            )))
        } else {
            match scheme {
                KeyStrategy::Agreement => self.keys.derive_session(encoded),
                KeyStrategy::Direct => KeyAgreementManager::import_session_key(encoded),
            }
        };

        let state = self.state_of(remote_id).unwrap_or(SessionState::Idle);
        let session_key = match derived {
            Ok(key) => key,
            Err(e) => {
                warn!(remote = %remote_id, state = %state, error = %e, "Remote key rejected");
                if matches!(
                    state,
                    SessionState::Connecting | SessionState::AwaitingKeyExchange
                ) {
                    let _ = self.apply(remote_id, SessionEvent::RemoteKeyRejected);
                }
                self.warn_user(Some(remote_id), e);
                return;
            }
        };

        let Some(record) = self.records.get_mut(remote_id) else {
            return;
        };
        match state {
            SessionState::Secure => {
                if record.session_key.as_ref() == Some(&session_key) {
                    debug!(remote = %remote_id, "Repeated key exchange, session unchanged");
                } else {
                    warn!(remote = %remote_id, "Conflicting key for secure session rejected");
                    self.warn_user(Some(remote_id), ChatError::SessionKeyConflict);
                }
            }
            SessionState::AwaitingKeyExchange => {
                info!(remote = %remote_id, fingerprint = %session_key.fingerprint(), "Session key established");
                record.session_key = Some(session_key);
                if self.apply(remote_id, SessionEvent::RemoteKeyAccepted).is_ok() {
                    self.on_secure(remote_id).await;
                }
            }
            SessionState::Connecting | SessionState::Errored => {
                debug!(remote = %remote_id, state = %state, "Remote key held until the transport is ready");
                record.session_key = Some(session_key);
            }
            SessionState::Idle | SessionState::Closed => {
                debug!(remote = %remote_id, "Key for inactive session ignored");
            }
        }
    }

    /// Entered `Secure`: release held inbound envelopes, then the queue.
    async fn on_secure(&mut self, remote_id: &str) {
        let Some(record) = self.records.get_mut(remote_id) else {
            return;
        };
        let Some(key) = record.session_key.clone() else {
            return;
        };
        let held: Vec<Envelope> = record.pending_inbound.drain(..).collect();
        info!(
            remote = %remote_id,
            fingerprint = %key.fingerprint(),
            held = held.len(),
            "Session secure"
        );

        for envelope in held {
            self.deliver(remote_id, &key, envelope);
        }
        self.update_route(remote_id);
        self.flush_record(remote_id).await;
    }

    /// Recompute the route and report switches.
    fn update_route(&mut self, remote_id: &str) {
        let Some(record) = self.records.get_mut(remote_id) else {
            return;
        };
        let route = record.preferred_route(&self.monitor);
        if route == record.route {
            return;
        }
        record.route = route;
        match route {
            Some(kind) => info!(remote = %remote_id, kind = %kind, "Transport selected"),
            None => info!(remote = %remote_id, "No transport available, sends will queue"),
        }
        let _ = self.events.send(ChatEvent::TransportSwitched {
            remote_id: remote_id.to_string(),
            kind: route,
        });
    }

    async fn flush_record(&mut self, remote_id: &str) -> Option<FlushReport> {
        let allow_plaintext = self.settings.allow_plaintext;
        let record = self.records.get_mut(remote_id)?;
        if record.queue.is_empty() {
            return None;
        }
        let link = record.active_link(&self.monitor)?.clone();
        let key = if record.state.is_secure() {
            record.session_key.clone()
        } else {
            None
        };

        let report = record
            .queue
            .flush(&link, key.as_ref(), allow_plaintext)
            .await;
        for entry in &report.sent {
            self.emit(ChatEvent::Sent {
                remote_id: remote_id.to_string(),
                text: entry.text.clone(),
                encrypted: report.encrypted,
            });
        }
        if let Some(StopReason::SendFailed(e)) = &report.stopped {
            self.warn_user(Some(remote_id), e.clone());
        }
        Some(report)
    }

    /// Flush the active record's queue over its preferred transport.
    pub async fn flush(&mut self) -> Option<FlushReport> {
        let remote_id = self.active.clone()?;
        self.flush_record(&remote_id).await
    }

    /// Queue `text` and flush. Reports `Sent` only when the message left the queue.
    pub async fn send_message(&mut self, text: &str) -> Result<SendOutcome> {
        let input = OutgoingText::new(text);
        input.validate_input()?;

        let Some(record) = self
            .active
            .as_ref()
            .and_then(|remote_id| self.records.get_mut(remote_id))
        else {
            self.detached.enqueue(input.text, None);
            debug!(queued = self.detached.len(), "No peer yet, message queued");
            let dropped = self.detached.take_dropped();
            self.warn_dropped(None, dropped);
            return Ok(SendOutcome::Queued);
        };
        let remote_id = record.remote_id.clone();

        let key = if record.state.is_secure() {
            record.session_key.clone()
        } else {
            None
        };
        let id = record.queue.enqueue(input.text, key.as_ref());
        let dropped = record.queue.take_dropped();
        self.warn_dropped(Some(&remote_id), dropped);

        match self.flush_record(&remote_id).await {
            Some(report) if report.sent.iter().any(|entry| entry.id == id) => {
                Ok(SendOutcome::Sent {
                    encrypted: report.encrypted,
                })
            }
            _ => Ok(SendOutcome::Queued),
        }
    }

    /// A backend reported a link gone. Stale link ids are ignored.
    pub async fn on_transport_closed(&mut self, remote_id: &str, kind: TransportKind, link_id: u64) {
        let Some(record) = self.records.get_mut(remote_id) else {
            return;
        };
        if !record.drop_link(kind, link_id) {
            debug!(remote = %remote_id, kind = %kind, link_id, "Stale close ignored");
            return;
        }
        info!(remote = %remote_id, kind = %kind, "Transport closed");

        if record.has_open_link() {
            let secure = record.state.is_secure();
            self.update_route(remote_id);
            if secure {
                self.flush_record(remote_id).await;
            }
            return;
        }

        self.end_session(remote_id);
        self.update_route(remote_id);
    }

    fn end_session(&mut self, remote_id: &str) {
        let Some(record) = self.records.get(remote_id) else {
            return;
        };
        if !matches!(
            record.state,
            SessionState::Connecting | SessionState::AwaitingKeyExchange | SessionState::Secure
        ) {
            return;
        }
        if self.apply(remote_id, SessionEvent::TransportClosed).is_err() {
            return;
        }
        let Some(record) = self.records.get_mut(remote_id) else {
            return;
        };
        let discarded = record.pending_inbound.len();
        record.reset_session();
        let queued = record.queue.len();
        info!(remote = %remote_id, queued, "Session closed, queue kept for reconnect");
        if discarded > 0 {
            warn!(remote = %remote_id, discarded, "Unread envelopes discarded");
            self.warn_user(Some(remote_id), ChatError::TransportClosed);
        }
    }

    /// Feed a reachability or availability change.
    ///
    /// Returns the peer to dial over the network when the network is reachable
    /// and the running session lacks a network link. The dialing side of the
    /// session is the one that re-dials, so both peers never dial at once.
    pub async fn on_connectivity(&mut self, change: ConnectivityChange) -> Option<String> {
        let changed = self.monitor.observe(change);
        let remote_id = self.active.clone()?;
        if changed {
            self.update_route(&remote_id);
            if self.state_of(&remote_id) == Some(SessionState::Secure) {
                self.flush_record(&remote_id).await;
            }
        }
        if change != ConnectivityChange::NetworkReachable {
            return None;
        }
        self.network_redial_target(&remote_id)
    }

    fn network_redial_target(&self, remote_id: &str) -> Option<String> {
        let record = self.records.get(remote_id)?;
        if !record.initiator || !self.takes_extra_transport(remote_id, TransportKind::Network) {
            return None;
        }
        let target = ConnectTarget {
            url: remote_id.to_string(),
        };
        if target.validate_input().is_err() {
            debug!(remote = %remote_id, "Peer id is not dialable, staying on current transport");
            return None;
        }
        info!(remote = %remote_id, "Network reachable, re-dialing peer");
        Some(target.url)
    }

    /// Manual recovery. Re-sends the own key when a link is still open,
    /// otherwise returns to `Idle` and the caller dials again.
    pub async fn retry(&mut self) -> Result<SessionState> {
        let remote_id = self.active.clone().ok_or(ChatError::NotConnected)?;
        let record = self
            .records
            .get(&remote_id)
            .ok_or(ChatError::NotConnected)?;
        let link_open = record.has_open_link();
        let link = record.active_link(&self.monitor).cloned();

        let state = self.apply(&remote_id, SessionEvent::Retry { link_open })?;
        info!(remote = %remote_id, state = %state, "Retrying session");
        if state == SessionState::AwaitingKeyExchange {
            if let Some(link) = link {
                self.send_own_key(&remote_id, &link).await;
            }
        }
        Ok(self.state_of(&remote_id).unwrap_or(state))
    }

    /// Close the active session. The queue is kept.
    pub fn close(&mut self) -> Result<()> {
        let remote_id = self.active.clone().ok_or(ChatError::NotConnected)?;
        let record = self
            .records
            .get_mut(&remote_id)
            .ok_or(ChatError::NotConnected)?;
        record.close_links();
        info!(remote = %remote_id, "Session closed by user");
        self.end_session(&remote_id);
        self.update_route(&remote_id);
        Ok(())
    }

    /// Dispatch one backend event. Inbound connections are answered here.
    pub async fn handle(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened { link, dialed } => {
                if let Some(dialed) = dialed {
                    self.adopt_peer_id(&dialed, link.remote_id());
                }
                self.on_transport_open(link).await
            }
            TransportEvent::OpenFailed { remote_id, error } => {
                self.on_open_failed(&remote_id, error)
            }
            TransportEvent::Incoming { link, reply } => {
                let accepted = self.on_incoming(&link);
                if reply.send(accepted).is_err() {
                    debug!(remote = %link.remote_id(), "Inbound connection vanished before reply");
                }
                if accepted {
                    self.on_transport_open(link).await;
                }
            }
            TransportEvent::Frame {
                remote_id,
                kind,
                bytes,
            } => self.on_frame(&remote_id, kind, &bytes).await,
            TransportEvent::Closed {
                remote_id,
                kind,
                link_id,
            } => self.on_transport_closed(&remote_id, kind, link_id).await,
        }
    }
}
