//! FIFO buffer of user messages waiting for a ready link and session.

use crate::crypto::{seal, SessionKey};
use crate::envelope::Envelope;
use crate::error::ChatError;
use crate::transport::Link;
use chrono::Utc;
use std::collections::VecDeque;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const MAX_QUEUED_MESSAGES: usize = 1000;

/// One message awaiting delivery. Holds the plaintext, never the key.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub id: Uuid,
    pub text: String,
    pub queued_at: i64,
    /// Envelope sealed at enqueue time, tagged with the key fingerprint.
    sealed: Option<(String, Envelope)>,
}

impl QueuedMessage {
    pub fn is_presealed(&self) -> bool {
        self.sealed.is_some()
    }

    fn envelope(&self, key: &SessionKey, key_fingerprint: &str) -> Result<Envelope, ChatError> {
        match &self.sealed {
            Some((fingerprint, envelope)) if fingerprint == key_fingerprint => Ok(envelope.clone()),
            _ => seal(key, &self.text),
        }
    }
}

/// Why a flush ended before the queue drained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// No session key and plaintext fallback is off.
    NoKey,
    SendFailed(ChatError),
}

#[derive(Debug, Default)]
pub struct FlushReport {
    /// Entries confirmed by the link, in send order.
    pub sent: Vec<QueuedMessage>,
    pub encrypted: bool,
    pub remaining: usize,
    pub stopped: Option<StopReason>,
}

impl FlushReport {
    pub fn sent_ids(&self) -> Vec<Uuid> {
        self.sent.iter().map(|entry| entry.id).collect()
    }
}

#[derive(Debug, Default)]
pub struct OutboundQueue {
    entries: VecDeque<QueuedMessage>,
    /// Entries evicted at capacity since the last `take_dropped`.
    dropped: usize,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `text`. When a key is already known the envelope is sealed now
    /// and reused at flush time if that key is still the active one.
    pub fn enqueue(&mut self, text: impl Into<String>, key: Option<&SessionKey>) -> Uuid {
        let text = text.into();
        let sealed = key.and_then(|key| match seal(key, &text) {
            Ok(envelope) => Some((key.fingerprint(), envelope)),
            Err(e) => {
                warn!(error = %e, "Could not pre-seal queued message");
                None
            }
        });

        self.make_room();

        let id = Uuid::new_v4();
        self.entries.push_back(QueuedMessage {
            id,
            text,
            queued_at: Utc::now().timestamp_millis(),
            sealed,
        });
        debug!(id = %id, queued = self.entries.len(), "Message queued");
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.iter().any(|entry| entry.id == *id)
    }

    pub fn texts(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.text.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.entries.iter()
    }

    /// Move every entry of `other` behind the existing ones.
    pub fn append(&mut self, other: &mut OutboundQueue) {
        self.dropped += std::mem::take(&mut other.dropped);
        while let Some(entry) = other.entries.pop_front() {
            self.make_room();
            self.entries.push_back(entry);
        }
    }

    fn make_room(&mut self) {
        if self.entries.len() < MAX_QUEUED_MESSAGES {
            return;
        }
        if let Some(dropped) = self.entries.pop_front() {
            warn!(id = %dropped.id, "Outbound queue full, dropping oldest message");
            self.dropped += 1;
        }
    }

    /// Number of entries evicted at capacity since the previous call.
    pub fn take_dropped(&mut self) -> usize {
        std::mem::take(&mut self.dropped)
    }

    /// Send entries in insertion order over `link`.
    ///
    /// Each entry is removed only after its own send is confirmed, so an
    /// interrupted flush can simply be called again.
    pub async fn flush(
        &mut self,
        link: &Link,
        key: Option<&SessionKey>,
        allow_plaintext: bool,
    ) -> FlushReport {
        let key_fingerprint = key.map(SessionKey::fingerprint);
        let mut report = FlushReport {
            encrypted: key.is_some(),
            ..FlushReport::default()
        };

        while let Some(front) = self.entries.front() {
            let envelope = match (key, key_fingerprint.as_deref()) {
                (Some(key), Some(fingerprint)) => match front.envelope(key, fingerprint) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        report.stopped = Some(StopReason::SendFailed(e));
                        break;
                    }
                },
                _ if allow_plaintext => Envelope::Plain {
                    text: front.text.clone(),
                },
                _ => {
                    report.stopped = Some(StopReason::NoKey);
                    break;
                }
            };

            let bytes = match envelope.to_bytes() {
                Ok(bytes) => bytes,
                Err(e) => {
                    report.stopped = Some(StopReason::SendFailed(e));
                    break;
                }
            };

            if let Err(e) = link.send(bytes).await {
                warn!(remote = %link.remote_id(), error = %e, "Flush interrupted");
                report.stopped = Some(StopReason::SendFailed(e));
                break;
            }
            if let Some(entry) = self.entries.pop_front() {
                report.sent.push(entry);
            }
        }

        report.remaining = self.entries.len();
        if !report.sent.is_empty() {
            info!(
                remote = %link.remote_id(),
                kind = %link.kind(),
                sent = report.sent.len(),
                remaining = report.remaining,
                "Flushed outbound queue"
            );
        }
        report
    }
}
