//! Short-range wireless backend over a single GATT characteristic.
//!
//! Discovery and pairing belong to the platform adapter. This module only sees
//! the connected characteristic as a [`GattLink`]: a sink for writes and a
//! stream of notifications.

use super::framing::{encode_frame, split_frames, Reassembler};
use super::{EventSender, Link, Outgoing, TransportEvent, TransportKind};
use crate::error::{ChatError, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// GATT service carrying the chat characteristic.
pub const SERVICE_UUID: u16 = 0xFFE0;
/// Write + notify characteristic inside [`SERVICE_UUID`].
pub const CHARACTERISTIC_UUID: u16 = 0xFFE1;

pub const DEFAULT_FRAME_SIZE: usize = 180;
pub const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(40);

/// A connected characteristic as handed over by the platform adapter.
#[derive(Debug)]
pub struct GattLink {
    pub writes: mpsc::Sender<Vec<u8>>,
    pub notifications: mpsc::Receiver<Vec<u8>>,
}

impl GattLink {
    pub fn new(writes: mpsc::Sender<Vec<u8>>, notifications: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            writes,
            notifications,
        }
    }

    /// Two characteristics wired back to back: each write on one side shows
    /// up as one notification on the other.
    pub fn pair(buffer: usize) -> (GattLink, GattLink) {
        let (a_writes, b_notifications) = mpsc::channel(buffer.max(1));
        let (b_writes, a_notifications) = mpsc::channel(buffer.max(1));
        (
            GattLink::new(a_writes, a_notifications),
            GattLink::new(b_writes, b_notifications),
        )
    }
}

/// Runs chunked, length-prefixed envelopes over attached characteristics.
#[derive(Clone)]
pub struct WirelessTransport {
    frame_size: usize,
    frame_delay: Duration,
    events: EventSender,
}

impl WirelessTransport {
    pub fn new(frame_size: usize, frame_delay: Duration, events: EventSender) -> Self {
        Self {
            frame_size: frame_size.max(1),
            frame_delay,
            events,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Take ownership of a connected characteristic and report it as opened.
    ///
    /// `central` is true on the side that requested the device, which counts
    /// as the initiator of the session.
    pub fn attach(&self, remote_id: impl Into<String>, gatt: GattLink, central: bool) -> Link {
        let remote_id = remote_id.into();
        let (link, outgoing) = Link::new(remote_id.clone(), TransportKind::Wireless, central);

        info!(
            remote = %remote_id,
            service = %format!("{:#06x}", SERVICE_UUID),
            characteristic = %format!("{:#06x}", CHARACTERISTIC_UUID),
            "Wireless link attached"
        );
        let _ = self.events.send(TransportEvent::Opened {
            link: link.clone(),
            dialed: None,
        });

        tokio::spawn(pump(
            gatt,
            outgoing,
            remote_id,
            link.id(),
            self.frame_size,
            self.frame_delay,
            self.events.clone(),
        ));

        link
    }
}

/// Write one envelope as sequential frames with a pause between writes.
async fn write_envelope(
    writes: &mpsc::Sender<Vec<u8>>,
    bytes: &[u8],
    frame_size: usize,
    frame_delay: Duration,
) -> Result<()> {
    let framed = encode_frame(bytes)?;
    let frames = split_frames(&framed, frame_size);
    let count = frames.len();

    for (index, frame) in frames.into_iter().enumerate() {
        if index > 0 && !frame_delay.is_zero() {
            tokio::time::sleep(frame_delay).await;
        }
        writes
            .send(frame)
            .await
            .map_err(|_| ChatError::TransportClosed)?;
    }

    debug!(bytes = bytes.len(), frames = count, "Envelope written");
    Ok(())
}

/// Drain the link's outgoing channel into characteristic writes.
async fn write_loop(
    writes: mpsc::Sender<Vec<u8>>,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    remote_id: String,
    frame_size: usize,
    frame_delay: Duration,
) {
    while let Some(item) = outgoing.recv().await {
        match item {
            Outgoing::Envelope { bytes, ack } => {
                let result = write_envelope(&writes, &bytes, frame_size, frame_delay).await;
                let failed = result.is_err();
                let _ = ack.send(result);
                if failed {
                    warn!(remote = %remote_id, "Characteristic write failed");
                    return;
                }
            }
            Outgoing::Close => {
                info!(remote = %remote_id, "Closing wireless link");
                return;
            }
        }
    }
}

/// Writes run on their own task so notifications keep draining while a
/// long envelope is still going out. Either side ending closes the link.
async fn pump(
    gatt: GattLink,
    outgoing: mpsc::UnboundedReceiver<Outgoing>,
    remote_id: String,
    link_id: u64,
    frame_size: usize,
    frame_delay: Duration,
    events: EventSender,
) {
    let GattLink {
        writes,
        mut notifications,
    } = gatt;
    let mut writer = tokio::spawn(write_loop(
        writes,
        outgoing,
        remote_id.clone(),
        frame_size,
        frame_delay,
    ));
    let mut reassembler = Reassembler::new();

    loop {
        tokio::select! {
            _ = &mut writer => break,
            chunk = notifications.recv() => {
                match chunk {
                    Some(chunk) => match reassembler.push(&chunk) {
                        Ok(envelopes) => {
                            for bytes in envelopes {
                                let _ = events.send(TransportEvent::Frame {
                                    remote_id: remote_id.clone(),
                                    kind: TransportKind::Wireless,
                                    bytes,
                                });
                            }
                        }
                        Err(e) => {
                            warn!(remote = %remote_id, error = %e, "Framing error, dropping link");
                            break;
                        }
                    },
                    None => {
                        info!(remote = %remote_id, "Characteristic disconnected");
                        break;
                    }
                }
            }
        }
    }

    // Dropping the writer drops the outgoing receiver, so the link reads as closed.
    writer.abort();
    let _ = writer.await;
    let _ = events.send(TransportEvent::Closed {
        remote_id,
        kind: TransportKind::Wireless,
        link_id,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::framing::MAX_MESSAGE_LEN;
    use tokio::sync::mpsc::unbounded_channel;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_profile_constants() {
        assert_eq!(SERVICE_UUID, 0xFFE0);
        assert_eq!(CHARACTERISTIC_UUID, 0xFFE1);
        assert_eq!(DEFAULT_FRAME_SIZE, 180);
    }

    #[tokio::test]
    async fn test_writes_respect_frame_size() {
        let (events, mut rx) = unbounded_channel();
        let (local, mut remote) = GattLink::pair(16);
        let transport = WirelessTransport::new(180, Duration::from_millis(1), events);

        let link = transport.attach("peer", local, true);
        assert!(matches!(rx.recv().await, Some(TransportEvent::Opened { .. })));

        let payload = vec![b'x'; 496];
        link.send(payload.clone()).await.unwrap();

        let mut sizes = Vec::new();
        let mut received = Vec::new();
        while received.len() < 500 {
            let frame = timeout(WAIT, remote.notifications.recv()).await.unwrap().unwrap();
            sizes.push(frame.len());
            received.extend(frame);
        }
        assert_eq!(sizes, vec![180, 180, 140]);
        assert_eq!(&received[4..], payload.as_slice());
    }

    #[tokio::test]
    async fn test_envelope_crosses_paired_links() {
        let (events_a, mut rx_a) = unbounded_channel();
        let (events_b, mut rx_b) = unbounded_channel();
        let (gatt_a, gatt_b) = GattLink::pair(8);

        let a = WirelessTransport::new(32, Duration::ZERO, events_a).attach("b", gatt_a, true);
        let _b = WirelessTransport::new(32, Duration::ZERO, events_b).attach("a", gatt_b, false);
        assert!(matches!(rx_a.recv().await, Some(TransportEvent::Opened { .. })));
        assert!(matches!(rx_b.recv().await, Some(TransportEvent::Opened { .. })));

        let payload: Vec<u8> = (0..300u32).map(|i| (i % 256) as u8).collect();
        a.send(payload.clone()).await.unwrap();

        match timeout(WAIT, rx_b.recv()).await.unwrap() {
            Some(TransportEvent::Frame {
                remote_id,
                kind,
                bytes,
            }) => {
                assert_eq!(remote_id, "a");
                assert_eq!(kind, TransportKind::Wireless);
                assert_eq!(bytes, payload);
            }
            other => panic!("Expected frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_simultaneous_sends_do_not_stall() {
        let (events_a, mut rx_a) = unbounded_channel();
        let (events_b, mut rx_b) = unbounded_channel();
        let (gatt_a, gatt_b) = GattLink::pair(4);

        let a = WirelessTransport::new(180, Duration::ZERO, events_a).attach("b", gatt_a, true);
        let b = WirelessTransport::new(180, Duration::ZERO, events_b).attach("a", gatt_b, false);
        assert!(matches!(rx_a.recv().await, Some(TransportEvent::Opened { .. })));
        assert!(matches!(rx_b.recv().await, Some(TransportEvent::Opened { .. })));

        let from_a = vec![b'x'; 2000];
        let from_b = vec![b'y'; 2000];
        let (sent_a, sent_b) = timeout(WAIT, async {
            tokio::join!(a.send(from_a.clone()), b.send(from_b.clone()))
        })
        .await
        .expect("both sides stalled while sending");
        assert!(sent_a.is_ok());
        assert!(sent_b.is_ok());

        for (rx, expected) in [(&mut rx_b, &from_a), (&mut rx_a, &from_b)] {
            match timeout(WAIT, rx.recv()).await.unwrap() {
                Some(TransportEvent::Frame { bytes, .. }) => assert_eq!(&bytes, expected),
                other => panic!("Expected frame, got {:?}", other),
            }
        }
        assert!(a.is_open());
        assert!(b.is_open());
    }

    #[tokio::test]
    async fn test_oversized_declared_length_closes_link() {
        let (events, mut rx) = unbounded_channel();
        let (local, remote) = GattLink::pair(4);
        let link = WirelessTransport::new(180, Duration::ZERO, events).attach("peer", local, false);
        assert!(matches!(rx.recv().await, Some(TransportEvent::Opened { .. })));

        let bogus = ((MAX_MESSAGE_LEN + 1) as u32).to_be_bytes().to_vec();
        remote.writes.send(bogus).await.unwrap();

        match timeout(WAIT, rx.recv()).await.unwrap() {
            Some(TransportEvent::Closed { link_id, kind, .. }) => {
                assert_eq!(link_id, link.id());
                assert_eq!(kind, TransportKind::Wireless);
            }
            other => panic!("Expected closed, got {:?}", other),
        }
        assert!(!link.is_open());
    }

    #[tokio::test]
    async fn test_close_reports_closed() {
        let (events, mut rx) = unbounded_channel();
        let (local, _remote) = GattLink::pair(4);
        let link = WirelessTransport::new(180, Duration::ZERO, events).attach("peer", local, true);
        assert!(matches!(rx.recv().await, Some(TransportEvent::Opened { .. })));

        link.close();
        assert!(matches!(
            timeout(WAIT, rx.recv()).await.unwrap(),
            Some(TransportEvent::Closed { .. })
        ));
        assert!(link.send(vec![1]).await.is_err());
    }
}
