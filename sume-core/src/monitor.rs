//! Network reachability and wireless availability tracking.

use crate::transport::TransportKind;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityChange {
    NetworkReachable,
    NetworkUnreachable,
    WirelessAvailable,
    WirelessLost,
}

#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    network_reachable: bool,
    wireless_available: bool,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self {
            network_reachable: true,
            wireless_available: false,
        }
    }
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn network_reachable(&self) -> bool {
        self.network_reachable
    }

    pub fn wireless_available(&self) -> bool {
        self.wireless_available
    }

    /// Record an observation. Returns false when nothing changed.
    pub fn observe(&mut self, change: ConnectivityChange) -> bool {
        let (slot, value) = match change {
            ConnectivityChange::NetworkReachable => (&mut self.network_reachable, true),
            ConnectivityChange::NetworkUnreachable => (&mut self.network_reachable, false),
            ConnectivityChange::WirelessAvailable => (&mut self.wireless_available, true),
            ConnectivityChange::WirelessLost => (&mut self.wireless_available, false),
        };
        if *slot == value {
            return false;
        }
        *slot = value;
        info!(change = ?change, "Connectivity changed");
        true
    }

    /// Route new sends take: network first, wireless as fallback, `None` when offline.
    ///
    /// A link only counts while its medium is up, so after `WirelessLost` a
    /// session with nothing but a wireless link routes sends to the queue.
    pub fn preferred_route(
        &self,
        has_network_link: bool,
        has_wireless_link: bool,
    ) -> Option<TransportKind> {
        if self.network_reachable && has_network_link {
            Some(TransportKind::Network)
        } else if self.wireless_available && has_wireless_link {
            Some(TransportKind::Wireless)
        } else {
            None
        }
    }
}

/// Poll for a usable local interface address and report transitions.
pub fn spawn_reachability_probe(
    interval: Duration,
    changes: mpsc::UnboundedSender<ConnectivityChange>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut last: Option<bool> = None;
        loop {
            ticker.tick().await;
            let reachable = match local_ip_address::local_ip() {
                Ok(ip) => !ip.is_loopback(),
                Err(e) => {
                    debug!(error = %e, "No local address");
                    false
                }
            };
            if last == Some(reachable) {
                continue;
            }
            last = Some(reachable);
            let change = if reachable {
                ConnectivityChange::NetworkReachable
            } else {
                ConnectivityChange::NetworkUnreachable
            };
            if changes.send(change).is_err() {
                break;
            }
        }
    })
}
