//! Network backend: one WebSocket per peer, one binary message per envelope.
//!
//! The dialer opens with a `hello` carrying its peer id and waits for a
//! `welcome`. A refused dial gets `accepted: false` and the socket is closed.

use super::signal::Signal;
use super::{EventSender, Link, Outgoing, TransportEvent, TransportKind};
use crate::error::{ChatError, Result};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    accept_async, connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

/// Dials and accepts WebSocket connections, reporting through an event channel.
#[derive(Clone)]
pub struct NetworkTransport {
    local_id: String,
    connect_timeout: Duration,
    events: EventSender,
}

impl NetworkTransport {
    pub fn new(local_id: impl Into<String>, connect_timeout: Duration, events: EventSender) -> Self {
        Self {
            local_id: local_id.into(),
            connect_timeout,
            events,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Accept inbound peers on `addr`. Returns the bound address.
    pub async fn listen(&self, addr: &str) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Listening for peers");

        let local_id = self.local_id.clone();
        let handshake_timeout = self.connect_timeout;
        let events = self.events.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        debug!(addr = %peer_addr, "Inbound TCP connection");
                        tokio::spawn(handle_inbound(
                            stream,
                            peer_addr,
                            local_id.clone(),
                            handshake_timeout,
                            events.clone(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                }
                if events.is_closed() {
                    debug!("Event channel closed, stopping listener");
                    break;
                }
            }
        });

        Ok(local_addr)
    }

    /// Dial `url` in the background. Bounded by the connect timeout.
    ///
    /// Failures arrive as `OpenFailed` keyed by `url`. On success the link is
    /// keyed by the id the peer sent in its `welcome`, which is the id its own
    /// dials and every later frame carry, and `Opened` names `url` as dialed.
    pub fn open(&self, url: &str) {
        let url = url.to_string();
        let local_id = self.local_id.clone();
        let connect_timeout = self.connect_timeout;
        let events = self.events.clone();

        tokio::spawn(async move {
            info!(url = %url, "Connecting to peer");

            match tokio::time::timeout(connect_timeout, dial(&local_id, &url)).await {
                Ok(Ok((ws_stream, peer_id))) => {
                    let remote_id = if peer_id.trim().is_empty() {
                        url.clone()
                    } else {
                        peer_id
                    };
                    if remote_id != url {
                        warn!(
                            url = %url,
                            peer_id = %remote_id,
                            "Peer answers under a different id, using it"
                        );
                    }
                    let (link, outgoing) =
                        Link::new(remote_id.clone(), TransportKind::Network, true);
                    let link_id = link.id();
                    let opened = TransportEvent::Opened {
                        link,
                        dialed: Some(url),
                    };
                    if events.send(opened).is_err() {
                        return;
                    }
                    pump(ws_stream, outgoing, remote_id, link_id, events).await;
                }
                Ok(Err(error)) => {
                    warn!(url = %url, error = %error, "Failed to connect to peer");
                    let _ = events.send(TransportEvent::OpenFailed {
                        remote_id: url,
                        error,
                    });
                }
                Err(_) => {
                    warn!(url = %url, timeout = ?connect_timeout, "Connection attempt timed out");
                    let _ = events.send(TransportEvent::OpenFailed {
                        remote_id: url,
                        error: ChatError::TransportOpenTimeout,
                    });
                }
            }
        });
    }
}

async fn dial(
    local_id: &str,
    url: &str,
) -> Result<(WebSocketStream<MaybeTlsStream<TcpStream>>, String)> {
    let (mut ws_stream, _) = connect_async(url).await?;

    let hello = Signal::Hello {
        peer_id: local_id.to_string(),
    };
    let hello_json =
        serde_json::to_string(&hello).map_err(|e| ChatError::Transport(e.to_string()))?;
    ws_stream.send(Message::Text(hello_json.into())).await?;

    loop {
        match ws_stream.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<Signal>(&text) {
                Ok(Signal::Welcome {
                    accepted: true,
                    peer_id,
                    ..
                }) => return Ok((ws_stream, peer_id)),
                Ok(Signal::Welcome {
                    accepted: false,
                    message,
                    ..
                }) => {
                    let _ = ws_stream.send(Message::Close(None)).await;
                    return Err(ChatError::ConnectionRefused(message));
                }
                _ => {
                    warn!(url = %url, "Unexpected message during handshake");
                }
            },
            Some(Ok(Message::Close(_))) | None => {
                return Err(ChatError::ConnectionRefused(
                    "closed during handshake".to_string(),
                ));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

async fn handle_inbound(
    stream: TcpStream,
    addr: SocketAddr,
    local_id: String,
    handshake_timeout: Duration,
    events: EventSender,
) {
    let mut ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(addr = %addr, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let remote_id = match tokio::time::timeout(handshake_timeout, wait_for_hello(&mut ws_stream)).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            warn!(addr = %addr, "Connection closed before hello");
            return;
        }
        Err(_) => {
            warn!(addr = %addr, "Hello timeout");
            return;
        }
    };

    let (link, outgoing) = Link::new(remote_id.clone(), TransportKind::Network, false);
    let link_id = link.id();
    let (reply, decision) = oneshot::channel();
    if events.send(TransportEvent::Incoming { link, reply }).is_err() {
        return;
    }
    let accepted = decision.await.unwrap_or(false);

    let welcome = Signal::Welcome {
        accepted,
        peer_id: local_id,
        message: if accepted {
            "accepted".to_string()
        } else {
            "peer is busy".to_string()
        },
    };
    let sent = match serde_json::to_string(&welcome) {
        Ok(json) => ws_stream.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            error!(error = %e, "Failed to serialize welcome");
            false
        }
    };

    if !accepted {
        info!(remote = %remote_id, "Refused inbound connection");
        let _ = ws_stream.send(Message::Close(None)).await;
        return;
    }
    if !sent {
        drop(outgoing);
        let _ = events.send(TransportEvent::Closed {
            remote_id,
            kind: TransportKind::Network,
            link_id,
        });
        return;
    }

    info!(remote = %remote_id, "Accepted inbound connection");
    pump(ws_stream, outgoing, remote_id, link_id, events).await;
}

async fn wait_for_hello<S>(ws_stream: &mut WebSocketStream<S>) -> Option<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<Signal>(&text) {
                Ok(Signal::Hello { peer_id }) if !peer_id.trim().is_empty() => {
                    return Some(peer_id)
                }
                Ok(_) => warn!("Expected hello, got another signal"),
                Err(e) => warn!(error = %e, "Failed to parse hello"),
            },
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

/// Shuttle envelopes between the socket and the session layer until either
/// side closes.
async fn pump<S>(
    ws_stream: WebSocketStream<S>,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    remote_id: String,
    link_id: u64,
    events: EventSender,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            item = outgoing.recv() => {
                match item {
                    Some(Outgoing::Envelope { bytes, ack }) => {
                        let result = write
                            .send(Message::Binary(bytes.into()))
                            .await
                            .map_err(ChatError::from);
                        let failed = result.is_err();
                        let _ = ack.send(result);
                        if failed {
                            error!(remote = %remote_id, "Failed to send envelope");
                            break;
                        }
                    }
                    Some(Outgoing::Close) | None => {
                        info!(remote = %remote_id, "Closing network link");
                        if let Err(e) = write.send(Message::Close(None)).await {
                            warn!(error = %e, "Failed to send close frame");
                        }
                        break;
                    }
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Binary(bytes))) => {
                        let _ = events.send(TransportEvent::Frame {
                            remote_id: remote_id.clone(),
                            kind: TransportKind::Network,
                            bytes: bytes.into(),
                        });
                    }
                    Some(Ok(Message::Text(text))) => {
                        debug!(remote = %remote_id, len = text.len(), "Ignoring text frame after handshake");
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(remote = %remote_id, "Peer closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(remote = %remote_id, error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    drop(outgoing);
    let _ = events.send(TransportEvent::Closed {
        remote_id,
        kind: TransportKind::Network,
        link_id,
    });
}
