//! The interactive loop: stdin, transport events, connectivity and chat output.

use crate::commands::{parse_command, Command, HELP};
use chrono::DateTime;
use sume_core::models::input::{ConnectTarget, ValidateExt};
use sume_core::models::{Direction, StoredMessage};
use sume_core::monitor::ConnectivityChange;
use sume_core::transport::NetworkTransport;
use sume_core::{
    ChatEvent, MessageStore, Result, SendOutcome, SessionManager, SessionState, TransportEvent,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// One line of output for a chat event.
pub fn render_event(event: &ChatEvent) -> String {
    match event {
        ChatEvent::Message {
            text, encrypted, ..
        } => {
            if *encrypted {
                format!("friend: {}", text)
            } else {
                format!("[unencrypted] friend: {}", text)
            }
        }
        ChatEvent::Sent {
            text, encrypted, ..
        } => {
            if *encrypted {
                format!("you: {}", text)
            } else {
                format!("[unencrypted] you: {}", text)
            }
        }
        ChatEvent::StateChanged { remote_id, state } => match state {
            SessionState::Secure => format!("* secure session with {}", remote_id),
            other => format!("* {}: {}", remote_id, other),
        },
        ChatEvent::Warning { error, .. } => format!("! {}", error),
        ChatEvent::TransportSwitched { kind, .. } => match kind {
            Some(kind) => format!("* using {} transport", kind),
            None => "* offline, messages will be queued".to_string(),
        },
    }
}

pub fn render_stored(message: &StoredMessage) -> String {
    let time = DateTime::from_timestamp_millis(message.created_at)
        .map(|at| at.format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string());
    let who = match message.direction {
        Direction::Outgoing => "you",
        Direction::Incoming => "friend",
    };
    let flag = if message.encrypted { "" } else { "[unencrypted] " };
    format!("[{}] {}{}: {}", time, flag, who, message.text)
}

pub struct App {
    manager: SessionManager,
    network: NetworkTransport,
    store: MessageStore,
}

impl App {
    pub fn new(manager: SessionManager, network: NetworkTransport, store: MessageStore) -> Self {
        Self {
            manager,
            network,
            store,
        }
    }

    fn persist(&self, remote_id: &str, text: &str, direction: Direction, encrypted: bool) {
        let now = chrono::Utc::now().timestamp_millis();
        if let Err(e) = self
            .store
            .append_message(remote_id, text, direction, encrypted, now)
        {
            warn!(error = %e, "Failed to store message");
            println!("! {}", e);
        }
    }

    /// Print `event`, storing delivered and sent messages as they happen.
    fn show(&self, event: ChatEvent) {
        match &event {
            ChatEvent::Message {
                remote_id,
                text,
                encrypted,
            } => self.persist(remote_id, text, Direction::Incoming, *encrypted),
            ChatEvent::Sent {
                remote_id,
                text,
                encrypted,
            } => self.persist(remote_id, text, Direction::Outgoing, *encrypted),
            _ => {}
        }
        println!("{}", render_event(&event));
    }

    async fn on_connectivity(&mut self, change: ConnectivityChange) {
        if let Some(target) = self.manager.on_connectivity(change).await {
            println!("* network is back, reconnecting to {}", target);
            if self.manager.connect_requested(&target).is_ok() {
                self.network.open(&target);
            }
        }
    }

    fn dial(&mut self, url: &str) {
        match self.manager.connect_requested(url) {
            Ok(()) => {
                println!("* connecting to {}", url);
                self.network.open(url);
            }
            Err(e) => println!("! {}", e),
        }
    }

    pub async fn handle_line(&mut self, line: &str) -> Flow {
        let Some(command) = parse_command(line) else {
            return Flow::Continue;
        };

        match command {
            Command::Say(text) => match self.manager.send_message(&text).await {
                Ok(SendOutcome::Queued) => {
                    println!("* queued ({} waiting)", self.manager.queued_len());
                }
                Ok(SendOutcome::Sent { .. }) => {}
                Err(e) => println!("! {}", e),
            },
            Command::Connect(url) => {
                let target = ConnectTarget { url };
                match target.validate_input() {
                    Ok(()) => self.dial(&target.url),
                    Err(e) => println!("! {}", e),
                }
            }
            Command::Close => {
                if let Err(e) = self.manager.close() {
                    println!("! {}", e);
                }
            }
            Command::Retry => match self.manager.retry().await {
                Ok(SessionState::Idle) => {
                    if let Some(remote_id) = self.manager.active_remote().map(str::to_string) {
                        self.dial(&remote_id);
                    }
                }
                Ok(state) => println!("* {}", state),
                Err(e) => println!("! {}", e),
            },
            Command::Wireless(available) => {
                let change = if available {
                    ConnectivityChange::WirelessAvailable
                } else {
                    ConnectivityChange::WirelessLost
                };
                self.on_connectivity(change).await;
            }
            Command::Status => self.print_status(),
            Command::History => match self.store.load_all_messages() {
                Ok(messages) if messages.is_empty() => println!("* no history"),
                Ok(messages) => {
                    for message in &messages {
                        println!("{}", render_stored(message));
                    }
                }
                Err(e) => println!("! {}", e),
            },
            Command::Clear => match self.store.clear_all() {
                Ok(removed) => println!("* cleared {} messages", removed),
                Err(e) => println!("! {}", e),
            },
            Command::Help => println!("{}", HELP),
            Command::Unknown(reason) => println!("! {}", reason),
            Command::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    fn print_status(&self) {
        println!("* you are {}", self.network.local_id());
        println!(
            "* key fingerprint {}",
            self.manager.keys().public_key_fingerprint()
        );
        match self.manager.active_remote() {
            Some(remote_id) => {
                let record = self.manager.record(remote_id);
                let state = record.map_or(SessionState::Idle, |r| r.state());
                let route = record
                    .and_then(|r| r.route())
                    .map_or_else(|| "none".to_string(), |kind| kind.to_string());
                println!("* peer {}: {} via {}", remote_id, state, route);
            }
            None => println!("* no peer"),
        }
        println!("* {} queued", self.manager.queued_len());
    }

    pub async fn run(
        mut self,
        mut transport_events: UnboundedReceiver<TransportEvent>,
        mut chat_events: UnboundedReceiver<ChatEvent>,
        mut connectivity: UnboundedReceiver<ConnectivityChange>,
    ) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if self.handle_line(&line).await == Flow::Quit {
                            break;
                        }
                    }
                    None => break,
                },
                Some(event) = transport_events.recv() => self.manager.handle(event).await,
                Some(change) = connectivity.recv() => self.on_connectivity(change).await,
                Some(event) = chat_events.recv() => self.show(event),
            }
        }

        while let Ok(event) = chat_events.try_recv() {
            self.show(event);
        }
        if self.manager.active_remote().is_some() {
            let _ = self.manager.close();
        }
        info!("Shutting down");
        Ok(())
    }
}
