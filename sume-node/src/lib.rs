//! Terminal client for SuMe chat.

pub mod app;
pub mod commands;

use app::App;
use sume_core::crypto::KeyAgreementManager;
use sume_core::logging::init_tracing;
use sume_core::monitor::spawn_reachability_probe;
use sume_core::transport::NetworkTransport;
use sume_core::{ChatConfig, MessageStore, Result, SessionManager};
use tokio::sync::mpsc;
use tracing::{error, info};

/// Load configuration, start the listener and run until `/quit` or EOF.
pub async fn run() -> Result<()> {
    let config = ChatConfig::from_env()?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    let store = MessageStore::open(&config.db_path)?;
    let keys = KeyAgreementManager::generate_identity().map_err(|e| {
        error!(error = %e, "No usable cryptography, secure chat is impossible");
        e
    })?;

    let listen_addr = config.listen_socket_addr()?;
    let local_id = config.advertised_id(listen_addr);

    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let (chat_tx, chat_rx) = mpsc::unbounded_channel();
    let (connectivity_tx, connectivity_rx) = mpsc::unbounded_channel();

    let network = NetworkTransport::new(local_id.clone(), config.connect_timeout(), transport_tx);
    let bound = network.listen(&config.listen_addr).await?;
    let _probe = spawn_reachability_probe(config.probe_interval(), connectivity_tx);

    info!(
        id = %local_id,
        addr = %bound,
        strategy = config.key_strategy.as_str(),
        plaintext_fallback = config.allow_plaintext,
        "Node ready"
    );
    println!("SuMe chat");
    println!("* your id: {}", local_id);
    println!("* key fingerprint: {}", keys.public_key_fingerprint());
    println!("* type /connect <ws-url> to start, /help for commands");

    let manager = SessionManager::new(keys, config.session_settings(), chat_tx);
    App::new(manager, network, store)
        .run(transport_rx, chat_rx, connectivity_rx)
        .await
}
