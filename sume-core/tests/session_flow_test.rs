//! Session behaviour across two managers joined by in-memory links.

mod common;

use common::{acking_link, establish, pipe, relay, Peer};
use sume_core::crypto::{KeyAgreementManager, KeyStrategy};
use sume_core::monitor::ConnectivityChange;
use sume_core::{
    ChatError, ChatEvent, Envelope, SendOutcome, SessionSettings, SessionState, TransportEvent,
    TransportKind,
};

const NET: TransportKind = TransportKind::Network;
const AIR: TransportKind = TransportKind::Wireless;

fn peers() -> (Peer, Peer) {
    (
        Peer::new("alice", SessionSettings::default()),
        Peer::new("bob", SessionSettings::default()),
    )
}

#[tokio::test]
async fn test_agreement_reaches_secure_on_both_sides() {
    let (mut alice, mut bob) = peers();
    let mut pipe = establish(&mut alice, &mut bob, NET).await;

    assert_eq!(alice.state_with(&bob), Some(SessionState::Secure));
    assert_eq!(bob.state_with(&alice), Some(SessionState::Secure));
    assert_eq!(bob.mgr.active_remote(), Some("alice"));

    let outcome = alice.mgr.send_message("hello bob").await.unwrap();
    assert_eq!(outcome, SendOutcome::Sent { encrypted: true });
    bob.drain();
    relay(&mut pipe.left_sent, &mut bob, "alice", NET).await;
    assert_eq!(bob.messages(), vec![("hello bob".to_string(), true)]);
}

#[tokio::test]
async fn test_queue_flushes_fifo_once_secure() {
    let (mut alice, mut bob) = peers();
    for text in ["m1", "m2", "m3"] {
        assert_eq!(
            alice.mgr.send_message(text).await.unwrap(),
            SendOutcome::Queued
        );
    }
    assert_eq!(alice.mgr.queued_len(), 3);

    let mut pipe = establish(&mut alice, &mut bob, NET).await;
    assert_eq!(alice.mgr.queued_len(), 0);

    bob.drain();
    relay(&mut pipe.left_sent, &mut bob, "alice", NET).await;
    let texts: Vec<String> = bob.messages().into_iter().map(|(text, _)| text).collect();
    assert_eq!(texts, vec!["m1", "m2", "m3"]);
}

#[tokio::test]
async fn test_data_before_key_is_held_until_secure() {
    let (mut alice, mut bob) = peers();
    alice.mgr.connect_requested("bob").unwrap();
    let mut p = pipe("alice", "bob", NET);
    alice.mgr.on_transport_open(p.left.clone()).await;
    assert!(bob.mgr.on_incoming(&p.right));
    bob.mgr.on_transport_open(p.right.clone()).await;

    relay(&mut p.right_sent, &mut alice, "bob", NET).await;
    assert_eq!(alice.state_with(&bob), Some(SessionState::Secure));
    alice.mgr.send_message("early").await.unwrap();

    let alice_key = p.left_sent.recv().await.unwrap();
    let data = p.left_sent.recv().await.unwrap();
    assert!(matches!(
        Envelope::from_bytes(&data).unwrap(),
        Envelope::Data { .. }
    ));

    bob.drain();
    bob.mgr.on_frame("alice", NET, &data).await;
    assert_eq!(bob.state_with(&alice), Some(SessionState::AwaitingKeyExchange));
    assert!(bob.messages().is_empty());

    bob.mgr.on_frame("alice", NET, &alice_key).await;
    assert_eq!(bob.state_with(&alice), Some(SessionState::Secure));
    assert_eq!(bob.messages(), vec![("early".to_string(), true)]);
}

#[tokio::test]
async fn test_key_before_dial_completes_goes_secure_on_open() {
    let (mut alice, mut bob) = peers();
    alice.mgr.connect_requested("bob").unwrap();

    let mut p = pipe("alice", "bob", NET);
    assert!(bob.mgr.on_incoming(&p.right));
    bob.mgr.on_transport_open(p.right.clone()).await;
    let bob_key = p.right_sent.recv().await.unwrap();

    // Bob's key lands before alice's dial reports open.
    alice.mgr.on_frame("bob", NET, &bob_key).await;
    assert_eq!(alice.state_with(&bob), Some(SessionState::Connecting));

    alice.mgr.on_transport_open(p.left.clone()).await;
    assert_eq!(alice.state_with(&bob), Some(SessionState::Secure));

    relay(&mut p.left_sent, &mut bob, "alice", NET).await;
    assert_eq!(bob.state_with(&alice), Some(SessionState::Secure));
}

#[tokio::test]
async fn test_repeated_key_is_idempotent() {
    let (mut alice, mut bob) = peers();
    let mut pipe = establish(&mut alice, &mut bob, NET).await;

    let again = Envelope::Key {
        key: alice.mgr.keys().exported_public_key(),
        scheme: KeyStrategy::Agreement,
    };
    bob.drain();
    bob.mgr
        .on_frame("alice", NET, &again.to_bytes().unwrap())
        .await;
    assert!(bob.drain().is_empty());
    assert_eq!(bob.state_with(&alice), Some(SessionState::Secure));

    alice.mgr.send_message("still fine").await.unwrap();
    relay(&mut pipe.left_sent, &mut bob, "alice", NET).await;
    assert_eq!(bob.messages(), vec![("still fine".to_string(), true)]);
}

#[tokio::test]
async fn test_conflicting_key_rejected_and_session_kept() {
    let (mut alice, mut bob) = peers();
    let mut pipe = establish(&mut alice, &mut bob, NET).await;

    let mallory = KeyAgreementManager::generate_identity().unwrap();
    let substitute = Envelope::Key {
        key: mallory.exported_public_key(),
        scheme: KeyStrategy::Agreement,
    };
    bob.drain();
    bob.mgr
        .on_frame("alice", NET, &substitute.to_bytes().unwrap())
        .await;

    assert_eq!(
        bob.drain(),
        vec![ChatEvent::Warning {
            remote_id: Some("alice".to_string()),
            error: ChatError::SessionKeyConflict,
        }]
    );
    assert_eq!(bob.state_with(&alice), Some(SessionState::Secure));

    alice.mgr.send_message("after attack").await.unwrap();
    relay(&mut pipe.left_sent, &mut bob, "alice", NET).await;
    assert_eq!(bob.messages(), vec![("after attack".to_string(), true)]);
}

#[tokio::test]
async fn test_second_inbound_connection_refused() {
    let (mut alice, mut bob) = peers();
    let _pipe = establish(&mut alice, &mut bob, NET).await;
    bob.drain();

    let (carol_link, _carol_sent) = acking_link("carol", NET, false);
    assert!(!bob.mgr.on_incoming(&carol_link));

    assert_eq!(bob.mgr.active_remote(), Some("alice"));
    assert_eq!(bob.state_with(&alice), Some(SessionState::Secure));
    assert_eq!(bob.mgr.state_of("carol"), None);
    assert!(bob.drain().iter().any(|event| matches!(
        event,
        ChatEvent::Warning {
            error: ChatError::SessionBusy(active),
            ..
        } if active == "alice"
    )));
}

#[tokio::test]
async fn test_transport_switch_keeps_session_key() {
    let (mut alice, mut bob) = peers();
    let net = establish(&mut alice, &mut bob, NET).await;

    let mut air = pipe("alice", "bob", AIR);
    alice.mgr.on_transport_open(air.left.clone()).await;
    assert!(bob.mgr.on_incoming(&air.right));
    bob.mgr.on_transport_open(air.right.clone()).await;
    assert!(air.right_sent.try_recv().is_err(), "no re-keying on accept");
    assert!(air.left_sent.try_recv().is_err(), "no re-keying on switch");
    alice.drain();

    alice.mgr.on_transport_closed("bob", NET, net.left.id()).await;
    assert_eq!(alice.state_with(&bob), Some(SessionState::Secure));
    assert!(alice.drain().contains(&ChatEvent::TransportSwitched {
        remote_id: "bob".to_string(),
        kind: Some(AIR),
    }));

    alice.mgr.send_message("over the air").await.unwrap();
    bob.drain();
    relay(&mut air.left_sent, &mut bob, "alice", AIR).await;
    assert_eq!(bob.messages(), vec![("over the air".to_string(), true)]);
}

#[tokio::test]
async fn test_wireless_session_moves_back_to_network() {
    let mut alice = Peer::new("ws://10.0.0.1:9001", SessionSettings::default());
    let mut bob = Peer::new("ws://10.0.0.2:9001", SessionSettings::default());
    let _air = establish(&mut alice, &mut bob, AIR).await;
    assert_eq!(alice.mgr.record(&bob.id).unwrap().route(), Some(AIR));

    alice
        .mgr
        .on_connectivity(ConnectivityChange::NetworkUnreachable)
        .await;
    let redial = alice
        .mgr
        .on_connectivity(ConnectivityChange::NetworkReachable)
        .await;
    assert_eq!(redial.as_deref(), Some(bob.id.as_str()));
    let redial = bob
        .mgr
        .on_connectivity(ConnectivityChange::NetworkReachable)
        .await;
    assert_eq!(redial, None, "only the dialing side re-dials");

    alice.mgr.connect_requested(&bob.id).unwrap();
    let mut net = pipe(&alice.id, &bob.id, NET);
    alice.mgr.on_transport_open(net.left.clone()).await;
    assert!(bob.mgr.on_incoming(&net.right));
    bob.mgr.on_transport_open(net.right.clone()).await;
    assert!(net.left_sent.try_recv().is_err(), "no re-keying on re-dial");
    assert!(net.right_sent.try_recv().is_err(), "no re-keying on re-dial");

    assert_eq!(alice.state_with(&bob), Some(SessionState::Secure));
    assert_eq!(alice.mgr.record(&bob.id).unwrap().route(), Some(NET));
    assert_eq!(bob.mgr.record(&alice.id).unwrap().route(), Some(NET));

    alice.mgr.send_message("back on the network").await.unwrap();
    bob.drain();
    let alice_id = alice.id.clone();
    relay(&mut net.left_sent, &mut bob, &alice_id, NET).await;
    assert_eq!(bob.messages(), vec![("back on the network".to_string(), true)]);
}

#[tokio::test]
async fn test_reconnect_by_address_flushes_queue_kept_under_peer_id() {
    let (mut alice, mut bob) = peers();
    let first = establish(&mut alice, &mut bob, NET).await;
    alice.mgr.on_transport_closed("bob", NET, first.left.id()).await;
    bob.mgr.on_transport_closed("alice", NET, first.right.id()).await;
    assert_eq!(
        alice.mgr.send_message("while apart").await.unwrap(),
        SendOutcome::Queued
    );

    let address = "ws://10.0.0.2:9001";
    alice.mgr.connect_requested(address).unwrap();
    let mut second = pipe("alice", "bob", NET);
    alice
        .mgr
        .handle(TransportEvent::Opened {
            link: second.left.clone(),
            dialed: Some(address.to_string()),
        })
        .await;
    assert!(bob.mgr.on_incoming(&second.right));
    bob.mgr.on_transport_open(second.right.clone()).await;
    relay(&mut second.right_sent, &mut alice, "bob", NET).await;

    assert_eq!(alice.mgr.state_of(address), Some(SessionState::Secure));
    assert_eq!(alice.mgr.queued_len(), 0);
    bob.drain();
    relay(&mut second.left_sent, &mut bob, "alice", NET).await;
    assert_eq!(bob.messages(), vec![("while apart".to_string(), true)]);
    assert!(alice.drain().contains(&ChatEvent::Sent {
        remote_id: "bob".to_string(),
        text: "while apart".to_string(),
        encrypted: true,
    }));
}

#[tokio::test]
async fn test_offline_sends_queue_until_reachable() {
    let (mut alice, mut bob) = peers();
    let mut pipe = establish(&mut alice, &mut bob, NET).await;
    alice.drain();

    let redial = alice
        .mgr
        .on_connectivity(ConnectivityChange::NetworkUnreachable)
        .await;
    assert_eq!(redial, None);
    assert!(alice.drain().contains(&ChatEvent::TransportSwitched {
        remote_id: "bob".to_string(),
        kind: None,
    }));

    assert_eq!(
        alice.mgr.send_message("offline 1").await.unwrap(),
        SendOutcome::Queued
    );
    alice.mgr.send_message("offline 2").await.unwrap();
    assert_eq!(alice.mgr.queued_len(), 2);

    let redial = alice
        .mgr
        .on_connectivity(ConnectivityChange::NetworkReachable)
        .await;
    assert_eq!(redial, None, "network link still attached");
    assert_eq!(alice.mgr.queued_len(), 0);

    bob.drain();
    relay(&mut pipe.left_sent, &mut bob, "alice", NET).await;
    let texts: Vec<String> = bob.messages().into_iter().map(|(text, _)| text).collect();
    assert_eq!(texts, vec!["offline 1", "offline 2"]);
}

#[tokio::test]
async fn test_closed_transport_keeps_queue_for_reconnect() {
    let (mut alice, mut bob) = peers();
    let first = establish(&mut alice, &mut bob, NET).await;

    alice.mgr.on_transport_closed("bob", NET, first.left.id()).await;
    bob.mgr.on_transport_closed("alice", NET, first.right.id()).await;
    assert_eq!(alice.state_with(&bob), Some(SessionState::Closed));
    assert_eq!(bob.state_with(&alice), Some(SessionState::Closed));

    assert_eq!(
        alice.mgr.send_message("while closed").await.unwrap(),
        SendOutcome::Queued
    );

    let mut second = establish(&mut alice, &mut bob, NET).await;
    assert_eq!(alice.mgr.queued_len(), 0);
    bob.drain();
    relay(&mut second.left_sent, &mut bob, "alice", NET).await;
    assert_eq!(bob.messages(), vec![("while closed".to_string(), true)]);
}

#[tokio::test]
async fn test_stale_close_is_ignored() {
    let (mut alice, mut bob) = peers();
    let _pipe = establish(&mut alice, &mut bob, NET).await;

    alice.mgr.on_transport_closed("bob", NET, u64::MAX).await;
    assert_eq!(alice.state_with(&bob), Some(SessionState::Secure));
}

#[tokio::test]
async fn test_direct_strategy_session() {
    let settings = SessionSettings {
        strategy: KeyStrategy::Direct,
        allow_plaintext: false,
    };
    let mut alice = Peer::new("alice", settings);
    let mut bob = Peer::new("bob", settings);

    alice.mgr.connect_requested("bob").unwrap();
    let mut p = pipe("alice", "bob", NET);
    alice.mgr.on_transport_open(p.left.clone()).await;
    assert_eq!(alice.state_with(&bob), Some(SessionState::Secure));

    assert!(bob.mgr.on_incoming(&p.right));
    bob.mgr.on_transport_open(p.right.clone()).await;
    assert_eq!(bob.state_with(&alice), Some(SessionState::AwaitingKeyExchange));
    assert!(p.right_sent.try_recv().is_err(), "responder sends no key");

    let key = p.left_sent.recv().await.unwrap();
    assert!(matches!(
        Envelope::from_bytes(&key).unwrap(),
        Envelope::Key {
            scheme: KeyStrategy::Direct,
            ..
        }
    ));
    bob.mgr.on_frame("alice", NET, &key).await;
    assert_eq!(bob.state_with(&alice), Some(SessionState::Secure));

    bob.drain();
    bob.mgr.send_message("direct reply").await.unwrap();
    relay(&mut p.right_sent, &mut alice, "bob", NET).await;
    assert_eq!(alice.messages(), vec![("direct reply".to_string(), true)]);
}
