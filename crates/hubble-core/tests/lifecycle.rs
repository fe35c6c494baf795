//! Hub start and stop sequencing

mod common;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::Ordering;

use common::*;
use hubble_core::network::Topic;
use hubble_core::{ErrorKind, HubState, Network, PeerAddr, SubmitSource, Submitter};

#[tokio::test]
async fn test_identity_unavailable_before_start() {
    let test = build_hub(test_options(), None);

    let err = test.hub.identity().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unavailable);
    assert!(test.hub.rpc_address().is_none());
    assert!(test.hub.gossip_addresses().is_empty());

    test.hub.start().await.unwrap();
    assert!(test.hub.identity().is_ok());
    test.hub.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_brings_everything_up() {
    let key = iroh::SecretKey::generate(&mut rand::rng());
    let mut options = test_options();
    options.network = Network::Testnet;
    options.peer_secret_key = Some(hex::encode(key.to_bytes()));
    let test = build_hub(options, None);
    test.hub.start().await.unwrap();

    assert_eq!(test.hub.identity().unwrap(), key.public());
    assert!(test.store.storage().is_open());
    assert!(test.chain.is_started());
    assert!(test.rpc_server.is_started());
    assert_eq!(
        test.transport.topics.lock().clone(),
        vec![Topic::Primary, Topic::Contact]
    );
    let transport_options = test.transport.start_options.lock().clone().unwrap();
    assert_eq!(transport_options.network, Network::Testnet);
    assert_eq!(transport_options.bind_addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));

    test.hub.stop().await.unwrap();
    assert!(!test.store.storage().is_open());
    assert!(!test.chain.is_started());
    assert!(!test.rpc_server.is_started());
}

#[tokio::test]
async fn test_store_open_failure_aborts_start() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut options = test_options();
    // a directory cannot be opened as a database file
    options.db_path = Some(dir.path().to_path_buf());
    let test = build_hub(options, None);

    let err = test.hub.start().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::StorageFailure);
    assert!(!test.chain.is_started());
    assert!(!test.transport.started.load(Ordering::SeqCst));
    assert!(!test.rpc_server.is_started());
}

#[tokio::test]
async fn test_stop_is_best_effort() {
    let test = started_hub().await;
    test.transport.fail_stop.store(true, Ordering::SeqCst);

    let err = test.hub.stop().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NetworkFailure);

    // steps after the failing one still ran
    assert_eq!(test.chain.stop_calls.load(Ordering::SeqCst), 1);
    assert!(!test.store.storage().is_open());
    assert_eq!(test.rpc_server.stop_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_ip_discovery_falls_back_to_bind_ip() {
    let mut options = test_options();
    options.announce_ip = None;
    let test = build_hub(options, None);
    test.hub.start().await.unwrap();

    let info = test.hub.contact_info();
    assert_eq!(info.gossip_address.unwrap().address, "127.0.0.1");
    assert_eq!(
        info.rpc_address.unwrap().port,
        test.hub.rpc_address().unwrap().port()
    );

    test.hub.stop().await.unwrap();
}

#[tokio::test]
async fn test_discovered_ip_is_announced() {
    let mut options = test_options();
    options.announce_ip = None;
    let test = build_hub(options, Some("203.0.113.4".parse().unwrap()));
    test.hub.start().await.unwrap();

    assert_eq!(
        test.hub.contact_info().rpc_address.unwrap().address,
        "203.0.113.4"
    );

    test.hub.stop().await.unwrap();
}

#[tokio::test]
async fn test_reset_db_clears_previous_state() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut options = test_options();
    options.db_path = Some(dir.path().join("hub.redb"));

    let first = build_hub(options.clone(), None);
    first.hub.start().await.unwrap();
    first
        .hub
        .submit_id_registry_event(register(1, 1), SubmitSource::ChainProvider)
        .await
        .unwrap();
    first
        .hub
        .put_hub_state(&HubState { last_eth_block: 42 })
        .await
        .unwrap();
    first.hub.stop().await.unwrap();

    // reopening keeps everything
    let second = build_hub(options.clone(), None);
    second.hub.start().await.unwrap();
    assert_eq!(second.hub.hub_state().await.unwrap().last_eth_block, 42);
    second.hub.stop().await.unwrap();

    options.reset_db = true;
    let third = build_hub(options, None);
    third.hub.start().await.unwrap();
    assert_eq!(third.hub.hub_state().await.unwrap().last_eth_block, 0);
    assert!(third.store.id_registry_event(1).await.unwrap().is_none());
    third.hub.stop().await.unwrap();
}

#[tokio::test]
async fn test_destroy_store_removes_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("hub.redb");
    let mut options = test_options();
    options.db_path = Some(path.clone());

    let test = build_hub(options, None);
    test.hub.start().await.unwrap();
    assert!(path.exists());
    test.hub.stop().await.unwrap();

    test.hub.destroy_store().await.unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn test_schedulers_run_after_start() {
    let mut options = test_options();
    options.name_expiry_interval_secs = 1;
    let test = build_hub(options, None);
    test.hub.start().await.unwrap();

    test.hub
        .submit_name_registry_event(name_event("carol", 3, None), SubmitSource::ChainProvider)
        .await
        .unwrap();
    test.chain.set_expiry("carol", 1_800_000_000);

    let queue = test.hub.name_expiry_queue().clone();
    assert!(wait_until_secs(3, || queue.pending_count().unwrap() == 0).await);
    let stored = test.store.name_registry_event(b"carol").await.unwrap().unwrap();
    assert_eq!(stored.expiry, Some(1_800_000_000));

    test.hub.stop().await.unwrap();
}

async fn wait_until_secs(secs: u64, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(secs);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    check()
}

#[tokio::test]
async fn test_connect_address_goes_to_transport() {
    let test = started_hub().await;
    let peer = random_peer();
    let addr: PeerAddr = format!("{}@127.0.0.1:2282", hex::encode(peer.as_bytes()))
        .parse()
        .unwrap();

    test.hub.connect_address(&addr).await.unwrap();
    assert_eq!(test.transport.connected.lock()[0].peer_id, peer);

    test.hub.stop().await.unwrap();
}
