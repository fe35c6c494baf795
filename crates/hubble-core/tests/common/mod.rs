//! Shared fixtures for hub integration tests
//!
//! The hub runs against a real redb store and snapshot sync; the network,
//! RPC server, chain provider and IP discovery are in-memory doubles.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hubble_core::network::{AddressBook, Topic, TransportOptions};
use hubble_core::rpc::RpcHandler;
use hubble_core::{
    ChainEventProvider, ContactInfo, Fid, GossipEnvelope, GossipPayload, Hub, HubDeps, HubError,
    HubOptions, HubResult, IdRegistryEvent, IdRegistryEventType, IpDiscovery, Message,
    MessageBody, MessageData, NameRegistryEvent, NameRegistryEventType, Network, NetworkEvent,
    PeerAddr, PeerId, RpcClient, RpcClientFactory, RpcServer, SnapshotSync, Storage, Store,
    StoreEngine, Submitter, SyncSnapshot, Transport,
};
use parking_lot::{Mutex, RwLock};
use tempfile::TempDir;
use tokio::sync::broadcast;

// ============================================================================
// Builders
// ============================================================================

pub fn custody(fid: Fid) -> Vec<u8> {
    vec![0xc0, fid as u8]
}

pub fn register(fid: Fid, block: u64) -> IdRegistryEvent {
    IdRegistryEvent {
        fid,
        to: custody(fid),
        from: vec![],
        event_type: IdRegistryEventType::Register,
        block_number: block,
        block_hash: vec![block as u8],
        transaction_hash: vec![],
        log_index: 0,
    }
}

pub fn transfer(fid: Fid, block: u64, from: Vec<u8>) -> IdRegistryEvent {
    IdRegistryEvent {
        fid,
        to: vec![0xd0, fid as u8],
        from,
        event_type: IdRegistryEventType::Transfer,
        block_number: block,
        block_hash: vec![block as u8],
        transaction_hash: vec![],
        log_index: 0,
    }
}

pub fn name_event(fname: &str, block: u64, expiry: Option<u64>) -> NameRegistryEvent {
    NameRegistryEvent {
        fname: fname.as_bytes().to_vec(),
        to: custody(1),
        from: vec![],
        event_type: NameRegistryEventType::Transfer,
        block_number: block,
        block_hash: vec![],
        transaction_hash: vec![],
        log_index: 0,
        expiry,
    }
}

pub fn message(fid: Fid, timestamp: u32, body: MessageBody, signer: &[u8]) -> Message {
    Message::new(
        MessageData {
            fid,
            network: Network::Devnet,
            timestamp,
            body,
        },
        signer.to_vec(),
        vec![0; 64],
    )
}

pub fn cast(fid: Fid, timestamp: u32, text: &str) -> Message {
    message(
        fid,
        timestamp,
        MessageBody::CastAdd {
            text: text.to_string(),
        },
        &custody(fid),
    )
}

pub fn signer_add(fid: Fid, timestamp: u32, signer: &[u8]) -> Message {
    message(
        fid,
        timestamp,
        MessageBody::SignerAdd {
            signer: signer.to_vec(),
        },
        &custody(fid),
    )
}

pub fn signer_remove(fid: Fid, timestamp: u32, signer: &[u8]) -> Message {
    message(
        fid,
        timestamp,
        MessageBody::SignerRemove {
            signer: signer.to_vec(),
        },
        &custody(fid),
    )
}

pub fn random_peer() -> PeerId {
    iroh::SecretKey::generate(&mut rand::rng()).public()
}

pub fn envelope(peer: &PeerId, payload: GossipPayload) -> GossipEnvelope {
    GossipEnvelope::new(peer, payload)
}

/// Options for a hub that touches nothing outside the test
pub fn test_options() -> HubOptions {
    HubOptions {
        bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        announce_ip: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        gossip_port: 0,
        rpc_port: 0,
        revoke_signer_cron: "disabled".to_string(),
        prune_messages_cron: "disabled".to_string(),
        name_expiry_interval_secs: 0,
        contact_regossip_delay_ms: 20,
        ..Default::default()
    }
}

/// Poll `check` until it holds or two seconds pass
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Default)]
pub struct MockAddressBook {
    known: RwLock<HashMap<PeerId, Vec<SocketAddr>>>,
}

impl AddressBook for MockAddressBook {
    fn add(&self, peer: PeerId, addrs: Vec<SocketAddr>) {
        let mut known = self.known.write();
        let entry = known.entry(peer).or_default();
        for addr in addrs {
            if !entry.contains(&addr) {
                entry.push(addr);
            }
        }
    }

    fn addresses(&self, peer: &PeerId) -> Vec<SocketAddr> {
        self.known.read().get(peer).cloned().unwrap_or_default()
    }
}

pub struct MockTransport {
    events: broadcast::Sender<NetworkEvent>,
    peer_id: RwLock<Option<PeerId>>,
    book: Arc<MockAddressBook>,
    pub started: AtomicBool,
    pub stop_calls: AtomicUsize,
    pub fail_stop: AtomicBool,
    pub topics: Mutex<Vec<Topic>>,
    pub gossiped: Mutex<Vec<Message>>,
    pub contact_infos: Mutex<Vec<ContactInfo>>,
    pub connected: Mutex<Vec<PeerAddr>>,
    pub start_options: Mutex<Option<TransportOptions>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            events,
            peer_id: RwLock::new(None),
            book: Arc::new(MockAddressBook::default()),
            started: AtomicBool::new(false),
            stop_calls: AtomicUsize::new(0),
            fail_stop: AtomicBool::new(false),
            topics: Mutex::new(Vec::new()),
            gossiped: Mutex::new(Vec::new()),
            contact_infos: Mutex::new(Vec::new()),
            connected: Mutex::new(Vec::new()),
            start_options: Mutex::new(None),
        }
    }
}

impl MockTransport {
    /// Deliver an event as if it came off the wire
    pub fn emit(&self, event: NetworkEvent) {
        let _ = self.events.send(event);
    }

    pub fn book(&self) -> &Arc<MockAddressBook> {
        &self.book
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn start(&self, _bootstrap: &[PeerAddr], options: TransportOptions) -> HubResult<()> {
        let key = options
            .secret_key
            .clone()
            .unwrap_or_else(|| iroh::SecretKey::generate(&mut rand::rng()));
        *self.peer_id.write() = Some(key.public());
        *self.start_options.lock() = Some(options);
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> HubResult<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(HubError::network("transport refused to stop"));
        }
        Ok(())
    }

    fn peer_id(&self) -> Option<PeerId> {
        *self.peer_id.read()
    }

    fn gossip_addresses(&self) -> Vec<SocketAddr> {
        if self.started.load(Ordering::SeqCst) {
            vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000)]
        } else {
            Vec::new()
        }
    }

    async fn connect_address(&self, addr: &PeerAddr) -> HubResult<()> {
        self.connected.lock().push(addr.clone());
        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> HubResult<()> {
        self.topics.lock().push(topic);
        Ok(())
    }

    async fn gossip_message(&self, message: &Message) -> HubResult<()> {
        self.gossiped.lock().push(message.clone());
        Ok(())
    }

    async fn gossip_contact_info(&self, info: &ContactInfo) -> HubResult<()> {
        self.contact_infos.lock().push(info.clone());
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    fn address_book(&self) -> Option<Arc<dyn AddressBook>> {
        if self.started.load(Ordering::SeqCst) {
            Some(self.book.clone())
        } else {
            None
        }
    }
}

// ============================================================================
// RPC
// ============================================================================

#[derive(Default)]
pub struct MockRpcServer {
    address: RwLock<Option<SocketAddr>>,
    handler: RwLock<Option<Arc<dyn RpcHandler>>>,
    port: AtomicU16,
    pub stop_calls: AtomicUsize,
}

impl MockRpcServer {
    pub fn is_started(&self) -> bool {
        self.address.read().is_some()
    }

    /// The handler the hub registered
    pub fn handler(&self) -> Option<Arc<dyn RpcHandler>> {
        self.handler.read().clone()
    }
}

#[async_trait]
impl RpcServer for MockRpcServer {
    async fn start(&self, bind: SocketAddr, handler: Arc<dyn RpcHandler>) -> HubResult<SocketAddr> {
        let port = if bind.port() == 0 {
            41000 + self.port.fetch_add(1, Ordering::SeqCst)
        } else {
            bind.port()
        };
        let addr = SocketAddr::new(bind.ip(), port);
        *self.address.write() = Some(addr);
        *self.handler.write() = Some(handler);
        Ok(addr)
    }

    async fn stop(&self) -> HubResult<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        *self.address.write() = None;
        *self.handler.write() = None;
        Ok(())
    }

    fn address(&self) -> Option<SocketAddr> {
        *self.address.read()
    }
}

/// Client answering from a fixed set of custody events
pub struct MockRpcClient {
    addr: SocketAddr,
    pub custody_events: RwLock<HashMap<Fid, IdRegistryEvent>>,
    pub snapshot_calls: AtomicUsize,
}

impl MockRpcClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            custody_events: RwLock::new(HashMap::new()),
            snapshot_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_custody(self, event: IdRegistryEvent) -> Self {
        self.custody_events.write().insert(event.fid, event);
        self
    }
}

#[async_trait]
impl RpcClient for MockRpcClient {
    fn address(&self) -> SocketAddr {
        self.addr
    }

    async fn submit_message(&self, _message: &Message) -> HubResult<()> {
        Ok(())
    }

    async fn get_sync_snapshot(&self) -> HubResult<SyncSnapshot> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SyncSnapshot::default())
    }

    async fn get_message_hashes(&self, _shards: &[u8]) -> HubResult<Vec<Vec<u8>>> {
        Ok(Vec::new())
    }

    async fn get_messages(&self, _hashes: &[Vec<u8>]) -> HubResult<Vec<Message>> {
        Ok(Vec::new())
    }

    async fn get_id_registry_event(&self, fid: Fid) -> HubResult<Option<IdRegistryEvent>> {
        Ok(self.custody_events.read().get(&fid).cloned())
    }
}

#[derive(Default)]
pub struct MockClientFactory {
    pub created: Mutex<Vec<SocketAddr>>,
}

impl RpcClientFactory for MockClientFactory {
    fn client(&self, addr: SocketAddr) -> Arc<dyn RpcClient> {
        self.created.lock().push(addr);
        Arc::new(MockRpcClient::new(addr))
    }
}

// ============================================================================
// Chain and IP discovery
// ============================================================================

#[derive(Default)]
pub struct MockChain {
    expiries: RwLock<HashMap<Vec<u8>, u64>>,
    pub submitter: RwLock<Option<Arc<dyn Submitter>>>,
    pub stop_calls: AtomicUsize,
}

impl MockChain {
    pub fn set_expiry(&self, fname: &str, expiry: u64) {
        self.expiries.write().insert(fname.as_bytes().to_vec(), expiry);
    }

    pub fn is_started(&self) -> bool {
        self.submitter.read().is_some()
    }
}

#[async_trait]
impl ChainEventProvider for MockChain {
    async fn start(&self, submitter: Arc<dyn Submitter>) -> HubResult<()> {
        *self.submitter.write() = Some(submitter);
        Ok(())
    }

    async fn stop(&self) -> HubResult<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        *self.submitter.write() = None;
        Ok(())
    }

    async fn name_expiry(&self, fname: &[u8]) -> HubResult<Option<u64>> {
        Ok(self.expiries.read().get(fname).copied())
    }
}

/// Answers with a fixed address, or fails when there is none
pub struct FixedIp(pub Option<IpAddr>);

#[async_trait]
impl IpDiscovery for FixedIp {
    async fn public_ip(&self) -> HubResult<IpAddr> {
        self.0
            .ok_or_else(|| HubError::network("ip service unreachable"))
    }
}

// ============================================================================
// Hub fixture
// ============================================================================

pub struct TestHub {
    pub hub: Hub,
    pub store: Arc<dyn Store>,
    pub transport: Arc<MockTransport>,
    pub rpc_server: Arc<MockRpcServer>,
    pub clients: Arc<MockClientFactory>,
    pub chain: Arc<MockChain>,
    pub dir: TempDir,
}

pub fn build_hub(options: HubOptions, ip: Option<IpAddr>) -> TestHub {
    let dir = TempDir::new().unwrap();
    let storage = Storage::new(options.db_path.clone().unwrap_or_else(|| dir.path().join("hub.redb")));
    let store: Arc<dyn Store> = Arc::new(StoreEngine::new(storage, options.network));
    let transport = Arc::new(MockTransport::default());
    let rpc_server = Arc::new(MockRpcServer::default());
    let clients = Arc::new(MockClientFactory::default());
    let chain = Arc::new(MockChain::default());

    let hub = Hub::new(
        options,
        HubDeps {
            store: store.clone(),
            sync: Arc::new(SnapshotSync::new(store.clone())),
            transport: transport.clone(),
            rpc_server: rpc_server.clone(),
            rpc_clients: clients.clone(),
            chain: chain.clone(),
            ip_discovery: Arc::new(FixedIp(ip)),
        },
    )
    .unwrap();

    TestHub {
        hub,
        store,
        transport,
        rpc_server,
        clients,
        chain,
        dir,
    }
}

/// A started hub with default test options
pub async fn started_hub() -> TestHub {
    let test = build_hub(test_options(), Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    test.hub.start().await.unwrap();
    test
}
