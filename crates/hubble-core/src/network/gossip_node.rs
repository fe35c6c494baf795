//! Gossip transport using iroh-gossip
//!
//! One iroh endpoint per hub, one gossip topic per [`Topic`]. Each topic's
//! receiver is polled by its own task that turns gossip events into
//! [`NetworkEvent`]s. Peers outside the allow-list are ignored.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use iroh::discovery::static_provider::StaticProvider;
use iroh::protocol::Router;
use iroh::{Endpoint, EndpointAddr, RelayMode, SecretKey};
use iroh_gossip::api::{Event, GossipReceiver, GossipSender};
use iroh_gossip::net::{Gossip, GOSSIP_ALPN};
use parking_lot::RwLock;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, HubError, HubResult};
use crate::types::{ContactInfo, Message, Network, PeerId};

use super::protocol::{GossipEnvelope, GossipPayload};
use super::{AddressBook, NetworkEvent, PeerAddr, Topic, Transport, TransportOptions};

/// Gossip messages carry single messages and contact info, 64 KiB is plenty
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Address book backed by iroh's static discovery
///
/// Addresses added here are immediately dialable by the endpoint.
#[derive(Debug)]
pub struct StaticAddressBook {
    provider: StaticProvider,
    known: RwLock<HashMap<PeerId, Vec<SocketAddr>>>,
}

impl StaticAddressBook {
    pub fn new(provider: StaticProvider) -> Self {
        Self {
            provider,
            known: RwLock::new(HashMap::new()),
        }
    }
}

impl AddressBook for StaticAddressBook {
    fn add(&self, peer: PeerId, addrs: Vec<SocketAddr>) {
        let mut endpoint_addr = EndpointAddr::new(peer);
        {
            let mut known = self.known.write();
            let entry = known.entry(peer).or_default();
            for addr in addrs {
                if !entry.contains(&addr) {
                    entry.push(addr);
                }
            }
            for addr in entry.iter() {
                endpoint_addr = endpoint_addr.with_ip_addr(*addr);
            }
        }
        debug!(%peer, "Adding peer address to static discovery");
        self.provider.add_endpoint_info(endpoint_addr);
    }

    fn addresses(&self, peer: &PeerId) -> Vec<SocketAddr> {
        self.known.read().get(peer).cloned().unwrap_or_default()
    }
}

struct Running {
    endpoint: Endpoint,
    router: Router,
    gossip: Gossip,
    network: Network,
    address_book: Arc<StaticAddressBook>,
    /// Peers to join when subscribing to a topic
    bootstrap: Vec<PeerId>,
    senders: HashMap<Topic, Arc<Mutex<GossipSender>>>,
    allowed: Option<Arc<HashSet<PeerId>>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// The iroh-gossip [`Transport`]
pub struct GossipNode {
    state: Mutex<Option<Running>>,
    peer_id: RwLock<Option<PeerId>>,
    addresses: RwLock<Vec<SocketAddr>>,
    address_book: RwLock<Option<Arc<StaticAddressBook>>>,
    events: broadcast::Sender<NetworkEvent>,
}

impl Default for GossipNode {
    fn default() -> Self {
        Self::new()
    }
}

impl GossipNode {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(None),
            peer_id: RwLock::new(None),
            addresses: RwLock::new(Vec::new()),
            address_book: RwLock::new(None),
            events,
        }
    }

    async fn broadcast(&self, topic: Topic, payload: GossipPayload) -> HubResult<()> {
        let (sender, peer_id) = {
            let guard = self.state.lock().await;
            let running = guard.as_ref().ok_or_else(not_started)?;
            let sender = running.senders.get(&topic).cloned().ok_or_else(|| {
                HubError::unavailable(format!("not subscribed to {} topic", topic.name()))
            })?;
            (sender, running.endpoint.id())
        };

        let bytes = GossipEnvelope::new(&peer_id, payload).encode()?;
        debug!(topic = topic.name(), len = bytes.len(), "Broadcasting message");
        let result = sender
            .lock()
            .await
            .broadcast(bytes.into())
            .await
            .map_err(|e| HubError::network(format!("failed to broadcast: {}", e)));
        result
    }
}

fn not_started() -> HubError {
    HubError::unavailable("transport is not started")
}

fn is_allowed(allowed: &Option<Arc<HashSet<PeerId>>>, peer: &PeerId) -> bool {
    allowed.as_ref().map_or(true, |set| set.contains(peer))
}

async fn receive_loop(
    topic: Topic,
    mut receiver: GossipReceiver,
    allowed: Option<Arc<HashSet<PeerId>>>,
    events: broadcast::Sender<NetworkEvent>,
    cancel: CancellationToken,
) {
    use n0_future::StreamExt;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = receiver.try_next() => next,
        };

        match next {
            Ok(Some(Event::Received(msg))) => {
                if !is_allowed(&allowed, &msg.delivered_from) {
                    debug!(topic = topic.name(), from = %msg.delivered_from, "Ignoring message from peer outside allow-list");
                    continue;
                }
                let decoded = GossipEnvelope::decode(&msg.content);
                if let Err(ref e) = decoded {
                    debug!(topic = topic.name(), from = %msg.delivered_from, error = %e, "Undecodable gossip message");
                }
                let _ = events.send(NetworkEvent::Message(decoded));
            }
            Ok(Some(Event::NeighborUp(peer))) => {
                info!(topic = topic.name(), %peer, "Neighbor joined");
                // connection events come from the primary topic only
                if topic == Topic::Primary && is_allowed(&allowed, &peer) {
                    let _ = events.send(NetworkEvent::PeerConnected(peer));
                }
            }
            Ok(Some(Event::NeighborDown(peer))) => {
                info!(topic = topic.name(), %peer, "Neighbor left");
                if topic == Topic::Primary && is_allowed(&allowed, &peer) {
                    let _ = events.send(NetworkEvent::PeerDisconnected(peer));
                }
            }
            Ok(Some(Event::Lagged)) => {
                warn!(topic = topic.name(), "Lagged behind on topic");
            }
            Ok(None) => {
                debug!(topic = topic.name(), "Topic subscription closed");
                break;
            }
            Err(e) => {
                warn!(topic = topic.name(), error = ?e, "Error receiving from topic");
                break;
            }
        }
    }
}

#[async_trait]
impl Transport for GossipNode {
    async fn start(&self, bootstrap: &[PeerAddr], options: TransportOptions) -> HubResult<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(HubError::new(
                ErrorKind::BadRequest,
                "transport already started",
            ));
        }

        let secret_key = options
            .secret_key
            .unwrap_or_else(|| SecretKey::generate(&mut rand::rng()));
        let static_provider = StaticProvider::new();

        let builder = Endpoint::builder()
            .secret_key(secret_key)
            .alpns(vec![GOSSIP_ALPN.to_vec()])
            .discovery(static_provider.clone())
            .relay_mode(RelayMode::Disabled);
        let builder = match options.bind_addr {
            SocketAddr::V4(addr) => builder.bind_addr_v4(addr),
            SocketAddr::V6(addr) => builder.bind_addr_v6(addr),
        };
        let endpoint = builder
            .bind()
            .await
            .map_err(|e| HubError::network(format!("failed to bind endpoint: {}", e)))?;

        let peer_id = endpoint.id();
        info!(%peer_id, network = %options.network, "Endpoint bound");

        let gossip = Gossip::builder()
            .max_message_size(MAX_MESSAGE_SIZE)
            .spawn(endpoint.clone());
        let router = Router::builder(endpoint.clone())
            .accept(GOSSIP_ALPN, gossip.clone())
            .spawn();

        let address_book = Arc::new(StaticAddressBook::new(static_provider));
        let mut bootstrap_ids = Vec::with_capacity(bootstrap.len());
        for peer in bootstrap {
            address_book.add(peer.peer_id, vec![peer.addr]);
            if !bootstrap_ids.contains(&peer.peer_id) {
                bootstrap_ids.push(peer.peer_id);
            }
        }

        let allowed = options
            .allowed_peers
            .map(|peers| Arc::new(peers.into_iter().collect::<HashSet<_>>()));

        *self.peer_id.write() = Some(peer_id);
        *self.addresses.write() = endpoint.addr().ip_addrs().copied().collect();
        *self.address_book.write() = Some(address_book.clone());

        *state = Some(Running {
            endpoint,
            router,
            gossip,
            network: options.network,
            address_book,
            bootstrap: bootstrap_ids,
            senders: HashMap::new(),
            allowed,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        });
        Ok(())
    }

    async fn stop(&self) -> HubResult<()> {
        let Some(running) = self.state.lock().await.take() else {
            return Ok(());
        };
        info!("Shutting down gossip transport");

        running.cancel.cancel();
        for task in running.tasks {
            let _ = task.await;
        }

        if let Err(e) = running.router.shutdown().await {
            warn!(error = ?e, "Failed to shutdown router cleanly");
        }
        running.endpoint.close().await;

        *self.peer_id.write() = None;
        self.addresses.write().clear();
        *self.address_book.write() = None;
        info!("Gossip transport shutdown complete");
        Ok(())
    }

    fn peer_id(&self) -> Option<PeerId> {
        *self.peer_id.read()
    }

    fn gossip_addresses(&self) -> Vec<SocketAddr> {
        self.addresses.read().clone()
    }

    async fn connect_address(&self, addr: &PeerAddr) -> HubResult<()> {
        let senders: Vec<_> = {
            let mut guard = self.state.lock().await;
            let running = guard.as_mut().ok_or_else(not_started)?;
            running.address_book.add(addr.peer_id, vec![addr.addr]);
            if !running.bootstrap.contains(&addr.peer_id) {
                running.bootstrap.push(addr.peer_id);
            }
            running.senders.values().cloned().collect()
        };

        info!(peer = %addr.peer_id, addr = %addr.addr, "Connecting to peer");
        for sender in senders {
            sender
                .lock()
                .await
                .join_peers(vec![addr.peer_id])
                .await
                .map_err(|e| HubError::network(format!("failed to join peer: {}", e)))?;
        }
        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> HubResult<()> {
        let mut guard = self.state.lock().await;
        let running = guard.as_mut().ok_or_else(not_started)?;
        if running.senders.contains_key(&topic) {
            return Ok(());
        }

        let topic_id = topic.id(running.network);
        info!(
            topic = topic.name(),
            ?topic_id,
            peer_count = running.bootstrap.len(),
            "Subscribing to topic"
        );
        let (sender, receiver) = running
            .gossip
            .subscribe(topic_id, running.bootstrap.clone())
            .await
            .map_err(|e| HubError::network(format!("failed to subscribe: {}", e)))?
            .split();

        running.senders.insert(topic, Arc::new(Mutex::new(sender)));
        let task = tokio::spawn(receive_loop(
            topic,
            receiver,
            running.allowed.clone(),
            self.events.clone(),
            running.cancel.clone(),
        ));
        running.tasks.push(task);
        Ok(())
    }

    async fn gossip_message(&self, message: &Message) -> HubResult<()> {
        self.broadcast(Topic::Primary, GossipPayload::Message(message.clone()))
            .await
    }

    async fn gossip_contact_info(&self, info: &ContactInfo) -> HubResult<()> {
        self.broadcast(Topic::Contact, GossipPayload::ContactInfo(info.clone()))
            .await
    }

    fn events(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    fn address_book(&self) -> Option<Arc<dyn AddressBook>> {
        self.address_book
            .read()
            .clone()
            .map(|book| book as Arc<dyn AddressBook>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_options() -> TransportOptions {
        TransportOptions {
            network: Network::Devnet,
            secret_key: None,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            allowed_peers: None,
        }
    }

    #[tokio::test]
    async fn test_not_started() {
        let node = GossipNode::new();
        assert!(node.peer_id().is_none());
        assert!(node.address_book().is_none());
        let err = node.subscribe(Topic::Primary).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);
        // stopping a stopped node is fine
        node.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_with_secret_key() {
        let secret_key = SecretKey::generate(&mut rand::rng());
        let expected = secret_key.public();
        let node = GossipNode::new();
        let mut options = local_options();
        options.secret_key = Some(secret_key);

        node.start(&[], options).await.unwrap();
        assert_eq!(node.peer_id(), Some(expected));
        assert!(node.address_book().is_some());

        let err = node.start(&[], local_options()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);

        node.stop().await.unwrap();
        assert!(node.peer_id().is_none());
    }

    #[tokio::test]
    async fn test_broadcast_requires_subscription() {
        let node = GossipNode::new();
        node.start(&[], local_options()).await.unwrap();

        let err = node
            .gossip_contact_info(&ContactInfo::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);

        node.subscribe(Topic::Contact).await.unwrap();
        // no peers yet, the broadcast still succeeds
        node.gossip_contact_info(&ContactInfo::default()).await.unwrap();

        node.stop().await.unwrap();
    }

    #[test]
    fn test_static_address_book_dedups() {
        let book = StaticAddressBook::new(StaticProvider::new());
        let peer = SecretKey::generate(&mut rand::rng()).public();
        let addr: SocketAddr = "10.0.0.1:2282".parse().unwrap();
        book.add(peer, vec![addr]);
        book.add(peer, vec![addr, "10.0.0.2:2282".parse().unwrap()]);
        assert_eq!(book.addresses(&peer).len(), 2);
        let other = SecretKey::generate(&mut rand::rng()).public();
        assert!(book.addresses(&other).is_empty());
    }
}
