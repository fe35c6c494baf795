//! Peer-to-peer transport
//!
//! The hub talks to the gossip network only through the [`Transport`] trait.
//! [`GossipNode`] is the iroh-gossip implementation; tests substitute an
//! in-memory one.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use iroh_gossip::proto::TopicId;
use tokio::sync::broadcast;

use crate::error::{HubError, HubResult};
use crate::types::{peer_id_from_bytes, ContactInfo, Message, Network, PeerId};

pub mod address;
mod gossip_node;
pub mod protocol;

pub use address::{is_public, public_addresses_first, rank_addresses};
pub use gossip_node::{GossipNode, StaticAddressBook};
pub use protocol::{GossipEnvelope, GossipPayload, GOSSIP_PROTOCOL_VERSION};

/// Gossip topics a hub joins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Messages and registry events
    Primary,
    /// Contact info announcements
    Contact,
}

impl Topic {
    pub fn name(&self) -> &'static str {
        match self {
            Topic::Primary => "primary",
            Topic::Contact => "contact",
        }
    }

    /// Topic id, distinct per network so networks never mix
    pub fn id(&self, network: Network) -> TopicId {
        let label = format!("hubble/{}/{}", network, self.name());
        TopicId::from_bytes(*blake3::hash(label.as_bytes()).as_bytes())
    }
}

/// Events emitted by a transport
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// A gossip message arrived; decoding may have failed
    Message(HubResult<GossipEnvelope>),
    PeerConnected(PeerId),
    PeerDisconnected(PeerId),
}

/// A dialable peer: `<peer-id-hex>@<ip>:<port>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr {
    pub peer_id: PeerId,
    pub addr: SocketAddr,
}

impl FromStr for PeerAddr {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (peer, addr) = s
            .split_once('@')
            .ok_or_else(|| HubError::invalid_param(format!("expected <peer>@<ip:port>, got {}", s)))?;
        let bytes = hex::decode(peer)
            .map_err(|e| HubError::parse_failure(format!("invalid peer id hex: {}", e)))?;
        let peer_id = peer_id_from_bytes(&bytes)?;
        let addr = addr
            .parse()
            .map_err(|e| HubError::parse_failure(format!("invalid socket address {}: {}", addr, e)))?;
        Ok(Self { peer_id, addr })
    }
}

impl std::fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", hex::encode(self.peer_id.as_bytes()), self.addr)
    }
}

/// Options passed to [`Transport::start`]
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub network: Network,
    pub secret_key: Option<iroh::SecretKey>,
    pub bind_addr: SocketAddr,
    /// When set, only these peers are heard
    pub allowed_peers: Option<Vec<PeerId>>,
}

/// Known addresses of peers
pub trait AddressBook: Send + Sync {
    fn add(&self, peer: PeerId, addrs: Vec<SocketAddr>);
    fn addresses(&self, peer: &PeerId) -> Vec<SocketAddr>;
}

/// A gossip transport
#[async_trait]
pub trait Transport: Send + Sync {
    async fn start(&self, bootstrap: &[PeerAddr], options: TransportOptions) -> HubResult<()>;
    async fn stop(&self) -> HubResult<()>;

    /// Our peer id; `None` until started
    fn peer_id(&self) -> Option<PeerId>;
    /// Addresses we listen on; empty until started
    fn gossip_addresses(&self) -> Vec<SocketAddr>;

    async fn connect_address(&self, addr: &PeerAddr) -> HubResult<()>;
    async fn subscribe(&self, topic: Topic) -> HubResult<()>;

    async fn gossip_message(&self, message: &Message) -> HubResult<()>;
    async fn gossip_contact_info(&self, info: &ContactInfo) -> HubResult<()>;

    fn events(&self) -> broadcast::Receiver<NetworkEvent>;
    /// `None` until started
    fn address_book(&self) -> Option<Arc<dyn AddressBook>>;
}
