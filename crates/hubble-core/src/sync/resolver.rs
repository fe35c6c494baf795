//! Peer id to RPC client resolution
//!
//! A peer announces its RPC address in its contact info. A literal IP is
//! dialed as is. A host name is not resolved; instead we take the best
//! address the transport knows for the peer and put the announced RPC port
//! on it.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::network::{rank_addresses, AddressBook};
use crate::rpc::{RpcClient, RpcClientFactory};
use crate::types::{ContactInfo, PeerId};

/// Resolves and caches one RPC client per peer
pub struct PeerSyncResolver {
    factory: Arc<dyn RpcClientFactory>,
    clients: Mutex<HashMap<PeerId, Arc<dyn RpcClient>>>,
}

impl PeerSyncResolver {
    pub fn new(factory: Arc<dyn RpcClientFactory>) -> Self {
        Self {
            factory,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Build a client for `peer` from its contact info
    ///
    /// Does not touch the cache. `None` means the peer cannot be dialed yet.
    pub fn resolve(
        &self,
        peer: &PeerId,
        info: &ContactInfo,
        address_book: Option<&dyn AddressBook>,
    ) -> Option<Arc<dyn RpcClient>> {
        let Some(rpc) = info.rpc_address.as_ref() else {
            debug!(%peer, "Peer announced no rpc address");
            return None;
        };

        if rpc.ip().is_some() {
            return match rpc.to_socket_addr() {
                Ok(addr) => {
                    debug!(%peer, %addr, "Using announced rpc address");
                    Some(self.factory.client(addr))
                }
                Err(e) => {
                    info!(%peer, address = %rpc, code = e.code(), error = %e, "Invalid rpc address in contact info");
                    None
                }
            };
        }

        let mut candidates = address_book
            .map(|book| book.addresses(peer))
            .unwrap_or_default();
        rank_addresses(&mut candidates);
        match candidates.first() {
            Some(best) => {
                let addr = SocketAddr::new(best.ip(), rpc.port);
                debug!(%peer, %addr, host = %rpc.address, "Using address book entry for rpc");
                Some(self.factory.client(addr))
            }
            None => {
                info!(%peer, host = %rpc.address, "No dialable address for peer rpc");
                None
            }
        }
    }

    /// Resolve and cache a client for `peer` under one lock
    ///
    /// `None` when the peer is already cached or cannot be dialed; only the
    /// caller that gets `Some` has created a client.
    pub fn track(
        &self,
        peer: &PeerId,
        info: &ContactInfo,
        address_book: Option<&dyn AddressBook>,
    ) -> Option<Arc<dyn RpcClient>> {
        let mut clients = self.clients.lock();
        let Entry::Vacant(slot) = clients.entry(*peer) else {
            return None;
        };
        let client = self.resolve(peer, info, address_book)?;
        slot.insert(client.clone());
        Some(client)
    }

    pub fn get(&self, peer: &PeerId) -> Option<Arc<dyn RpcClient>> {
        self.clients.lock().get(peer).cloned()
    }

    /// Cache `client` unless the peer already has one; returns whether it did
    pub fn add(&self, peer: PeerId, client: Arc<dyn RpcClient>) -> bool {
        match self.clients.lock().entry(peer) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(client);
                true
            }
        }
    }

    pub fn remove(&self, peer: &PeerId) -> Option<Arc<dyn RpcClient>> {
        self.clients.lock().remove(peer)
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.clients.lock().contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    pub fn clear(&self) {
        self.clients.lock().clear();
    }
}
