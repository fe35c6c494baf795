//! Handling of peers' contact info announcements

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::HubError;
use crate::network::Transport;
use crate::types::{ContactInfo, PeerId};

use super::{PeerSyncResolver, SyncService};

/// What an announcement led to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactOutcome {
    /// We already hold a client for the peer; nothing happened
    AlreadyTracked,
    /// A new client was cached and a sync check ran
    Registered,
    /// No rpc endpoint could be derived for the peer
    Unresolved,
}

/// Turns contact info into address book entries, cached clients and syncs
pub struct ContactInfoExchange {
    transport: Arc<dyn Transport>,
    resolver: Arc<PeerSyncResolver>,
    sync: Arc<dyn SyncService>,
}

impl ContactInfoExchange {
    pub fn new(
        transport: Arc<dyn Transport>,
        resolver: Arc<PeerSyncResolver>,
        sync: Arc<dyn SyncService>,
    ) -> Self {
        Self {
            transport,
            resolver,
            sync,
        }
    }

    pub async fn on_receive(&self, peer: PeerId, info: ContactInfo) -> ContactOutcome {
        debug!(%peer, count = info.count, "Received contact info");
        let address_book = self.transport.address_book();

        if let Some(gossip) = &info.gossip_address {
            match (&address_book, gossip.to_socket_addr()) {
                (None, _) => {
                    let e = HubError::unavailable("address book is not available");
                    warn!(%peer, code = e.code(), "Cannot record peer gossip address");
                }
                (Some(_), Err(e)) => {
                    warn!(%peer, address = %gossip, code = e.code(), error = %e, "Invalid gossip address in contact info");
                }
                (Some(book), Ok(addr)) => book.add(peer, vec![addr]),
            }
        }

        if self.resolver.contains(&peer) {
            debug!(%peer, "Peer already tracked");
            return ContactOutcome::AlreadyTracked;
        }

        let Some(client) = self.resolver.track(&peer, &info, address_book.as_deref()) else {
            // a concurrent announcement may have won
            return if self.resolver.contains(&peer) {
                ContactOutcome::AlreadyTracked
            } else {
                ContactOutcome::Unresolved
            };
        };
        info!(%peer, rpc = %client.address(), "Tracking peer for sync");

        match self
            .sync
            .diff_sync_if_required(peer, &info.snapshot(), client)
            .await
        {
            Ok(ran) => debug!(%peer, ran, "Sync check finished"),
            Err(e) => warn!(%peer, code = e.code(), error = %e, "Diff sync with peer failed"),
        }
        ContactOutcome::Registered
    }
}
