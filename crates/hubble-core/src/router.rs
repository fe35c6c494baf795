//! Dispatch of inbound gossip envelopes

use std::sync::Arc;

use tracing::debug;

use crate::error::{HubError, HubResult};
use crate::network::{GossipEnvelope, GossipPayload};
use crate::sync::{ContactInfoExchange, PeerSyncResolver, SyncService};
use crate::types::{peer_id_from_bytes, SubmitSource, Submitter};

/// Routes each gossip payload to the operation that owns it
pub struct GossipRouter {
    resolver: Arc<PeerSyncResolver>,
    sync: Arc<dyn SyncService>,
    contact: Arc<ContactInfoExchange>,
}

impl GossipRouter {
    pub fn new(
        resolver: Arc<PeerSyncResolver>,
        sync: Arc<dyn SyncService>,
        contact: Arc<ContactInfoExchange>,
    ) -> Self {
        Self {
            resolver,
            sync,
            contact,
        }
    }

    pub async fn handle(&self, envelope: GossipEnvelope, submitter: &dyn Submitter) -> HubResult<()> {
        let peer = peer_id_from_bytes(&envelope.peer_id)?;

        match envelope.payload {
            Some(GossipPayload::Message(message)) => match self.resolver.get(&peer) {
                Some(client) => {
                    let mut results = self.sync.merge_messages(vec![message], client).await;
                    results
                        .pop()
                        .unwrap_or_else(|| Err(HubError::unavailable("sync returned no outcome")))
                }
                None => {
                    debug!(%peer, hash = %message.hash_hex(), "No rpc client for peer, merging locally");
                    submitter.submit_message(message, SubmitSource::Gossip).await
                }
            },
            Some(GossipPayload::IdRegistryEvent(event)) => {
                submitter
                    .submit_id_registry_event(event, SubmitSource::Gossip)
                    .await
            }
            Some(GossipPayload::ContactInfo(info)) => {
                let outcome = self.contact.on_receive(peer, info).await;
                debug!(%peer, ?outcome, "Handled contact info");
                Ok(())
            }
            None => Err(HubError::invalid_param("gossip envelope has no payload")),
        }
    }
}
