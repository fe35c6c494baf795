//! Gossip wire format
//!
//! Every gossip payload travels inside a [`GossipEnvelope`] carrying the
//! sender's peer id. Envelopes are postcard encoded; a buffer with trailing
//! bytes or an unknown version is rejected as a whole.

use serde::{Deserialize, Serialize};

use crate::error::{HubError, HubResult};
use crate::types::{ContactInfo, IdRegistryEvent, Message};

/// Current envelope version
pub const GOSSIP_PROTOCOL_VERSION: u8 = 1;

/// Content carried by an envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GossipPayload {
    Message(Message),
    IdRegistryEvent(IdRegistryEvent),
    ContactInfo(ContactInfo),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipEnvelope {
    pub version: u8,
    /// Raw public key bytes of the sending peer
    pub peer_id: Vec<u8>,
    pub payload: Option<GossipPayload>,
}

impl GossipEnvelope {
    pub fn new(peer_id: &crate::types::PeerId, payload: GossipPayload) -> Self {
        Self {
            version: GOSSIP_PROTOCOL_VERSION,
            peer_id: peer_id.as_bytes().to_vec(),
            payload: Some(payload),
        }
    }

    pub fn encode(&self) -> HubResult<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> HubResult<Self> {
        let (envelope, rest): (Self, &[u8]) = postcard::take_from_bytes(bytes)?;
        if !rest.is_empty() {
            return Err(HubError::parse_failure(format!(
                "{} trailing bytes after envelope",
                rest.len()
            )));
        }
        if envelope.version != GOSSIP_PROTOCOL_VERSION {
            return Err(HubError::parse_failure(format!(
                "unsupported envelope version {}",
                envelope.version
            )));
        }
        Ok(envelope)
    }

    /// Payload kind for logging
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            Some(GossipPayload::Message(_)) => "message",
            Some(GossipPayload::IdRegistryEvent(_)) => "id_registry_event",
            Some(GossipPayload::ContactInfo(_)) => "contact_info",
            None => "none",
        }
    }
}
