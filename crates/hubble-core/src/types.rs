//! Core types for the hub
//!
//! Messages are user-authored content, registry events come from the chain,
//! and contact info is what peers announce about themselves.

use serde::{Deserialize, Serialize};

pub mod contact;
pub mod message;
pub mod registry;
pub mod submission;

pub use contact::{ContactInfo, GossipAddressInfo, SyncSnapshot};
pub use message::{Message, MessageBody, MessageData, MessageType, MESSAGE_HASH_LENGTH};
pub use registry::{IdRegistryEvent, IdRegistryEventType, NameRegistryEvent, NameRegistryEventType};
pub use submission::{SubmissionRequest, SubmitSource, Submitter};

/// Numeric account identifier
pub type Fid = u64;

/// Peer identifier on the gossip network (iroh endpoint public key)
pub type PeerId = iroh::PublicKey;

/// Decode a peer identifier from raw bytes
///
/// Peers put their own identifier into every envelope they gossip; it must be
/// exactly the 32 bytes of an ed25519 public key.
pub fn peer_id_from_bytes(bytes: &[u8]) -> crate::error::HubResult<PeerId> {
    let raw: [u8; 32] = bytes.try_into().map_err(|_| {
        crate::error::HubError::parse_failure(format!(
            "peer id must be 32 bytes, got {}",
            bytes.len()
        ))
    })?;
    iroh::PublicKey::from_bytes(&raw)
        .map_err(|e| crate::error::HubError::parse_failure(format!("invalid peer id: {}", e)))
}

/// Which network a hub (and every message it accepts) belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    #[default]
    Devnet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Devnet => "devnet",
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Network {
    type Err = crate::error::HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "devnet" => Ok(Network::Devnet),
            other => Err(crate::error::HubError::invalid_param(format!(
                "unknown network: {}",
                other
            ))),
        }
    }
}

/// Singleton metadata record persisted by the hub
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubState {
    /// Highest chain block whose registry events have been submitted
    pub last_eth_block: u64,
}
