//! Hub configuration
//!
//! [`HubOptions`] is plain data: it can be read from JSON and then
//! overridden field by field from the command line. The accessors turn the
//! textual fields into typed values and fail with `invalid_param` or
//! `parse_failure` on bad input.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HubError, HubResult};
use crate::jobs::{
    Schedule, DEFAULT_NAME_EXPIRY_INTERVAL, DEFAULT_PRUNE_MESSAGES_CRON,
    DEFAULT_REVOKE_SIGNER_CRON, REVOKE_SIGNER_DELAY,
};
use crate::network::PeerAddr;
use crate::types::{peer_id_from_bytes, Network, PeerId};

pub const DEFAULT_GOSSIP_PORT: u16 = 2282;
pub const DEFAULT_RPC_PORT: u16 = 2283;
pub const DEFAULT_CONTACT_REGOSSIP_DELAY: Duration = Duration::from_secs(1);

/// Everything a hub needs to start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HubOptions {
    pub network: Network,
    /// Hex-encoded 32-byte secret key of the peer identity; random if unset
    pub peer_secret_key: Option<String>,
    /// `<peer-id-hex>@<ip>:<port>` entries to join on start
    pub bootstrap_addrs: Vec<String>,
    /// Hex peer ids; when set, gossip from anyone else is ignored
    pub allowed_peers: Option<Vec<String>>,
    pub bind_ip: IpAddr,
    /// Address announced to peers; discovered when unset
    pub announce_ip: Option<IpAddr>,
    /// 0 picks a free port
    pub gossip_port: u16,
    /// 0 picks a free port
    pub rpc_port: u16,
    /// Database file; a throwaway name is generated when unset
    pub db_path: Option<PathBuf>,
    /// Wipe the database on start
    pub reset_db: bool,
    pub revoke_signer_cron: String,
    pub prune_messages_cron: String,
    pub name_expiry_interval_secs: u64,
    pub revoke_delay_secs: u64,
    pub contact_regossip_delay_ms: u64,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            network: Network::default(),
            peer_secret_key: None,
            bootstrap_addrs: Vec::new(),
            allowed_peers: None,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            announce_ip: None,
            gossip_port: DEFAULT_GOSSIP_PORT,
            rpc_port: DEFAULT_RPC_PORT,
            db_path: None,
            reset_db: false,
            revoke_signer_cron: DEFAULT_REVOKE_SIGNER_CRON.to_string(),
            prune_messages_cron: DEFAULT_PRUNE_MESSAGES_CRON.to_string(),
            name_expiry_interval_secs: DEFAULT_NAME_EXPIRY_INTERVAL.as_secs(),
            revoke_delay_secs: REVOKE_SIGNER_DELAY.as_secs(),
            contact_regossip_delay_ms: DEFAULT_CONTACT_REGOSSIP_DELAY.as_millis() as u64,
        }
    }
}

/// A unique database name for disposable instances: `redb.tmp.<ulid>`
pub fn random_store_name() -> String {
    format!("redb.tmp.{}", ulid::Ulid::new().to_string().to_lowercase())
}

fn decode_peer_id(text: &str) -> HubResult<PeerId> {
    let bytes = hex::decode(text.trim())
        .map_err(|e| HubError::parse_failure(format!("invalid peer id hex {}: {}", text, e)))?;
    peer_id_from_bytes(&bytes)
}

impl HubOptions {
    pub fn from_json(json: &str) -> HubResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| HubError::parse_failure(format!("invalid config: {}", e)).with_cause(e))
    }

    pub fn load(path: impl AsRef<Path>) -> HubResult<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }

    pub fn secret_key(&self) -> HubResult<Option<iroh::SecretKey>> {
        let Some(text) = &self.peer_secret_key else {
            return Ok(None);
        };
        let bytes = hex::decode(text.trim())
            .map_err(|e| HubError::parse_failure(format!("invalid secret key hex: {}", e)))?;
        let raw: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            HubError::invalid_param(format!("secret key must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Some(iroh::SecretKey::from_bytes(&raw)))
    }

    pub fn bootstrap_peers(&self) -> HubResult<Vec<PeerAddr>> {
        self.bootstrap_addrs.iter().map(|a| a.parse()).collect()
    }

    pub fn allowed_peer_ids(&self) -> HubResult<Option<Vec<PeerId>>> {
        self.allowed_peers
            .as_ref()
            .map(|peers| peers.iter().map(|p| decode_peer_id(p)).collect())
            .transpose()
    }

    pub fn gossip_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.gossip_port)
    }

    pub fn rpc_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.rpc_port)
    }

    /// Configured path, or a fresh throwaway one in the temp dir
    pub fn db_path_or_random(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(random_store_name()))
    }

    pub fn revoke_signer_schedule(&self) -> HubResult<Schedule> {
        Schedule::parse(&self.revoke_signer_cron)
    }

    pub fn prune_messages_schedule(&self) -> HubResult<Schedule> {
        Schedule::parse(&self.prune_messages_cron)
    }

    /// Zero disables name expiry polling
    pub fn name_expiry_schedule(&self) -> HubResult<Schedule> {
        if self.name_expiry_interval_secs == 0 {
            return Ok(Schedule::Disabled);
        }
        Schedule::interval(Duration::from_secs(self.name_expiry_interval_secs))
    }

    pub fn revoke_delay(&self) -> Duration {
        Duration::from_secs(self.revoke_delay_secs)
    }

    pub fn contact_regossip_delay(&self) -> Duration {
        Duration::from_millis(self.contact_regossip_delay_ms)
    }
}
