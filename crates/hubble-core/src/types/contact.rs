//! Contact info announced by peers
//!
//! Peers gossip a [`ContactInfo`] on the contact topic when they connect. It
//! tells us where to dial them and summarizes their message set so we can
//! skip a diff sync when nothing diverges.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::error::{HubError, HubResult};

/// An address as announced over gossip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipAddressInfo {
    /// IP literal or host name
    pub address: String,
    /// 4 or 6
    pub family: u8,
    pub port: u16,
}

impl GossipAddressInfo {
    pub fn new(address: impl Into<String>, family: u8, port: u16) -> Self {
        Self {
            address: address.into(),
            family,
            port,
        }
    }

    /// Build from a socket address, family taken from the IP version
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        let family = if addr.is_ipv4() { 4 } else { 6 };
        Self::new(addr.ip().to_string(), family, addr.port())
    }

    /// The address as an IP literal, if it is one
    pub fn ip(&self) -> Option<IpAddr> {
        self.address.parse().ok()
    }

    /// Validate and convert to a dialable socket address
    ///
    /// Fails for host names, family mismatches and port zero.
    pub fn to_socket_addr(&self) -> HubResult<SocketAddr> {
        let ip = self.ip().ok_or_else(|| {
            HubError::parse_failure(format!("not an ip address: {}", self.address))
        })?;
        let family_ok = match (ip, self.family) {
            (IpAddr::V4(_), 4) | (IpAddr::V6(_), 6) => true,
            // unset family is tolerated
            (_, 0) => true,
            _ => false,
        };
        if !family_ok {
            return Err(HubError::invalid_param(format!(
                "address {} does not match family {}",
                self.address, self.family
            )));
        }
        if self.port == 0 {
            return Err(HubError::invalid_param("port must not be zero"));
        }
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl std::fmt::Display for GossipAddressInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.family == 6 {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

/// Compact summary of a hub's message set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    /// One digest per shard of the hash space
    pub excluded_hashes: Vec<String>,
    pub num_messages: u64,
}

/// Reachability plus sync summary, announced by a peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub gossip_address: Option<GossipAddressInfo>,
    pub rpc_address: Option<GossipAddressInfo>,
    pub excluded_hashes: Vec<String>,
    pub count: u64,
}

impl ContactInfo {
    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            excluded_hashes: self.excluded_hashes.clone(),
            num_messages: self.count,
        }
    }
}
