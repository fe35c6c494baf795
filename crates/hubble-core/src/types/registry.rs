//! Chain registry events
//!
//! Both registries are ordered by their position in the chain:
//! `(block_number, log_index)`.

use serde::{Deserialize, Serialize};

use super::Fid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdRegistryEventType {
    Register,
    Transfer,
}

/// Binds an fid to a custody address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRegistryEvent {
    pub fid: Fid,
    /// New custody address
    pub to: Vec<u8>,
    /// Previous custody address, empty for registrations
    pub from: Vec<u8>,
    pub event_type: IdRegistryEventType,
    pub block_number: u64,
    pub block_hash: Vec<u8>,
    pub transaction_hash: Vec<u8>,
    pub log_index: u32,
}

impl IdRegistryEvent {
    pub fn chain_position(&self) -> (u64, u32) {
        (self.block_number, self.log_index)
    }

    /// The previous custody address, if this event moved the fid
    pub fn origin_address(&self) -> Option<&[u8]> {
        if self.from.is_empty() {
            None
        } else {
            Some(&self.from)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameRegistryEventType {
    Transfer,
    Renew,
}

/// Assignment or renewal of a human-readable name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRegistryEvent {
    pub fname: Vec<u8>,
    pub to: Vec<u8>,
    pub from: Vec<u8>,
    pub event_type: NameRegistryEventType,
    pub block_number: u64,
    pub block_hash: Vec<u8>,
    pub transaction_hash: Vec<u8>,
    pub log_index: u32,
    /// Unix seconds; absent until resolved against the chain
    pub expiry: Option<u64>,
}

impl NameRegistryEvent {
    pub fn chain_position(&self) -> (u64, u32) {
        (self.block_number, self.log_index)
    }

    /// Name as text, lossy for non-utf8 bytes
    pub fn fname_str(&self) -> String {
        String::from_utf8_lossy(&self.fname).into_owned()
    }
}
