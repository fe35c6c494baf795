//! The authoritative message store
//!
//! ## Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Store: merge + query surface used by the hub and sync          │
//! │  ├── merge_message / merge_*_registry_event                     │
//! │  ├── revoke_messages_by_signer / prune_messages                 │
//! │  └── subscribe() -> StoreEvent stream                           │
//! │                                                                 │
//! │  StoreEvent: what changed after a successful write              │
//! │  ├── MessageMerged: new message (plus casts it removed)         │
//! │  ├── IdRegistryEventMerged / NameRegistryEventMerged            │
//! │  ├── MessagesRevoked: signer revocation deleted messages        │
//! │  └── MessagesPruned: fid exceeded its cast limit                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::HubResult;
use crate::storage::Storage;
use crate::types::{Fid, HubState, IdRegistryEvent, Message, NameRegistryEvent};

mod engine;

pub use engine::{StoreEngine, PRUNE_CAST_LIMIT};

/// Notification emitted after a store write commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A message was merged; `removed` lists hashes it deleted (cast removals)
    MessageMerged {
        message: Message,
        removed: Vec<Vec<u8>>,
    },
    IdRegistryEventMerged(IdRegistryEvent),
    NameRegistryEventMerged(NameRegistryEvent),
    MessagesRevoked {
        fid: Fid,
        signer: Vec<u8>,
        hashes: Vec<Vec<u8>>,
    },
    MessagesPruned {
        fid: Fid,
        hashes: Vec<Vec<u8>>,
    },
}

/// Merge and query operations over durable hub state
#[async_trait]
pub trait Store: Send + Sync {
    async fn open(&self) -> HubResult<()>;
    async fn close(&self) -> HubResult<()>;
    async fn clear(&self) -> HubResult<()>;
    async fn destroy(&self) -> HubResult<()>;

    /// Merge a user message; re-merging is a `duplicate` failure
    async fn merge_message(&self, message: &Message) -> HubResult<()>;
    async fn merge_id_registry_event(&self, event: &IdRegistryEvent) -> HubResult<()>;
    async fn merge_name_registry_event(&self, event: &NameRegistryEvent) -> HubResult<()>;

    /// Delete every message of `fid` signed by `signer`; returns how many
    async fn revoke_messages_by_signer(&self, fid: Fid, signer: &[u8]) -> HubResult<usize>;
    /// Delete the oldest casts of `fid` beyond the retention limit
    async fn prune_messages(&self, fid: Fid) -> HubResult<usize>;

    async fn fids(&self) -> HubResult<Vec<Fid>>;
    async fn id_registry_event(&self, fid: Fid) -> HubResult<Option<IdRegistryEvent>>;
    async fn name_registry_event(&self, fname: &[u8]) -> HubResult<Option<NameRegistryEvent>>;
    async fn update_name_expiry(&self, fname: &[u8], expiry: u64) -> HubResult<()>;

    async fn message_hashes(&self) -> HubResult<Vec<Vec<u8>>>;
    async fn messages_by_hashes(&self, hashes: &[Vec<u8>]) -> HubResult<Vec<Message>>;
    async fn message_count(&self) -> HubResult<u64>;

    async fn hub_state(&self) -> HubResult<HubState>;
    async fn put_hub_state(&self, state: &HubState) -> HubResult<()>;

    /// Subscribe to committed changes
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;

    /// Database shared with the job queues
    fn storage(&self) -> Storage;
}
