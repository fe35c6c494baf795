//! Pull-based reconciliation with peers
//!
//! ## Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncService: what the hub needs from a sync engine             │
//! │  ├── snapshot()              compact summary for contact info   │
//! │  ├── merge_messages()        merge a batch pulled from a peer   │
//! │  └── diff_sync_if_required() compare, then pull the difference  │
//! │                                                                 │
//! │  PeerSyncResolver: peer id -> cached RPC client                 │
//! │  ContactInfoExchange: announcement -> resolve -> diff sync      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HubResult;
use crate::rpc::RpcClient;
use crate::types::{Message, PeerId, SyncSnapshot};

mod contact;
mod resolver;
mod snapshot;

pub use contact::{ContactInfoExchange, ContactOutcome};
pub use resolver::PeerSyncResolver;
pub use snapshot::{shard_of, SnapshotSync, SNAPSHOT_SHARDS};

/// Sync engine used by the hub
#[async_trait]
pub trait SyncService: Send + Sync {
    /// Build local state; must finish before the transport starts
    async fn initialize(&self) -> HubResult<()>;
    async fn stop(&self) -> HubResult<()>;

    /// Summary of the local message set
    fn snapshot(&self) -> SyncSnapshot;

    /// Merge messages obtained from the peer behind `client`
    ///
    /// Returns one outcome per message, in order.
    async fn merge_messages(
        &self,
        messages: Vec<Message>,
        client: Arc<dyn RpcClient>,
    ) -> Vec<HubResult<()>>;

    /// Diff sync with `peer` unless its announced snapshot matches ours
    ///
    /// Returns whether a diff sync ran.
    async fn diff_sync_if_required(
        &self,
        peer: PeerId,
        announced: &SyncSnapshot,
        client: Arc<dyn RpcClient>,
    ) -> HubResult<bool>;
}
