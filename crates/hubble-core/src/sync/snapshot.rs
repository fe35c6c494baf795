//! Sharded digest sync
//!
//! The message hash space is split into [`SNAPSHOT_SHARDS`] shards by the
//! high nibble of the first hash byte. Each shard keeps the XOR of the blake3
//! hashes of its members; two hubs holding the same messages have identical
//! digests. A snapshot is the list of shard digests plus the total count.
//!
//! Diff sync compares snapshots, asks the peer for the hashes of the shards
//! that differ, and pulls the messages we lack.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, HubResult};
use crate::rpc::RpcClient;
use crate::store::{Store, StoreEvent};
use crate::timer::TimerHandle;
use crate::types::{Message, PeerId, SyncSnapshot};

use super::SyncService;

/// Number of shards in a snapshot
pub const SNAPSHOT_SHARDS: usize = 16;

/// Messages requested per `get_messages` call
const FETCH_CHUNK: usize = 256;

/// Shard a message hash belongs to
pub fn shard_of(hash: &[u8]) -> u8 {
    hash.first().map_or(0, |b| b >> 4)
}

#[derive(Debug, Clone, Default)]
struct Shard {
    hashes: HashSet<Vec<u8>>,
    digest: [u8; 32],
}

impl Shard {
    fn toggle(&mut self, hash: &[u8]) {
        let h = blake3::hash(hash);
        for (d, b) in self.digest.iter_mut().zip(h.as_bytes()) {
            *d ^= b;
        }
    }
}

/// In-memory digest of the local message set
#[derive(Debug, Clone)]
pub(crate) struct ShardIndex {
    shards: Vec<Shard>,
}

impl Default for ShardIndex {
    fn default() -> Self {
        Self {
            shards: vec![Shard::default(); SNAPSHOT_SHARDS],
        }
    }
}

impl ShardIndex {
    pub(crate) fn from_hashes(hashes: impl IntoIterator<Item = Vec<u8>>) -> Self {
        let mut index = Self::default();
        for hash in hashes {
            index.insert(hash);
        }
        index
    }

    /// Idempotent
    pub(crate) fn insert(&mut self, hash: Vec<u8>) {
        let shard = &mut self.shards[shard_of(&hash) as usize];
        if !shard.hashes.contains(&hash) {
            shard.toggle(&hash);
            shard.hashes.insert(hash);
        }
    }

    /// Idempotent
    pub(crate) fn remove(&mut self, hash: &[u8]) {
        let shard = &mut self.shards[shard_of(hash) as usize];
        if shard.hashes.remove(hash) {
            shard.toggle(hash);
        }
    }

    pub(crate) fn contains(&self, hash: &[u8]) -> bool {
        self.shards[shard_of(hash) as usize].hashes.contains(hash)
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|s| s.hashes.len()).sum()
    }

    pub(crate) fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            excluded_hashes: self.shards.iter().map(|s| hex::encode(s.digest)).collect(),
            num_messages: self.len() as u64,
        }
    }

    /// Shards whose digest differs from `other`'s
    ///
    /// A snapshot with the wrong shape differs everywhere.
    pub(crate) fn divergent_shards(&self, other: &SyncSnapshot) -> Vec<u8> {
        let ours = self.snapshot();
        (0..SNAPSHOT_SHARDS)
            .filter(|&i| {
                other.excluded_hashes.len() != SNAPSHOT_SHARDS
                    || ours.excluded_hashes[i] != other.excluded_hashes[i]
            })
            .map(|i| i as u8)
            .collect()
    }
}

/// [`SyncService`] over sharded digests
pub struct SnapshotSync {
    store: Arc<dyn Store>,
    index: Arc<RwLock<ShardIndex>>,
    in_flight: Mutex<HashSet<PeerId>>,
    watcher: Mutex<Option<TimerHandle>>,
}

impl SnapshotSync {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            index: Arc::new(RwLock::new(ShardIndex::default())),
            in_flight: Mutex::new(HashSet::new()),
            watcher: Mutex::new(None),
        }
    }

    async fn rebuild(store: &Arc<dyn Store>, index: &RwLock<ShardIndex>) -> HubResult<()> {
        let hashes = store.message_hashes().await?;
        let rebuilt = ShardIndex::from_hashes(hashes);
        debug!(messages = rebuilt.len(), "Rebuilt sync index");
        *index.write() = rebuilt;
        Ok(())
    }

    async fn merge_one(&self, message: &Message, client: &Arc<dyn RpcClient>) -> HubResult<()> {
        match self.store.merge_message(message).await {
            Err(e) if e.kind == ErrorKind::UnknownUser => {
                // the peer knows the fid's custody event, we don't yet
                let fid = message.fid();
                debug!(fid, "Fetching missing custody event from peer");
                match client.get_id_registry_event(fid).await? {
                    Some(event) => {
                        if let Err(merge_err) = self.store.merge_id_registry_event(&event).await {
                            if merge_err.kind != ErrorKind::Duplicate {
                                return Err(merge_err);
                            }
                        }
                        self.store.merge_message(message).await
                    }
                    None => Err(e),
                }
            }
            other => other,
        }
    }

    async fn diff_sync(&self, peer: PeerId, client: &Arc<dyn RpcClient>) -> HubResult<bool> {
        let theirs = client.get_sync_snapshot().await?;
        let shards = self.index.read().divergent_shards(&theirs);
        if shards.is_empty() && theirs.num_messages == self.index.read().len() as u64 {
            debug!(%peer, "Peer snapshot matches after all");
            return Ok(false);
        }

        let remote = client.get_message_hashes(&shards).await?;
        let missing: Vec<Vec<u8>> = {
            let index = self.index.read();
            remote.into_iter().filter(|h| !index.contains(h)).collect()
        };
        info!(%peer, shards = shards.len(), missing = missing.len(), "Diff syncing with peer");

        let mut merged = 0usize;
        for chunk in missing.chunks(FETCH_CHUNK) {
            let mut messages = client.get_messages(chunk).await?;
            // removals need their targets merged first
            messages.sort_by_key(|m| m.data.timestamp);
            for result in self.merge_messages(messages, client.clone()).await {
                match result {
                    Ok(()) => merged += 1,
                    Err(e) => debug!(%peer, code = e.code(), error = %e, "Skipped message during diff sync"),
                }
            }
        }
        info!(%peer, merged, "Diff sync complete");
        Ok(true)
    }
}

#[async_trait]
impl SyncService for SnapshotSync {
    async fn initialize(&self) -> HubResult<()> {
        if self.watcher.lock().is_some() {
            return Ok(());
        }

        // subscribe before the rebuild so nothing merged in between is lost
        let mut events = self.store.subscribe();
        Self::rebuild(&self.store, &self.index).await?;

        let store = self.store.clone();
        let index = self.index.clone();
        let handle = TimerHandle::spawn(move |cancel| async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(StoreEvent::MessageMerged { message, removed }) => {
                        let mut index = index.write();
                        index.insert(message.hash);
                        for hash in removed {
                            index.remove(&hash);
                        }
                    }
                    Ok(StoreEvent::MessagesRevoked { hashes, .. })
                    | Ok(StoreEvent::MessagesPruned { hashes, .. }) => {
                        let mut index = index.write();
                        for hash in hashes {
                            index.remove(&hash);
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Sync index lagged behind store, rebuilding");
                        if let Err(e) = SnapshotSync::rebuild(&store, &index).await {
                            warn!(error = %e, "Failed to rebuild sync index");
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        *self.watcher.lock() = Some(handle);
        info!(messages = self.index.read().len(), "Sync initialized");
        Ok(())
    }

    async fn stop(&self) -> HubResult<()> {
        let handle = self.watcher.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        Ok(())
    }

    fn snapshot(&self) -> SyncSnapshot {
        self.index.read().snapshot()
    }

    async fn merge_messages(
        &self,
        messages: Vec<Message>,
        client: Arc<dyn RpcClient>,
    ) -> Vec<HubResult<()>> {
        let mut results = Vec::with_capacity(messages.len());
        for message in &messages {
            let result = self.merge_one(message, &client).await;
            if result.is_ok() {
                self.index.write().insert(message.hash.clone());
            }
            results.push(result);
        }
        results
    }

    async fn diff_sync_if_required(
        &self,
        peer: PeerId,
        announced: &SyncSnapshot,
        client: Arc<dyn RpcClient>,
    ) -> HubResult<bool> {
        if self.snapshot() == *announced {
            debug!(%peer, "Peer snapshot matches ours, skipping diff sync");
            return Ok(false);
        }
        if !self.in_flight.lock().insert(peer) {
            debug!(%peer, "Diff sync with peer already running");
            return Ok(false);
        }

        let result = self.diff_sync(peer, &client).await;
        self.in_flight.lock().remove(&peer);
        result
    }
}
