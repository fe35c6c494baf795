//! Merge rules over redb storage
//!
//! Every merge runs its checks and writes in one write transaction, so
//! concurrent merges of the same content cannot both succeed.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{HubError, HubResult};
use crate::storage::{self, Storage};
use crate::types::{
    Fid, HubState, IdRegistryEvent, Message, MessageBody, MessageType, NameRegistryEvent, Network,
};

use super::{Store, StoreEvent};

/// Casts kept per fid by [`Store::prune_messages`]
pub const PRUNE_CAST_LIMIT: usize = 10_000;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// The redb-backed [`Store`]
pub struct StoreEngine {
    storage: Storage,
    network: Network,
    prune_limit: usize,
    events: broadcast::Sender<StoreEvent>,
}

impl StoreEngine {
    pub fn new(storage: Storage, network: Network) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            storage,
            network,
            prune_limit: PRUNE_CAST_LIMIT,
            events,
        }
    }

    /// Override the number of casts kept per fid
    pub fn with_prune_limit(mut self, limit: usize) -> Self {
        self.prune_limit = limit;
        self
    }

    pub fn network(&self) -> Network {
        self.network
    }

    fn emit(&self, event: StoreEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn check_message(&self, message: &Message) -> HubResult<()> {
        if !message.has_valid_hash() {
            return Err(HubError::validation(format!(
                "hash {} does not match message data",
                message.hash_hex()
            )));
        }
        if message.data.network != self.network {
            return Err(HubError::validation(format!(
                "message is for {}, store is {}",
                message.data.network, self.network
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for StoreEngine {
    async fn open(&self) -> HubResult<()> {
        self.storage.open()
    }

    async fn close(&self) -> HubResult<()> {
        self.storage.close();
        Ok(())
    }

    async fn clear(&self) -> HubResult<()> {
        self.storage.clear()
    }

    async fn destroy(&self) -> HubResult<()> {
        self.storage.destroy()
    }

    async fn merge_message(&self, message: &Message) -> HubResult<()> {
        self.check_message(message)?;
        let fid = message.fid();

        let removed = self.storage.write(|txn| {
            if storage::load_id_event(txn, fid)?.is_none() {
                return Err(HubError::unknown_user(format!(
                    "fid {} has no custody event",
                    fid
                )));
            }
            if storage::load_message(txn, &message.hash)?.is_some() {
                return Err(HubError::duplicate(format!(
                    "message {} already merged",
                    message.hash_hex()
                )));
            }

            let mut removed = Vec::new();
            match &message.data.body {
                MessageBody::CastAdd { .. } => {
                    if storage::removed_signer_at(txn, fid, &message.signer)?.is_some() {
                        return Err(HubError::validation("signer has been removed"));
                    }
                }
                MessageBody::CastRemove { target_hash } => {
                    if storage::removed_signer_at(txn, fid, &message.signer)?.is_some() {
                        return Err(HubError::validation("signer has been removed"));
                    }
                    if let Some(target) = storage::load_message(txn, target_hash)? {
                        if target.fid() == fid && target.message_type() == MessageType::CastAdd {
                            storage::delete_message(txn, &target)?;
                            removed.push(target.hash);
                        }
                    }
                }
                MessageBody::SignerAdd { signer } => {
                    if let Some(removed_at) = storage::removed_signer_at(txn, fid, signer)? {
                        if removed_at >= message.data.timestamp {
                            return Err(HubError::conflict(
                                "signer was removed after this add",
                            ));
                        }
                        storage::clear_removed_signer(txn, fid, signer)?;
                    }
                }
                MessageBody::SignerRemove { signer } => {
                    match storage::removed_signer_at(txn, fid, signer)? {
                        Some(removed_at) if removed_at >= message.data.timestamp => {}
                        _ => storage::set_removed_signer(txn, fid, signer, message.data.timestamp)?,
                    }
                }
            }

            storage::insert_message(txn, message)?;
            Ok(removed)
        })?;

        debug!(fid, hash = %message.hash_hex(), removed = removed.len(), "Merged message");
        self.emit(StoreEvent::MessageMerged {
            message: message.clone(),
            removed,
        });
        Ok(())
    }

    async fn merge_id_registry_event(&self, event: &IdRegistryEvent) -> HubResult<()> {
        self.storage.write(|txn| {
            if let Some(existing) = storage::load_id_event(txn, event.fid)? {
                if existing.chain_position() == event.chain_position() {
                    return Err(HubError::duplicate(format!(
                        "id registry event for fid {} already merged",
                        event.fid
                    )));
                }
                if existing.chain_position() > event.chain_position() {
                    return Err(HubError::conflict(format!(
                        "newer id registry event stored for fid {}",
                        event.fid
                    )));
                }
            }
            storage::put_id_event(txn, event)
        })?;

        self.emit(StoreEvent::IdRegistryEventMerged(event.clone()));
        Ok(())
    }

    async fn merge_name_registry_event(&self, event: &NameRegistryEvent) -> HubResult<()> {
        self.storage.write(|txn| {
            if let Some(existing) = storage::load_name_event(txn, &event.fname)? {
                if existing.chain_position() == event.chain_position() {
                    return Err(HubError::duplicate(format!(
                        "name registry event for {} already merged",
                        event.fname_str()
                    )));
                }
                if existing.chain_position() > event.chain_position() {
                    return Err(HubError::conflict(format!(
                        "newer name registry event stored for {}",
                        event.fname_str()
                    )));
                }
            }
            storage::put_name_event(txn, event)
        })?;

        self.emit(StoreEvent::NameRegistryEventMerged(event.clone()));
        Ok(())
    }

    async fn revoke_messages_by_signer(&self, fid: Fid, signer: &[u8]) -> HubResult<usize> {
        let hashes = self.storage.write(|txn| {
            let mut hashes = Vec::new();
            for message in storage::fid_messages(txn, fid)? {
                if message.signer == signer {
                    storage::delete_message(txn, &message)?;
                    hashes.push(message.hash);
                }
            }
            Ok(hashes)
        })?;

        let count = hashes.len();
        if count > 0 {
            self.emit(StoreEvent::MessagesRevoked {
                fid,
                signer: signer.to_vec(),
                hashes,
            });
        }
        Ok(count)
    }

    async fn prune_messages(&self, fid: Fid) -> HubResult<usize> {
        let limit = self.prune_limit;
        let hashes = self.storage.write(|txn| {
            let casts: Vec<Message> = storage::fid_messages(txn, fid)?
                .into_iter()
                .filter(|m| m.message_type() == MessageType::CastAdd)
                .collect();
            let excess = casts.len().saturating_sub(limit);
            let mut hashes = Vec::with_capacity(excess);
            // oldest first
            for message in casts.into_iter().take(excess) {
                storage::delete_message(txn, &message)?;
                hashes.push(message.hash);
            }
            Ok(hashes)
        })?;

        let count = hashes.len();
        if count > 0 {
            self.emit(StoreEvent::MessagesPruned { fid, hashes });
        }
        Ok(count)
    }

    async fn fids(&self) -> HubResult<Vec<Fid>> {
        self.storage.fids()
    }

    async fn id_registry_event(&self, fid: Fid) -> HubResult<Option<IdRegistryEvent>> {
        self.storage.id_registry_event(fid)
    }

    async fn name_registry_event(&self, fname: &[u8]) -> HubResult<Option<NameRegistryEvent>> {
        self.storage.name_registry_event(fname)
    }

    async fn update_name_expiry(&self, fname: &[u8], expiry: u64) -> HubResult<()> {
        self.storage.write(|txn| {
            let mut event = storage::load_name_event(txn, fname)?.ok_or_else(|| {
                HubError::not_found(format!(
                    "no name registry event for {}",
                    String::from_utf8_lossy(fname)
                ))
            })?;
            event.expiry = Some(expiry);
            storage::put_name_event(txn, &event)
        })
    }

    async fn message_hashes(&self) -> HubResult<Vec<Vec<u8>>> {
        self.storage.message_hashes()
    }

    async fn messages_by_hashes(&self, hashes: &[Vec<u8>]) -> HubResult<Vec<Message>> {
        self.storage.messages_by_hashes(hashes)
    }

    async fn message_count(&self) -> HubResult<u64> {
        self.storage.message_count()
    }

    async fn hub_state(&self) -> HubResult<HubState> {
        self.storage.hub_state()
    }

    async fn put_hub_state(&self, state: &HubState) -> HubResult<()> {
        self.storage.put_hub_state(state)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn storage(&self) -> Storage {
        self.storage.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{IdRegistryEventType, MessageData, NameRegistryEventType};
    use tempfile::TempDir;

    async fn create_test_store() -> (StoreEngine, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = StoreEngine::new(
            Storage::new(temp_dir.path().join("store.redb")),
            Network::Devnet,
        );
        store.open().await.unwrap();
        (store, temp_dir)
    }

    fn custody(fid: Fid, block: u64) -> IdRegistryEvent {
        IdRegistryEvent {
            fid,
            to: vec![0xaa; 20],
            from: vec![],
            event_type: IdRegistryEventType::Register,
            block_number: block,
            block_hash: vec![1; 32],
            transaction_hash: vec![2; 32],
            log_index: 0,
        }
    }

    fn message(fid: Fid, timestamp: u32, signer: &[u8], body: MessageBody) -> Message {
        Message::new(
            MessageData {
                fid,
                network: Network::Devnet,
                timestamp,
                body,
            },
            signer.to_vec(),
            vec![],
        )
    }

    fn cast(fid: Fid, timestamp: u32, text: &str) -> Message {
        message(
            fid,
            timestamp,
            b"signer-a",
            MessageBody::CastAdd {
                text: text.to_string(),
            },
        )
    }

    fn name_event(fname: &str, block: u64, expiry: Option<u64>) -> NameRegistryEvent {
        NameRegistryEvent {
            fname: fname.as_bytes().to_vec(),
            to: vec![0xbb; 20],
            from: vec![],
            event_type: NameRegistryEventType::Transfer,
            block_number: block,
            block_hash: vec![3; 32],
            transaction_hash: vec![4; 32],
            log_index: 0,
            expiry,
        }
    }

    #[tokio::test]
    async fn test_merge_requires_custody_event() {
        let (store, _dir) = create_test_store().await;
        let err = store.merge_message(&cast(5, 1, "hi")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownUser);
    }

    #[tokio::test]
    async fn test_merge_twice_is_duplicate() {
        let (store, _dir) = create_test_store().await;
        store.merge_id_registry_event(&custody(5, 1)).await.unwrap();
        let msg = cast(5, 1, "hi");

        store.merge_message(&msg).await.unwrap();
        let err = store.merge_message(&msg).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Duplicate);
        assert_eq!(store.message_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_merge_rejects_bad_hash_and_network() {
        let (store, _dir) = create_test_store().await;
        store.merge_id_registry_event(&custody(5, 1)).await.unwrap();

        let mut tampered = cast(5, 1, "hi");
        tampered.data.timestamp = 2;
        let err = store.merge_message(&tampered).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailure);

        let mut foreign = cast(5, 1, "hi");
        foreign.data.network = Network::Mainnet;
        foreign.hash = foreign.data.hash();
        let err = store.merge_message(&foreign).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailure);
    }

    #[tokio::test]
    async fn test_cast_remove_deletes_target() {
        let (store, _dir) = create_test_store().await;
        store.merge_id_registry_event(&custody(5, 1)).await.unwrap();
        let target = cast(5, 1, "oops");
        store.merge_message(&target).await.unwrap();

        let mut events = store.subscribe();
        let remove = message(
            5,
            2,
            b"signer-a",
            MessageBody::CastRemove {
                target_hash: target.hash.clone(),
            },
        );
        store.merge_message(&remove).await.unwrap();

        assert!(store.storage().get_message(&target.hash).unwrap().is_none());
        match events.recv().await.unwrap() {
            StoreEvent::MessageMerged { removed, .. } => assert_eq!(removed, vec![target.hash]),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_removed_signer_cannot_cast_and_stale_add_conflicts() {
        let (store, _dir) = create_test_store().await;
        store.merge_id_registry_event(&custody(5, 1)).await.unwrap();
        let custody_key = vec![0xaa; 20];

        let remove = message(
            5,
            10,
            &custody_key,
            MessageBody::SignerRemove {
                signer: b"signer-a".to_vec(),
            },
        );
        store.merge_message(&remove).await.unwrap();

        let err = store.merge_message(&cast(5, 11, "late")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailure);

        let stale_add = message(
            5,
            9,
            &custody_key,
            MessageBody::SignerAdd {
                signer: b"signer-a".to_vec(),
            },
        );
        let err = store.merge_message(&stale_add).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);

        let fresh_add = message(
            5,
            12,
            &custody_key,
            MessageBody::SignerAdd {
                signer: b"signer-a".to_vec(),
            },
        );
        store.merge_message(&fresh_add).await.unwrap();
        store.merge_message(&cast(5, 13, "back")).await.unwrap();
    }

    #[tokio::test]
    async fn test_registry_events_order_by_chain_position() {
        let (store, _dir) = create_test_store().await;
        store.merge_id_registry_event(&custody(5, 10)).await.unwrap();

        let err = store
            .merge_id_registry_event(&custody(5, 10))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Duplicate);

        let err = store
            .merge_id_registry_event(&custody(5, 9))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);

        let mut transfer = custody(5, 11);
        transfer.from = vec![0xaa; 20];
        transfer.to = vec![0xcc; 20];
        store.merge_id_registry_event(&transfer).await.unwrap();
        assert_eq!(
            store.id_registry_event(5).await.unwrap().unwrap().to,
            vec![0xcc; 20]
        );
        assert_eq!(store.fids().await.unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn test_revoke_messages_by_signer() {
        let (store, _dir) = create_test_store().await;
        store.merge_id_registry_event(&custody(5, 1)).await.unwrap();
        store.merge_message(&cast(5, 1, "a")).await.unwrap();
        store.merge_message(&cast(5, 2, "b")).await.unwrap();
        let other = message(
            5,
            3,
            b"signer-b",
            MessageBody::CastAdd {
                text: "kept".to_string(),
            },
        );
        store.merge_message(&other).await.unwrap();

        assert_eq!(store.revoke_messages_by_signer(5, b"signer-a").await.unwrap(), 2);
        assert_eq!(store.message_count().await.unwrap(), 1);
        // redelivery is harmless
        assert_eq!(store.revoke_messages_by_signer(5, b"signer-a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_prune_keeps_newest_casts() {
        let temp_dir = TempDir::new().unwrap();
        let store = StoreEngine::new(
            Storage::new(temp_dir.path().join("store.redb")),
            Network::Devnet,
        )
        .with_prune_limit(2);
        store.open().await.unwrap();
        store.merge_id_registry_event(&custody(5, 1)).await.unwrap();
        let oldest = cast(5, 1, "1");
        store.merge_message(&oldest).await.unwrap();
        store.merge_message(&cast(5, 2, "2")).await.unwrap();
        store.merge_message(&cast(5, 3, "3")).await.unwrap();

        assert_eq!(store.prune_messages(5).await.unwrap(), 1);
        assert!(store.storage().get_message(&oldest.hash).unwrap().is_none());
        assert_eq!(store.prune_messages(5).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_name_expiry() {
        let (store, _dir) = create_test_store().await;
        let err = store.update_name_expiry(b"alice", 99).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);

        store
            .merge_name_registry_event(&name_event("alice", 1, None))
            .await
            .unwrap();
        store.update_name_expiry(b"alice", 99).await.unwrap();
        let stored = store.name_registry_event(b"alice").await.unwrap().unwrap();
        assert_eq!(stored.expiry, Some(99));
    }
}
