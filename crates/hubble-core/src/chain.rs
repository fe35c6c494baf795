//! Chain event provider
//!
//! Registry events come from whatever watches the chain. The hub only sees
//! the [`ChainEventProvider`] trait: it starts the provider with a
//! [`Submitter`] to push events into, and asks it for name expiries.
//!
//! [`ChannelEventProvider`] is fed through a [`ChainFeed`] handle by an
//! external ingester (or a test).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{HubError, HubResult};
use crate::store::Store;
use crate::types::{IdRegistryEvent, NameRegistryEvent, SubmitSource, Submitter};

const FEED_CAPACITY: usize = 1024;

/// One item observed on chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    IdRegistry(IdRegistryEvent),
    NameRegistry(NameRegistryEvent),
    /// Expiry of a name, learned separately from its transfer
    NameExpiry { fname: Vec<u8>, expiry: u64 },
}

/// Source of registry events
#[async_trait]
pub trait ChainEventProvider: Send + Sync {
    /// Begin pushing events into `submitter`
    async fn start(&self, submitter: Arc<dyn Submitter>) -> HubResult<()>;
    async fn stop(&self) -> HubResult<()>;
    /// Expiry of `fname` in unix seconds, `None` while unknown
    async fn name_expiry(&self, fname: &[u8]) -> HubResult<Option<u64>>;
}

/// Sending half of a [`ChannelEventProvider`]
#[derive(Debug, Clone)]
pub struct ChainFeed {
    tx: mpsc::Sender<ChainEvent>,
}

impl ChainFeed {
    pub async fn send(&self, event: ChainEvent) -> HubResult<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| HubError::unavailable("chain event provider is gone"))
    }
}

struct Running {
    cancel: CancellationToken,
    // the task hands the receiver back so the provider can restart
    task: JoinHandle<mpsc::Receiver<ChainEvent>>,
}

/// [`ChainEventProvider`] fed through a [`ChainFeed`]
pub struct ChannelEventProvider {
    store: Arc<dyn Store>,
    expiries: Arc<RwLock<HashMap<Vec<u8>, u64>>>,
    receiver: Mutex<Option<mpsc::Receiver<ChainEvent>>>,
    running: Mutex<Option<Running>>,
}

impl ChannelEventProvider {
    pub fn new(store: Arc<dyn Store>) -> (Self, ChainFeed) {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let provider = Self {
            store,
            expiries: Arc::new(RwLock::new(HashMap::new())),
            receiver: Mutex::new(Some(rx)),
            running: Mutex::new(None),
        };
        (provider, ChainFeed { tx })
    }
}

/// Persist `block` as the last seen block if it is newer
async fn record_block(store: &Arc<dyn Store>, block: u64) {
    let result = async {
        let mut state = store.hub_state().await?;
        if block > state.last_eth_block {
            state.last_eth_block = block;
            store.put_hub_state(&state).await?;
        }
        HubResult::Ok(())
    }
    .await;
    if let Err(e) = result {
        warn!(block, code = e.code(), error = %e, "Failed to record last chain block");
    }
}

async fn handle_event(
    store: &Arc<dyn Store>,
    expiries: &RwLock<HashMap<Vec<u8>, u64>>,
    submitter: &dyn Submitter,
    event: ChainEvent,
) {
    match event {
        ChainEvent::IdRegistry(event) => {
            let block = event.block_number;
            if let Err(e) = submitter
                .submit_id_registry_event(event, SubmitSource::ChainProvider)
                .await
            {
                debug!(code = e.code(), "Chain id registry event not merged");
            }
            record_block(store, block).await;
        }
        ChainEvent::NameRegistry(event) => {
            let block = event.block_number;
            if let Some(expiry) = event.expiry {
                expiries.write().insert(event.fname.clone(), expiry);
            }
            if let Err(e) = submitter
                .submit_name_registry_event(event, SubmitSource::ChainProvider)
                .await
            {
                debug!(code = e.code(), "Chain name registry event not merged");
            }
            record_block(store, block).await;
        }
        ChainEvent::NameExpiry { fname, expiry } => {
            expiries.write().insert(fname, expiry);
        }
    }
}

#[async_trait]
impl ChainEventProvider for ChannelEventProvider {
    async fn start(&self, submitter: Arc<dyn Submitter>) -> HubResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }
        let mut rx = self
            .receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| HubError::unavailable("chain feed receiver is missing"))?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let store = self.store.clone();
        let expiries = self.expiries.clone();
        let task = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = rx.recv() => event,
                };
                let Some(event) = event else {
                    debug!("Chain feed closed");
                    break;
                };
                handle_event(&store, &expiries, submitter.as_ref(), event).await;
            }
            rx
        });

        *running = Some(Running { cancel, task });
        info!("Chain event provider started");
        Ok(())
    }

    async fn stop(&self) -> HubResult<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };
        running.cancel.cancel();
        let rx = running
            .task
            .await
            .map_err(|e| HubError::unavailable(format!("chain provider task failed: {}", e)))?;
        *self.receiver.lock().await = Some(rx);
        info!("Chain event provider stopped");
        Ok(())
    }

    async fn name_expiry(&self, fname: &[u8]) -> HubResult<Option<u64>> {
        Ok(self.expiries.read().get(fname).copied())
    }
}
