//! Periodic cast pruning

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::HubResult;
use crate::store::Store;

use super::JobWorker;

/// Every two hours, on the hour
pub const DEFAULT_PRUNE_MESSAGES_CRON: &str = "0 */2 * * *";

/// Prunes every known fid down to the store's cast limit
pub struct PruneMessagesWorker {
    store: Arc<dyn Store>,
}

impl PruneMessagesWorker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl JobWorker for PruneMessagesWorker {
    fn name(&self) -> &'static str {
        "prune_messages"
    }

    async fn tick(&self, _now_ms: u64) -> HubResult<()> {
        let mut pruned = 0usize;
        for fid in self.store.fids().await? {
            match self.store.prune_messages(fid).await {
                Ok(n) => pruned += n,
                // one bad fid must not stop the rest
                Err(e) => warn!(fid, code = e.code(), error = %e, "Failed to prune messages"),
            }
        }
        info!(pruned, "Pruned messages");
        Ok(())
    }
}
