//! Filling in name expiries from the chain
//!
//! Name registry events can arrive without an expiry. A job per name asks
//! the chain provider until it knows the expiry, then writes it into the
//! stored event.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chain::ChainEventProvider;
use crate::error::{ErrorKind, HubError, HubResult};
use crate::store::Store;

use super::queue::{process_due_jobs, JobPayload, JobQueue};
use super::JobWorker;

pub const DEFAULT_NAME_EXPIRY_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameExpiryJob {
    pub fname: Vec<u8>,
}

impl JobPayload for NameExpiryJob {
    const KIND: &'static str = "name_expiry";

    /// The name itself, or `0x`-prefixed hex when it is not utf-8
    fn dedup_key(&self) -> String {
        match std::str::from_utf8(&self.fname) {
            Ok(name) => name.to_string(),
            Err(_) => format!("0x{}", hex::encode(&self.fname)),
        }
    }
}

pub struct NameExpiryWorker {
    queue: JobQueue<NameExpiryJob>,
    store: Arc<dyn Store>,
    chain: Arc<dyn ChainEventProvider>,
}

impl NameExpiryWorker {
    pub fn new(
        queue: JobQueue<NameExpiryJob>,
        store: Arc<dyn Store>,
        chain: Arc<dyn ChainEventProvider>,
    ) -> Self {
        Self {
            queue,
            store,
            chain,
        }
    }
}

async fn refresh_expiry(
    store: Arc<dyn Store>,
    chain: Arc<dyn ChainEventProvider>,
    job: NameExpiryJob,
) -> HubResult<()> {
    let name = job.dedup_key();
    let expiry = chain
        .name_expiry(&job.fname)
        .await?
        .ok_or_else(|| HubError::unavailable(format!("expiry of {} not known yet", name)))?;

    match store.update_name_expiry(&job.fname, expiry).await {
        Ok(()) => {
            info!(fname = %name, expiry, "Updated name expiry");
            Ok(())
        }
        // the event never merged; nothing left to refresh
        Err(e) if e.kind == ErrorKind::NotFound => {
            debug!(fname = %name, "No stored event for name, dropping expiry job");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[async_trait]
impl JobWorker for NameExpiryWorker {
    fn name(&self) -> &'static str {
        NameExpiryJob::KIND
    }

    async fn tick(&self, now_ms: u64) -> HubResult<()> {
        let report = process_due_jobs(&self.queue, now_ms, |job: NameExpiryJob| {
            refresh_expiry(self.store.clone(), self.chain.clone(), job)
        })
        .await?;
        debug!(succeeded = report.succeeded, failed = report.failed, "Name expiry tick");
        Ok(())
    }
}
