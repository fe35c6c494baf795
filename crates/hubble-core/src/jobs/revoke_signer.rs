//! Delayed revocation of a signer's messages
//!
//! Removing a signer (or transferring an fid away from a custody address)
//! does not delete its messages at once. The revocation waits out a delay
//! window so late-arriving messages in flight can still be ordered
//! correctly, then deletes everything the signer produced.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::HubResult;
use crate::store::Store;
use crate::types::Fid;

use super::queue::{process_due_jobs, JobPayload, JobQueue};
use super::JobWorker;

/// Wait between a signer removal and its revocation
pub const REVOKE_SIGNER_DELAY: Duration = Duration::from_secs(60 * 60);

/// Every ten minutes
pub const DEFAULT_REVOKE_SIGNER_CRON: &str = "*/10 * * * *";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeSignerJob {
    pub fid: Fid,
    pub signer: Vec<u8>,
}

impl JobPayload for RevokeSignerJob {
    const KIND: &'static str = "revoke_signer";

    fn dedup_key(&self) -> String {
        format!("{}:{}", self.fid, hex::encode(&self.signer))
    }
}

pub struct RevokeSignerWorker {
    queue: JobQueue<RevokeSignerJob>,
    store: Arc<dyn Store>,
}

impl RevokeSignerWorker {
    pub fn new(queue: JobQueue<RevokeSignerJob>, store: Arc<dyn Store>) -> Self {
        Self { queue, store }
    }
}

#[async_trait]
impl JobWorker for RevokeSignerWorker {
    fn name(&self) -> &'static str {
        RevokeSignerJob::KIND
    }

    async fn tick(&self, now_ms: u64) -> HubResult<()> {
        let report = process_due_jobs(&self.queue, now_ms, |job: RevokeSignerJob| {
            let store = self.store.clone();
            async move {
                let revoked = store.revoke_messages_by_signer(job.fid, &job.signer).await?;
                info!(fid = job.fid, signer = %hex::encode(&job.signer), revoked, "Revoked signer messages");
                Ok(())
            }
        })
        .await?;
        debug!(succeeded = report.succeeded, failed = report.failed, "Revoke signer tick");
        Ok(())
    }
}
