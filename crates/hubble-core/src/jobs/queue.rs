//! Typed, deduplicated job queues over the shared database

use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::HubResult;
use crate::storage::{JobRecord, Storage};

/// A job payload type; one queue per type
pub trait JobPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Namespace of this job type in the jobs table
    const KIND: &'static str;

    /// Jobs with equal keys are the same job
    fn dedup_key(&self) -> String;
}

/// Unix time in milliseconds
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Durable queue of `P` jobs
pub struct JobQueue<P> {
    storage: Storage,
    delay: Duration,
    _payload: PhantomData<fn() -> P>,
}

impl<P> Clone for JobQueue<P> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            delay: self.delay,
            _payload: PhantomData,
        }
    }
}

impl<P: JobPayload> JobQueue<P> {
    /// Jobs become due `delay` after they are enqueued
    pub fn new(storage: Storage, delay: Duration) -> Self {
        Self {
            storage,
            delay,
            _payload: PhantomData,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Persist `payload` unless a job with its key is pending
    ///
    /// Returns `true` when a new job was stored.
    pub fn enqueue_job(&self, payload: &P) -> HubResult<bool> {
        self.enqueue_job_at(payload, now_ms())
    }

    pub fn enqueue_job_at(&self, payload: &P, now_ms: u64) -> HubResult<bool> {
        let record = JobRecord {
            kind: P::KIND.to_string(),
            dedup_key: payload.dedup_key(),
            due_at_ms: now_ms.saturating_add(self.delay.as_millis() as u64),
            enqueued_at_ms: now_ms,
            payload: postcard::to_allocvec(payload)?,
        };
        let inserted = self.storage.insert_job_if_absent(&record)?;
        debug!(kind = P::KIND, key = %record.dedup_key, inserted, "Enqueue job");
        Ok(inserted)
    }

    /// Jobs due at `now_ms`, oldest due first
    ///
    /// Records whose payload no longer decodes are skipped with a warning.
    pub fn due_jobs(&self, now_ms: u64) -> HubResult<Vec<(JobRecord, P)>> {
        let mut due: Vec<(JobRecord, P)> = self
            .storage
            .jobs_of_kind(P::KIND)?
            .into_iter()
            .filter(|job| job.due_at_ms <= now_ms)
            .filter_map(|job| match postcard::from_bytes::<P>(&job.payload) {
                Ok(payload) => Some((job, payload)),
                Err(e) => {
                    warn!(kind = P::KIND, key = %job.dedup_key, error = %e, "Undecodable job payload");
                    None
                }
            })
            .collect();
        due.sort_by_key(|(job, _)| job.due_at_ms);
        Ok(due)
    }

    pub fn pending_jobs(&self) -> HubResult<Vec<JobRecord>> {
        self.storage.jobs_of_kind(P::KIND)
    }

    pub fn pending_count(&self) -> HubResult<usize> {
        Ok(self.pending_jobs()?.len())
    }

    pub fn delete_job(&self, dedup_key: &str) -> HubResult<bool> {
        self.storage.delete_job(P::KIND, dedup_key)
    }
}

/// Outcome of one [`process_due_jobs`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// Run `perform` on every due job, deleting each one that succeeds
pub async fn process_due_jobs<P, F, Fut>(
    queue: &JobQueue<P>,
    now_ms: u64,
    mut perform: F,
) -> HubResult<ProcessReport>
where
    P: JobPayload,
    F: FnMut(P) -> Fut,
    Fut: Future<Output = HubResult<()>>,
{
    let mut report = ProcessReport::default();
    for (job, payload) in queue.due_jobs(now_ms)? {
        match perform(payload).await {
            Ok(()) => {
                queue.delete_job(&job.dedup_key)?;
                report.succeeded += 1;
            }
            Err(e) => {
                warn!(kind = P::KIND, key = %job.dedup_key, code = e.code(), error = %e, "Job failed, keeping it for the next tick");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}
