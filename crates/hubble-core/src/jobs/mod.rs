//! Durable background jobs
//!
//! ## Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  JobQueue<P>: persisted jobs of one kind, one per dedup key     │
//! │  ├── enqueue_job()      insert unless the key is pending        │
//! │  └── process_due_jobs() run due jobs, delete only on success    │
//! │                                                                 │
//! │  JobScheduler: wakes on a Schedule and ticks a JobWorker        │
//! │  ├── RevokeSignerWorker   cron, delayed signer revocation       │
//! │  ├── NameExpiryWorker     interval, fetch missing name expiry   │
//! │  └── PruneMessagesWorker  cron, cap casts per fid               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Delivery is at least once: a worker that fails leaves its job in place
//! and sees it again on the next tick.

mod name_expiry;
mod prune_messages;
mod queue;
mod revoke_signer;
mod schedule;
mod scheduler;

pub use name_expiry::{NameExpiryJob, NameExpiryWorker, DEFAULT_NAME_EXPIRY_INTERVAL};
pub use prune_messages::{PruneMessagesWorker, DEFAULT_PRUNE_MESSAGES_CRON};
pub use queue::{now_ms, process_due_jobs, JobPayload, JobQueue, ProcessReport};
pub use revoke_signer::{
    RevokeSignerJob, RevokeSignerWorker, DEFAULT_REVOKE_SIGNER_CRON, REVOKE_SIGNER_DELAY,
};
pub use schedule::Schedule;
pub use scheduler::{JobScheduler, JobWorker};
