//! Recurring job execution

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::HubResult;
use crate::timer::TimerHandle;

use super::queue::now_ms;
use super::Schedule;

/// Work done on every scheduler wake
#[async_trait]
pub trait JobWorker: Send + Sync {
    fn name(&self) -> &'static str;
    async fn tick(&self, now_ms: u64) -> HubResult<()>;
}

/// Drives one [`JobWorker`] on a [`Schedule`]
pub struct JobScheduler {
    schedule: Schedule,
    worker: Arc<dyn JobWorker>,
    handle: Mutex<Option<TimerHandle>>,
}

impl JobScheduler {
    pub fn new(schedule: Schedule, worker: Arc<dyn JobWorker>) -> Self {
        Self {
            schedule,
            worker,
            handle: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.worker.name()
    }

    /// Arm the timer; returns whether it is armed
    ///
    /// Disabled schedules never arm. Starting twice keeps the first timer.
    pub fn start(&self) -> bool {
        let name = self.worker.name();
        if self.schedule.is_disabled() {
            info!(job = name, "Job schedule disabled");
            return false;
        }
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return true;
        }

        let schedule = self.schedule.clone();
        let worker = self.worker.clone();
        *handle = Some(TimerHandle::spawn(move |cancel| async move {
            loop {
                let Some(delay) = schedule.next_delay(chrono::Utc::now()) else {
                    debug!(job = name, "Schedule has no further wake");
                    break;
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                if let Err(e) = worker.tick(now_ms()).await {
                    warn!(job = name, code = e.code(), error = %e, "Job tick failed");
                }
            }
        }));
        info!(job = name, "Job scheduler started");
        true
    }

    /// Cancel the timer; persisted jobs are left alone
    pub async fn stop(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
            info!(job = self.worker.name(), "Job scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().as_ref().is_some_and(|h| !h.is_finished())
    }
}
