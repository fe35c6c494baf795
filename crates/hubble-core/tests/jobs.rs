//! Durable job queue and scheduler behavior

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hubble_core::jobs::{
    process_due_jobs, JobQueue, JobScheduler, JobWorker, RevokeSignerJob, Schedule,
};
use hubble_core::{HubError, HubResult, Storage};
use tempfile::TempDir;

fn create_test_queue(delay: Duration) -> (JobQueue<RevokeSignerJob>, Storage, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let storage = Storage::new(temp_dir.path().join("jobs.redb"));
    storage.open().unwrap();
    (JobQueue::new(storage.clone(), delay), storage, temp_dir)
}

fn job(fid: u64) -> RevokeSignerJob {
    RevokeSignerJob {
        fid,
        signer: vec![0xab; 32],
    }
}

#[test]
fn test_concurrent_enqueues_store_one_job() {
    let (queue, _storage, _dir) = create_test_queue(Duration::ZERO);

    let inserted: usize = std::thread::scope(|s| {
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let queue = queue.clone();
                s.spawn(move || queue.enqueue_job(&job(1)).unwrap())
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum()
    });

    assert_eq!(inserted, 1);
    assert_eq!(queue.pending_count().unwrap(), 1);
}

#[test]
fn test_jobs_survive_reopen() {
    let (queue, storage, _dir) = create_test_queue(Duration::from_secs(60));
    queue.enqueue_job_at(&job(1), 1_000).unwrap();
    queue.enqueue_job_at(&job(2), 1_000).unwrap();

    storage.close();
    storage.open().unwrap();

    let pending = queue.pending_jobs().unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|j| j.due_at_ms == 61_000));
    assert!(queue.due_jobs(60_999).unwrap().is_empty());
    assert_eq!(queue.due_jobs(61_000).unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_job_stays_for_next_tick() {
    let (queue, _storage, _dir) = create_test_queue(Duration::ZERO);
    queue.enqueue_job_at(&job(1), 0).unwrap();
    queue.enqueue_job_at(&job(2), 0).unwrap();

    let report = process_due_jobs(&queue, 10, |j: RevokeSignerJob| async move {
        if j.fid == 1 {
            Err(HubError::unavailable("not yet"))
        } else {
            Ok(())
        }
    })
    .await
    .unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);

    let remaining = queue.due_jobs(10).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].1, job(1));

    let report = process_due_jobs(&queue, 20, |_j: RevokeSignerJob| async { Ok(()) })
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(queue.pending_count().unwrap(), 0);
}

struct FailingWorker {
    ticks: AtomicUsize,
}

#[async_trait]
impl JobWorker for FailingWorker {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn tick(&self, _now_ms: u64) -> HubResult<()> {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        Err(HubError::unavailable("worker is down"))
    }
}

#[tokio::test]
async fn test_scheduler_stop_leaves_jobs_persisted() {
    let (queue, _storage, _dir) = create_test_queue(Duration::ZERO);
    queue.enqueue_job(&job(1)).unwrap();

    let worker = Arc::new(FailingWorker {
        ticks: AtomicUsize::new(0),
    });
    let scheduler = JobScheduler::new(
        Schedule::interval(Duration::from_millis(20)).unwrap(),
        worker.clone(),
    );
    assert!(scheduler.start());

    for _ in 0..100 {
        if worker.ticks.load(Ordering::SeqCst) >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(worker.ticks.load(Ordering::SeqCst) >= 2);

    scheduler.stop().await;
    assert!(!scheduler.is_running());
    let ticks = worker.ticks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(worker.ticks.load(Ordering::SeqCst), ticks);
    assert_eq!(queue.pending_count().unwrap(), 1);
}

#[test]
fn test_cron_schedules() {
    assert!(matches!(
        Schedule::parse("*/10 * * * *").unwrap(),
        Schedule::Cron(_)
    ));
    assert!(matches!(
        Schedule::parse("0 0 */2 * * *").unwrap(),
        Schedule::Cron(_)
    ));
    assert!(Schedule::parse("off").unwrap().is_disabled());
    assert!(Schedule::parse("every tuesday").is_err());
}
