//! Durable job records
//!
//! Jobs are keyed by `"{kind}:{dedup_key}"`, so all jobs of one kind form a
//! contiguous key range and a kind holds at most one record per dedup key.

use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::HubResult;

use super::Storage;

pub(crate) const JOBS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// A persisted job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub kind: String,
    pub dedup_key: String,
    /// Unix milliseconds after which the job may run
    pub due_at_ms: u64,
    pub enqueued_at_ms: u64,
    /// Encoded job payload
    pub payload: Vec<u8>,
}

fn job_key(kind: &str, dedup_key: &str) -> String {
    format!("{}:{}", kind, dedup_key)
}

impl Storage {
    /// Persist `job` unless one with the same kind and dedup key is pending
    ///
    /// The check and the insert happen in one write transaction. Returns
    /// `true` when the job was inserted.
    pub fn insert_job_if_absent(&self, job: &JobRecord) -> HubResult<bool> {
        let key = job_key(&job.kind, &job.dedup_key);
        let bytes = postcard::to_allocvec(job)?;
        self.write(|txn| {
            let mut table = txn.open_table(JOBS_TABLE)?;
            if table.get(key.as_str())?.is_some() {
                return Ok(false);
            }
            table.insert(key.as_str(), bytes.as_slice())?;
            Ok(true)
        })
    }

    pub fn load_job(&self, kind: &str, dedup_key: &str) -> HubResult<Option<JobRecord>> {
        let key = job_key(kind, dedup_key);
        self.read(|txn| {
            let table = txn.open_table(JOBS_TABLE)?;
            match table.get(key.as_str())? {
                Some(v) => Ok(Some(postcard::from_bytes(v.value())?)),
                None => Ok(None),
            }
        })
    }

    /// Every pending job of one kind, ordered by dedup key
    pub fn jobs_of_kind(&self, kind: &str) -> HubResult<Vec<JobRecord>> {
        let start = format!("{}:", kind);
        // ';' sorts right after ':'
        let end = format!("{};", kind);
        self.read(|txn| {
            let table = txn.open_table(JOBS_TABLE)?;
            let mut jobs = Vec::new();
            for entry in table.range(start.as_str()..end.as_str())? {
                let (_, v) = entry?;
                jobs.push(postcard::from_bytes(v.value())?);
            }
            Ok(jobs)
        })
    }

    /// Delete a job; returns whether it existed
    pub fn delete_job(&self, kind: &str, dedup_key: &str) -> HubResult<bool> {
        let key = job_key(kind, dedup_key);
        self.write(|txn| {
            let mut table = txn.open_table(JOBS_TABLE)?;
            let existed = table.remove(key.as_str())?.is_some();
            Ok(existed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path().join("test.redb"));
        storage.open().unwrap();
        (storage, temp_dir)
    }

    fn job(kind: &str, key: &str, due: u64) -> JobRecord {
        JobRecord {
            kind: kind.to_string(),
            dedup_key: key.to_string(),
            due_at_ms: due,
            enqueued_at_ms: 0,
            payload: key.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_insert_is_deduplicated() {
        let (storage, _dir) = create_test_storage();
        assert!(storage.insert_job_if_absent(&job("a", "k", 1)).unwrap());
        assert!(!storage.insert_job_if_absent(&job("a", "k", 2)).unwrap());

        let stored = storage.load_job("a", "k").unwrap().unwrap();
        assert_eq!(stored.due_at_ms, 1);
    }

    #[test]
    fn test_kinds_are_namespaced() {
        let (storage, _dir) = create_test_storage();
        storage.insert_job_if_absent(&job("revoke", "1", 0)).unwrap();
        storage.insert_job_if_absent(&job("revoke", "2", 0)).unwrap();
        storage.insert_job_if_absent(&job("expiry", "1", 0)).unwrap();
        // a kind that shares a prefix must not leak into the range
        storage.insert_job_if_absent(&job("revoke2", "1", 0)).unwrap();

        let revoke = storage.jobs_of_kind("revoke").unwrap();
        assert_eq!(revoke.len(), 2);
        assert!(revoke.iter().all(|j| j.kind == "revoke"));
        assert_eq!(storage.jobs_of_kind("expiry").unwrap().len(), 1);
        assert!(storage.jobs_of_kind("missing").unwrap().is_empty());
    }

    #[test]
    fn test_delete_job() {
        let (storage, _dir) = create_test_storage();
        storage.insert_job_if_absent(&job("a", "k", 0)).unwrap();
        assert!(storage.delete_job("a", "k").unwrap());
        assert!(!storage.delete_job("a", "k").unwrap());
        assert!(storage.load_job("a", "k").unwrap().is_none());
        // re-enqueue after delete is allowed
        assert!(storage.insert_job_if_absent(&job("a", "k", 0)).unwrap());
    }
}
