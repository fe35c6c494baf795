//! Persistent storage using redb
//!
//! This module provides ACID-compliant storage for:
//! - User messages and the per-fid index used for pruning
//! - Id and name registry events
//! - Durable background jobs
//! - The hub state singleton
//!
//! A [`Storage`] is created closed. [`Storage::open`] creates the file and all
//! tables; every operation on a closed store fails with `unavailable`. Clones
//! share the same database handle, so the job queues and the message store
//! write to one file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use redb::{Database, ReadTransaction, WriteTransaction};
use tracing::{debug, info};

use crate::error::{HubError, HubResult};

mod hub_state;
mod jobs;
mod messages;
mod registry;

pub use jobs::JobRecord;
pub(crate) use messages::{
    clear_removed_signer, delete_message, fid_messages, insert_message, load_message,
    removed_signer_at, set_removed_signer,
};
pub(crate) use registry::{load_id_event, load_name_event, put_id_event, put_name_event};

use hub_state::HUB_STATE_TABLE;
use jobs::JOBS_TABLE;
use messages::{FID_INDEX_TABLE, MESSAGES_TABLE, REMOVED_SIGNERS_TABLE};
use registry::{ID_REGISTRY_TABLE, NAME_REGISTRY_TABLE};

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    path: PathBuf,
    db: Arc<RwLock<Option<Database>>>,
}

impl Storage {
    /// Create a closed storage handle for the given path
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            db: Arc::new(RwLock::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.db.read().is_some()
    }

    /// Open the database, creating the file, its parent directory and all
    /// tables if needed. Opening an open store is a no-op.
    pub fn open(&self) -> HubResult<()> {
        let mut guard = self.db.write();
        if guard.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(&self.path)?;
        let write_txn = db.begin_write()?;
        create_tables(&write_txn)?;
        write_txn.commit()?;

        info!(path = %self.path.display(), "Opened store");
        *guard = Some(db);
        Ok(())
    }

    /// Close the database. Closing a closed store is a no-op.
    pub fn close(&self) {
        if self.db.write().take().is_some() {
            info!(path = %self.path.display(), "Closed store");
        }
    }

    /// Remove every record from every table
    pub fn clear(&self) -> HubResult<()> {
        self.write(|txn| {
            txn.delete_table(MESSAGES_TABLE)?;
            txn.delete_table(FID_INDEX_TABLE)?;
            txn.delete_table(REMOVED_SIGNERS_TABLE)?;
            txn.delete_table(ID_REGISTRY_TABLE)?;
            txn.delete_table(NAME_REGISTRY_TABLE)?;
            txn.delete_table(JOBS_TABLE)?;
            txn.delete_table(HUB_STATE_TABLE)?;
            create_tables(txn)
        })?;
        info!(path = %self.path.display(), "Cleared store");
        Ok(())
    }

    /// Close the database and delete its file
    pub fn destroy(&self) -> HubResult<()> {
        self.close();
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Deleted store file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Run `f` inside one write transaction, committing only if it succeeds
    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&WriteTransaction) -> HubResult<T>,
    ) -> HubResult<T> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or_else(not_open)?;
        let write_txn = db.begin_write()?;
        let out = f(&write_txn)?;
        write_txn.commit()?;
        Ok(out)
    }

    /// Run `f` against a read snapshot
    pub(crate) fn read<T>(&self, f: impl FnOnce(&ReadTransaction) -> HubResult<T>) -> HubResult<T> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or_else(not_open)?;
        let read_txn = db.begin_read()?;
        f(&read_txn)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

fn not_open() -> HubError {
    HubError::unavailable("store is not open")
}

fn create_tables(write_txn: &WriteTransaction) -> HubResult<()> {
    let _ = write_txn.open_table(MESSAGES_TABLE)?;
    let _ = write_txn.open_table(FID_INDEX_TABLE)?;
    let _ = write_txn.open_table(REMOVED_SIGNERS_TABLE)?;
    let _ = write_txn.open_table(ID_REGISTRY_TABLE)?;
    let _ = write_txn.open_table(NAME_REGISTRY_TABLE)?;
    let _ = write_txn.open_table(JOBS_TABLE)?;
    let _ = write_txn.open_table(HUB_STATE_TABLE)?;
    Ok(())
}
