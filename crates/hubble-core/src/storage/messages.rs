//! Message storage
//!
//! ## Storage Design
//!
//! - **Primary table**: `messages`, keyed by message hash
//! - **Secondary index**: `fid_messages`, keyed by `fid_be ++ timestamp_be ++ hash`
//!   so one fid's messages iterate oldest first
//! - **Removed signers**: `removed_signers`, keyed by `fid_be ++ signer`, value
//!   is the timestamp of the newest removal
//!
//! Write helpers take the caller's transaction so the merge rules can check
//! and insert atomically.

use redb::{ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction};

use crate::error::HubResult;
use crate::types::{Fid, Message};

use super::Storage;

pub(crate) const MESSAGES_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("messages");

pub(crate) const FID_INDEX_TABLE: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("fid_messages");

pub(crate) const REMOVED_SIGNERS_TABLE: TableDefinition<&[u8], u32> =
    TableDefinition::new("removed_signers");

fn fid_index_key(message: &Message) -> Vec<u8> {
    let mut key = Vec::with_capacity(12 + message.hash.len());
    key.extend_from_slice(&message.fid().to_be_bytes());
    key.extend_from_slice(&message.data.timestamp.to_be_bytes());
    key.extend_from_slice(&message.hash);
    key
}

fn signer_key(fid: Fid, signer: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + signer.len());
    key.extend_from_slice(&fid.to_be_bytes());
    key.extend_from_slice(signer);
    key
}

/// Hashes of one fid's messages, oldest first
fn scan_fid<T>(index: &T, fid: Fid) -> HubResult<Vec<Vec<u8>>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let prefix = fid.to_be_bytes();
    let mut hashes = Vec::new();
    for entry in index.range(prefix.as_slice()..)? {
        let (key, _) = entry?;
        let key = key.value();
        if !key.starts_with(&prefix) {
            break;
        }
        hashes.push(key[12..].to_vec());
    }
    Ok(hashes)
}

pub(crate) fn load_message(txn: &WriteTransaction, hash: &[u8]) -> HubResult<Option<Message>> {
    let table = txn.open_table(MESSAGES_TABLE)?;
    let result = match table.get(hash)? {
        Some(v) => Some(postcard::from_bytes(v.value())?),
        None => None,
    };
    Ok(result)
}

pub(crate) fn insert_message(txn: &WriteTransaction, message: &Message) -> HubResult<()> {
    let bytes = postcard::to_allocvec(message)?;
    let mut messages = txn.open_table(MESSAGES_TABLE)?;
    let mut index = txn.open_table(FID_INDEX_TABLE)?;
    messages.insert(message.hash.as_slice(), bytes.as_slice())?;
    let empty: &[u8] = &[];
    index.insert(fid_index_key(message).as_slice(), empty)?;
    Ok(())
}

pub(crate) fn delete_message(txn: &WriteTransaction, message: &Message) -> HubResult<()> {
    let mut messages = txn.open_table(MESSAGES_TABLE)?;
    let mut index = txn.open_table(FID_INDEX_TABLE)?;
    messages.remove(message.hash.as_slice())?;
    index.remove(fid_index_key(message).as_slice())?;
    Ok(())
}

/// Messages of one fid inside a write transaction, oldest first
pub(crate) fn fid_messages(txn: &WriteTransaction, fid: Fid) -> HubResult<Vec<Message>> {
    let index = txn.open_table(FID_INDEX_TABLE)?;
    let hashes = scan_fid(&index, fid)?;
    let messages = txn.open_table(MESSAGES_TABLE)?;
    let mut out = Vec::with_capacity(hashes.len());
    for hash in hashes {
        if let Some(v) = messages.get(hash.as_slice())? {
            out.push(postcard::from_bytes(v.value())?);
        }
    }
    Ok(out)
}

pub(crate) fn removed_signer_at(
    txn: &WriteTransaction,
    fid: Fid,
    signer: &[u8],
) -> HubResult<Option<u32>> {
    let table = txn.open_table(REMOVED_SIGNERS_TABLE)?;
    let ts = table.get(signer_key(fid, signer).as_slice())?.map(|v| v.value());
    Ok(ts)
}

pub(crate) fn set_removed_signer(
    txn: &WriteTransaction,
    fid: Fid,
    signer: &[u8],
    timestamp: u32,
) -> HubResult<()> {
    let mut table = txn.open_table(REMOVED_SIGNERS_TABLE)?;
    table.insert(signer_key(fid, signer).as_slice(), timestamp)?;
    Ok(())
}

pub(crate) fn clear_removed_signer(txn: &WriteTransaction, fid: Fid, signer: &[u8]) -> HubResult<()> {
    let mut table = txn.open_table(REMOVED_SIGNERS_TABLE)?;
    table.remove(signer_key(fid, signer).as_slice())?;
    Ok(())
}

impl Storage {
    /// Load a message by hash
    pub fn get_message(&self, hash: &[u8]) -> HubResult<Option<Message>> {
        self.read(|txn| {
            let table = txn.open_table(MESSAGES_TABLE)?;
            match table.get(hash)? {
                Some(v) => Ok(Some(postcard::from_bytes(v.value())?)),
                None => Ok(None),
            }
        })
    }

    /// Load the messages that exist among `hashes`; unknown hashes are skipped
    pub fn messages_by_hashes(&self, hashes: &[Vec<u8>]) -> HubResult<Vec<Message>> {
        self.read(|txn| {
            let table = txn.open_table(MESSAGES_TABLE)?;
            let mut out = Vec::new();
            for hash in hashes {
                if let Some(v) = table.get(hash.as_slice())? {
                    out.push(postcard::from_bytes(v.value())?);
                }
            }
            Ok(out)
        })
    }

    /// Every stored message hash, in byte order
    pub fn message_hashes(&self) -> HubResult<Vec<Vec<u8>>> {
        self.read(|txn| {
            let table = txn.open_table(MESSAGES_TABLE)?;
            let mut out = Vec::new();
            for entry in table.iter()? {
                let (k, _) = entry?;
                out.push(k.value().to_vec());
            }
            Ok(out)
        })
    }

    pub fn message_count(&self) -> HubResult<u64> {
        self.read(|txn| Ok(txn.open_table(MESSAGES_TABLE)?.len()?))
    }

    /// One fid's messages, oldest first
    pub fn messages_by_fid(&self, fid: Fid) -> HubResult<Vec<Message>> {
        self.read(|txn| {
            let index = txn.open_table(FID_INDEX_TABLE)?;
            let messages = txn.open_table(MESSAGES_TABLE)?;
            let mut out = Vec::new();
            for hash in scan_fid(&index, fid)? {
                if let Some(v) = messages.get(hash.as_slice())? {
                    out.push(postcard::from_bytes(v.value())?);
                }
            }
            Ok(out)
        })
    }
}
