//! Registry event storage
//!
//! One id registry event per fid and one name registry event per name; the
//! merge rules decide which event wins.

use redb::{ReadableTable, TableDefinition, WriteTransaction};

use crate::error::HubResult;
use crate::types::{Fid, IdRegistryEvent, NameRegistryEvent};

use super::Storage;

pub(crate) const ID_REGISTRY_TABLE: TableDefinition<u64, &[u8]> =
    TableDefinition::new("id_registry_events");

pub(crate) const NAME_REGISTRY_TABLE: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("name_registry_events");

pub(crate) fn load_id_event(txn: &WriteTransaction, fid: Fid) -> HubResult<Option<IdRegistryEvent>> {
    let table = txn.open_table(ID_REGISTRY_TABLE)?;
    let result = match table.get(fid)? {
        Some(v) => Some(postcard::from_bytes(v.value())?),
        None => None,
    };
    Ok(result)
}

pub(crate) fn put_id_event(txn: &WriteTransaction, event: &IdRegistryEvent) -> HubResult<()> {
    let bytes = postcard::to_allocvec(event)?;
    let mut table = txn.open_table(ID_REGISTRY_TABLE)?;
    table.insert(event.fid, bytes.as_slice())?;
    Ok(())
}

pub(crate) fn load_name_event(
    txn: &WriteTransaction,
    fname: &[u8],
) -> HubResult<Option<NameRegistryEvent>> {
    let table = txn.open_table(NAME_REGISTRY_TABLE)?;
    let result = match table.get(fname)? {
        Some(v) => Some(postcard::from_bytes(v.value())?),
        None => None,
    };
    Ok(result)
}

pub(crate) fn put_name_event(txn: &WriteTransaction, event: &NameRegistryEvent) -> HubResult<()> {
    let bytes = postcard::to_allocvec(event)?;
    let mut table = txn.open_table(NAME_REGISTRY_TABLE)?;
    table.insert(event.fname.as_slice(), bytes.as_slice())?;
    Ok(())
}

impl Storage {
    pub fn id_registry_event(&self, fid: Fid) -> HubResult<Option<IdRegistryEvent>> {
        self.read(|txn| {
            let table = txn.open_table(ID_REGISTRY_TABLE)?;
            match table.get(fid)? {
                Some(v) => Ok(Some(postcard::from_bytes(v.value())?)),
                None => Ok(None),
            }
        })
    }

    pub fn name_registry_event(&self, fname: &[u8]) -> HubResult<Option<NameRegistryEvent>> {
        self.read(|txn| {
            let table = txn.open_table(NAME_REGISTRY_TABLE)?;
            match table.get(fname)? {
                Some(v) => Ok(Some(postcard::from_bytes(v.value())?)),
                None => Ok(None),
            }
        })
    }

    /// Every fid with a custody event, ascending
    pub fn fids(&self) -> HubResult<Vec<Fid>> {
        self.read(|txn| {
            let table = txn.open_table(ID_REGISTRY_TABLE)?;
            let mut fids = Vec::new();
            for entry in table.iter()? {
                let (k, _) = entry?;
                fids.push(k.value());
            }
            Ok(fids)
        })
    }
}
