//! Hub state singleton

use redb::{ReadableTable, TableDefinition};

use crate::error::HubResult;
use crate::types::HubState;

use super::Storage;

pub(crate) const HUB_STATE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("hub_state");

const HUB_STATE_KEY: &str = "hub_state";

impl Storage {
    /// Load the hub state, or the default if none was stored yet
    pub fn hub_state(&self) -> HubResult<HubState> {
        self.read(|txn| {
            let table = txn.open_table(HUB_STATE_TABLE)?;
            match table.get(HUB_STATE_KEY)? {
                Some(v) => Ok(postcard::from_bytes(v.value())?),
                None => Ok(HubState::default()),
            }
        })
    }

    pub fn put_hub_state(&self, state: &HubState) -> HubResult<()> {
        let bytes = postcard::to_allocvec(state)?;
        self.write(|txn| {
            let mut table = txn.open_table(HUB_STATE_TABLE)?;
            table.insert(HUB_STATE_KEY, bytes.as_slice())?;
            Ok(())
        })
    }
}
