//! RPC wire format
//!
//! Each frame is one postcard-encoded request or response, framed with a
//! 4-byte big-endian length prefix.

use serde::{Deserialize, Serialize};
use tokio_util::codec::LengthDelimitedCodec;

use crate::error::WireError;
use crate::types::{Fid, IdRegistryEvent, Message, NameRegistryEvent, SyncSnapshot};

/// Largest accepted frame
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

pub(crate) fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcRequest {
    SubmitMessage(Message),
    SubmitIdRegistryEvent(IdRegistryEvent),
    SubmitNameRegistryEvent(NameRegistryEvent),
    GetSyncSnapshot,
    /// Hashes of every message in the given snapshot shards
    GetMessageHashes { shards: Vec<u8> },
    GetMessages { hashes: Vec<Vec<u8>> },
    GetIdRegistryEvent { fid: Fid },
}

impl RpcRequest {
    pub fn name(&self) -> &'static str {
        match self {
            RpcRequest::SubmitMessage(_) => "submit_message",
            RpcRequest::SubmitIdRegistryEvent(_) => "submit_id_registry_event",
            RpcRequest::SubmitNameRegistryEvent(_) => "submit_name_registry_event",
            RpcRequest::GetSyncSnapshot => "get_sync_snapshot",
            RpcRequest::GetMessageHashes { .. } => "get_message_hashes",
            RpcRequest::GetMessages { .. } => "get_messages",
            RpcRequest::GetIdRegistryEvent { .. } => "get_id_registry_event",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcResponse {
    Ok,
    SyncSnapshot(SyncSnapshot),
    MessageHashes(Vec<Vec<u8>>),
    Messages(Vec<Message>),
    IdRegistryEvent(Option<IdRegistryEvent>),
    Error(WireError),
}
