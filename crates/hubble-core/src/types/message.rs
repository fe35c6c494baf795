//! User messages
//!
//! A message is identified by its hash: the first [`MESSAGE_HASH_LENGTH`]
//! bytes of blake3 over the postcard encoding of its data. Signature checks
//! belong to whoever produced the message; the store only checks the hash.

use serde::{Deserialize, Serialize};

use super::{Fid, Network};

/// Length of a message hash in bytes
pub const MESSAGE_HASH_LENGTH: usize = 20;

/// Kind of a message, derived from its body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    CastAdd,
    CastRemove,
    SignerAdd,
    SignerRemove,
}

impl MessageType {
    pub fn name(&self) -> &'static str {
        match self {
            MessageType::CastAdd => "CastAdd",
            MessageType::CastRemove => "CastRemove",
            MessageType::SignerAdd => "SignerAdd",
            MessageType::SignerRemove => "SignerRemove",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    CastAdd { text: String },
    CastRemove { target_hash: Vec<u8> },
    SignerAdd { signer: Vec<u8> },
    SignerRemove { signer: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageData {
    pub fid: Fid,
    pub network: Network,
    /// Seconds since the network epoch
    pub timestamp: u32,
    pub body: MessageBody,
}

impl MessageData {
    pub fn message_type(&self) -> MessageType {
        match self.body {
            MessageBody::CastAdd { .. } => MessageType::CastAdd,
            MessageBody::CastRemove { .. } => MessageType::CastRemove,
            MessageBody::SignerAdd { .. } => MessageType::SignerAdd,
            MessageBody::SignerRemove { .. } => MessageType::SignerRemove,
        }
    }

    /// Compute the content hash of this data
    pub fn hash(&self) -> Vec<u8> {
        // postcard never fails for these plain types
        let encoded = postcard::to_allocvec(self).unwrap_or_default();
        blake3::hash(&encoded).as_bytes()[..MESSAGE_HASH_LENGTH].to_vec()
    }
}

/// A user message as gossiped and stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub data: MessageData,
    pub hash: Vec<u8>,
    /// Key (or custody address) that signed the message
    pub signer: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Message {
    /// Build a message, computing its hash
    pub fn new(data: MessageData, signer: Vec<u8>, signature: Vec<u8>) -> Self {
        let hash = data.hash();
        Self {
            data,
            hash,
            signer,
            signature,
        }
    }

    pub fn fid(&self) -> Fid {
        self.data.fid
    }

    pub fn message_type(&self) -> MessageType {
        self.data.message_type()
    }

    pub fn is_signer_remove(&self) -> bool {
        matches!(self.data.body, MessageBody::SignerRemove { .. })
    }

    pub fn is_signer_message(&self) -> bool {
        matches!(
            self.data.body,
            MessageBody::SignerAdd { .. } | MessageBody::SignerRemove { .. }
        )
    }

    /// Signer key carried in the body of SignerAdd / SignerRemove
    pub fn signer_body(&self) -> Option<&[u8]> {
        match &self.data.body {
            MessageBody::SignerAdd { signer } | MessageBody::SignerRemove { signer } => {
                Some(signer)
            }
            _ => None,
        }
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(&self.hash)
    }

    /// True when the stored hash matches the data
    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.data.hash()
    }
}
