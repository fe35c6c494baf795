//! Submission requests and their sources

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HubResult;

use super::{IdRegistryEvent, Message, NameRegistryEvent};

/// Where a submission came from, recorded for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmitSource {
    Gossip,
    Rpc,
    ChainProvider,
}

impl SubmitSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitSource::Gossip => "gossip",
            SubmitSource::Rpc => "rpc",
            SubmitSource::ChainProvider => "eth-provider",
        }
    }
}

impl std::fmt::Display for SubmitSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound item for the hub's submission API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionRequest {
    Message {
        message: Message,
        source: SubmitSource,
    },
    IdRegistryEvent {
        event: IdRegistryEvent,
        source: SubmitSource,
    },
    NameRegistryEvent {
        event: NameRegistryEvent,
        source: SubmitSource,
    },
}

impl SubmissionRequest {
    pub fn source(&self) -> SubmitSource {
        match self {
            SubmissionRequest::Message { source, .. }
            | SubmissionRequest::IdRegistryEvent { source, .. }
            | SubmissionRequest::NameRegistryEvent { source, .. } => *source,
        }
    }
}

/// The hub's submission API
///
/// Every source (gossip, RPC, chain feed, sync) feeds content through this
/// trait. Implementations never panic; failures come back as the result.
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit_message(&self, message: Message, source: SubmitSource) -> HubResult<()>;

    async fn submit_id_registry_event(
        &self,
        event: IdRegistryEvent,
        source: SubmitSource,
    ) -> HubResult<()>;

    async fn submit_name_registry_event(
        &self,
        event: NameRegistryEvent,
        source: SubmitSource,
    ) -> HubResult<()>;

    /// Dispatch a request to the matching operation
    async fn submit(&self, request: SubmissionRequest) -> HubResult<()> {
        match request {
            SubmissionRequest::Message { message, source } => {
                self.submit_message(message, source).await
            }
            SubmissionRequest::IdRegistryEvent { event, source } => {
                self.submit_id_registry_event(event, source).await
            }
            SubmissionRequest::NameRegistryEvent { event, source } => {
                self.submit_name_registry_event(event, source).await
            }
        }
    }
}
