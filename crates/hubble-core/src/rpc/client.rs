//! TCP RPC client
//!
//! Clients connect lazily on first call and reconnect after a failed call.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

use crate::error::{HubError, HubResult};
use crate::types::{Fid, IdRegistryEvent, Message, SyncSnapshot};

use super::protocol::{codec, RpcRequest, RpcResponse};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Calls made against a peer hub
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Address this client dials
    fn address(&self) -> SocketAddr;

    async fn submit_message(&self, message: &Message) -> HubResult<()>;
    async fn get_sync_snapshot(&self) -> HubResult<SyncSnapshot>;
    async fn get_message_hashes(&self, shards: &[u8]) -> HubResult<Vec<Vec<u8>>>;
    async fn get_messages(&self, hashes: &[Vec<u8>]) -> HubResult<Vec<Message>>;
    async fn get_id_registry_event(&self, fid: Fid) -> HubResult<Option<IdRegistryEvent>>;
}

/// Builds clients for peer addresses
pub trait RpcClientFactory: Send + Sync {
    fn client(&self, addr: SocketAddr) -> Arc<dyn RpcClient>;
}

pub struct TcpRpcClient {
    addr: SocketAddr,
    timeout: Duration,
    conn: Mutex<Option<Framed<TcpStream, LengthDelimitedCodec>>>,
}

impl TcpRpcClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self::with_timeout(addr, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(addr: SocketAddr, timeout: Duration) -> Self {
        Self {
            addr,
            timeout,
            conn: Mutex::new(None),
        }
    }

    async fn exchange(
        &self,
        conn: &mut Option<Framed<TcpStream, LengthDelimitedCodec>>,
        frame: Bytes,
        name: &str,
    ) -> HubResult<RpcResponse> {
        if conn.is_none() {
            debug!(addr = %self.addr, "Connecting RPC client");
            let stream = TcpStream::connect(self.addr).await.map_err(|e| {
                HubError::network(format!("failed to connect to {}: {}", self.addr, e))
            })?;
            *conn = Some(Framed::new(stream, codec()));
        }
        let framed = conn
            .as_mut()
            .ok_or_else(|| HubError::network("connection missing"))?;
        framed
            .send(frame)
            .await
            .map_err(|e| HubError::network(format!("failed to send {}: {}", name, e)))?;
        match framed.next().await {
            Some(Ok(frame)) => Ok(postcard::from_bytes::<RpcResponse>(&frame)?),
            Some(Err(e)) => Err(HubError::network(format!("failed to read {}: {}", name, e))),
            None => Err(HubError::network(format!("connection closed during {}", name))),
        }
    }

    async fn call(&self, request: RpcRequest) -> HubResult<RpcResponse> {
        let name = request.name();
        let frame = Bytes::from(postcard::to_allocvec(&request)?);

        let mut conn = self.conn.lock().await;
        let result = match tokio::time::timeout(self.timeout, self.exchange(&mut conn, frame, name)).await {
            Ok(result) => result,
            Err(_) => Err(HubError::network(format!("{} timed out", name))),
        };

        if result.is_err() {
            // reconnect on the next call
            *conn = None;
        }
        match result? {
            RpcResponse::Error(e) => Err(e.into()),
            response => Ok(response),
        }
    }
}

fn unexpected(response: RpcResponse) -> HubError {
    HubError::new(
        crate::error::ErrorKind::Unknown,
        format!("unexpected rpc response: {:?}", response),
    )
}

#[async_trait]
impl RpcClient for TcpRpcClient {
    fn address(&self) -> SocketAddr {
        self.addr
    }

    async fn submit_message(&self, message: &Message) -> HubResult<()> {
        match self.call(RpcRequest::SubmitMessage(message.clone())).await? {
            RpcResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn get_sync_snapshot(&self) -> HubResult<SyncSnapshot> {
        match self.call(RpcRequest::GetSyncSnapshot).await? {
            RpcResponse::SyncSnapshot(snapshot) => Ok(snapshot),
            other => Err(unexpected(other)),
        }
    }

    async fn get_message_hashes(&self, shards: &[u8]) -> HubResult<Vec<Vec<u8>>> {
        let request = RpcRequest::GetMessageHashes {
            shards: shards.to_vec(),
        };
        match self.call(request).await? {
            RpcResponse::MessageHashes(hashes) => Ok(hashes),
            other => Err(unexpected(other)),
        }
    }

    async fn get_messages(&self, hashes: &[Vec<u8>]) -> HubResult<Vec<Message>> {
        let request = RpcRequest::GetMessages {
            hashes: hashes.to_vec(),
        };
        match self.call(request).await? {
            RpcResponse::Messages(messages) => Ok(messages),
            other => Err(unexpected(other)),
        }
    }

    async fn get_id_registry_event(&self, fid: Fid) -> HubResult<Option<IdRegistryEvent>> {
        match self.call(RpcRequest::GetIdRegistryEvent { fid }).await? {
            RpcResponse::IdRegistryEvent(event) => Ok(event),
            other => Err(unexpected(other)),
        }
    }
}

/// Factory for [`TcpRpcClient`]s
#[derive(Debug, Clone)]
pub struct TcpRpcClientFactory {
    timeout: Duration,
}

impl Default for TcpRpcClientFactory {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl TcpRpcClientFactory {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl RpcClientFactory for TcpRpcClientFactory {
    fn client(&self, addr: SocketAddr) -> Arc<dyn RpcClient> {
        Arc::new(TcpRpcClient::with_timeout(addr, self.timeout))
    }
}
