//! TCP RPC server

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, HubError, HubResult, WireError};

use super::protocol::{codec, RpcRequest, RpcResponse};

/// Serves decoded requests
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, request: RpcRequest) -> HubResult<RpcResponse>;
}

/// An RPC server the hub can start and stop
#[async_trait]
pub trait RpcServer: Send + Sync {
    /// Bind and serve; returns the bound address
    async fn start(&self, bind: SocketAddr, handler: Arc<dyn RpcHandler>) -> HubResult<SocketAddr>;
    async fn stop(&self) -> HubResult<()>;
    /// Bound address while running
    fn address(&self) -> Option<SocketAddr>;
}

struct Serving {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Length-delimited postcard frames over TCP
#[derive(Default)]
pub struct TcpRpcServer {
    serving: Mutex<Option<Serving>>,
    address: RwLock<Option<SocketAddr>>,
}

impl TcpRpcServer {
    pub fn new() -> Self {
        Self::default()
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn RpcHandler>,
    cancel: CancellationToken,
) {
    let mut framed = Framed::new(stream, codec());
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = framed.next() => frame,
        };
        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                debug!(%peer, error = %e, "RPC connection read failed");
                break;
            }
            None => break,
        };

        let response = match postcard::from_bytes::<RpcRequest>(&frame) {
            Ok(request) => {
                let name = request.name();
                match handler.handle(request).await {
                    Ok(response) => response,
                    Err(e) => {
                        debug!(%peer, request = name, code = e.code(), "RPC request failed");
                        RpcResponse::Error(WireError::from(&e))
                    }
                }
            }
            Err(e) => RpcResponse::Error(WireError {
                kind: ErrorKind::ParseFailure,
                message: format!("invalid request: {}", e),
            }),
        };

        let bytes = match postcard::to_allocvec(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%peer, error = %e, "Failed to encode RPC response");
                break;
            }
        };
        if let Err(e) = framed.send(Bytes::from(bytes)).await {
            debug!(%peer, error = %e, "RPC connection write failed");
            break;
        }
    }
}

/// Accept until cancelled, then wait for every connection to finish its
/// in-flight request
async fn accept_loop(listener: TcpListener, handler: Arc<dyn RpcHandler>, cancel: CancellationToken) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "Accepted RPC connection");
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        handler.clone(),
                        cancel.child_token(),
                    ));
                }
                Err(e) => warn!(error = %e, "Failed to accept RPC connection"),
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "RPC connection task failed");
                }
            }
        }
    }

    drop(listener);
    let open = connections.len();
    if open > 0 {
        debug!(open, "Draining RPC connections");
    }
    while let Some(joined) = connections.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "RPC connection task failed");
        }
    }
}

#[async_trait]
impl RpcServer for TcpRpcServer {
    async fn start(&self, bind: SocketAddr, handler: Arc<dyn RpcHandler>) -> HubResult<SocketAddr> {
        let mut serving = self.serving.lock().await;
        if serving.is_some() {
            return Err(HubError::new(
                ErrorKind::BadRequest,
                "rpc server already started",
            ));
        }

        let listener = TcpListener::bind(bind).await?;
        let address = listener.local_addr()?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(accept_loop(listener, handler, cancel.clone()));

        info!(%address, "RPC server listening");
        *self.address.write() = Some(address);
        *serving = Some(Serving { cancel, task });
        Ok(address)
    }

    /// Stops accepting and returns once no request is being handled
    async fn stop(&self) -> HubResult<()> {
        let Some(serving) = self.serving.lock().await.take() else {
            return Ok(());
        };
        serving.cancel.cancel();
        let _ = serving.task.await;
        *self.address.write() = None;
        info!("RPC server stopped");
        Ok(())
    }

    fn address(&self) -> Option<SocketAddr> {
        *self.address.read()
    }
}
