//! Hub-to-hub RPC over TCP
//!
//! Peers use RPC to submit content directly and to pull what they are
//! missing during diff sync.

mod client;
pub mod protocol;
mod server;

pub use client::{RpcClient, RpcClientFactory, TcpRpcClient, TcpRpcClientFactory};
pub use protocol::{RpcRequest, RpcResponse, MAX_FRAME_LENGTH};
pub use server::{RpcHandler, RpcServer, TcpRpcServer};
