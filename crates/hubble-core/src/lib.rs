//! Hubble Core Library
//!
//! Coordination layer of a hub: submissions from clients, peers and the
//! chain are merged into a local store, gossiped to peers, reconciled with
//! diff sync and followed up by durable background jobs.
//!
//! ## Overview
//!
//! ```text
//! ┌──────────────┐   gossip    ┌──────────────┐   rpc    ┌──────────────┐
//! │  Transport   │ ──────────► │     Hub      │ ◄──────► │  RpcServer   │
//! │ (iroh-gossip)│ ◄────────── │  (Submitter) │          │   (tcp)      │
//! └──────────────┘             └──────┬───────┘          └──────────────┘
//!                                     │
//!              ┌──────────────────────┼──────────────────────┐
//!              ▼                      ▼                      ▼
//!       ┌────────────┐        ┌──────────────┐       ┌──────────────┐
//!       │   Store    │ ◄───── │ SnapshotSync │       │ JobScheduler │
//!       │  (redb)    │        │ (diff sync)  │       │ (cron/timer) │
//!       └────────────┘        └──────────────┘       └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use hubble_core::{Hub, HubDeps, HubOptions};
//!
//! let hub = Hub::new(HubOptions::default(), deps)?;
//! hub.start().await?;
//! println!("peer id: {}", hub.identity()?);
//! hub.stop().await?;
//! ```

pub mod chain;
pub mod config;
pub mod error;
pub mod hub;
pub mod ip;
pub mod jobs;
pub mod logging;
pub mod network;
pub mod router;
pub mod rpc;
pub mod storage;
pub mod store;
pub mod sync;
pub mod timer;
pub mod types;

// Re-exports
pub use chain::{ChainEvent, ChainEventProvider, ChainFeed, ChannelEventProvider};
pub use config::HubOptions;
pub use error::{ErrorKind, HubError, HubResult};
pub use hub::{Hub, HubDeps};
pub use ip::{HttpIpDiscovery, IpDiscovery};
pub use network::{GossipEnvelope, GossipNode, GossipPayload, NetworkEvent, PeerAddr, Transport};
pub use router::GossipRouter;
pub use rpc::{RpcClient, RpcClientFactory, RpcServer, TcpRpcClientFactory, TcpRpcServer};
pub use storage::Storage;
pub use store::{Store, StoreEngine, StoreEvent};
pub use sync::{SnapshotSync, SyncService};
pub use timer::TimerHandle;
pub use types::*;
