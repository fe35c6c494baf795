//! The hub coordinator
//!
//! ## Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Hub                                                            │
//! │  ├── Submitter: submit_message / submit_*_registry_event        │
//! │  │   └── store merge -> log -> follow-up job                    │
//! │  ├── event loop                                                 │
//! │  │   ├── gossip envelope  -> GossipRouter (JoinSet task)        │
//! │  │   ├── peer connected   -> regossip contact info after delay  │
//! │  │   ├── peer disconnected-> drop cached rpc client             │
//! │  │   └── store event      -> revocation jobs for synced content │
//! │  └── schedulers: revoke signer, prune messages, name expiry     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Collaborators are passed in as [`HubDeps`], so tests can swap any of
//! them for an in-memory version.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::chain::ChainEventProvider;
use crate::config::HubOptions;
use crate::error::{HubError, HubResult};
use crate::ip::IpDiscovery;
use crate::jobs::{
    JobPayload, JobQueue, JobScheduler, NameExpiryJob, NameExpiryWorker, PruneMessagesWorker,
    RevokeSignerJob, RevokeSignerWorker,
};
use crate::network::{
    GossipEnvelope, NetworkEvent, PeerAddr, Topic, Transport, TransportOptions,
};
use crate::router::GossipRouter;
use crate::rpc::{RpcClientFactory, RpcHandler, RpcRequest, RpcResponse, RpcServer};
use crate::store::{Store, StoreEvent};
use crate::sync::{shard_of, ContactInfoExchange, PeerSyncResolver, SyncService};
use crate::timer::TimerHandle;
use crate::types::{
    ContactInfo, Fid, GossipAddressInfo, HubState, IdRegistryEvent, Message, NameRegistryEvent,
    PeerId, SubmitSource, Submitter,
};

/// Collaborators a hub is built from
pub struct HubDeps {
    pub store: Arc<dyn Store>,
    pub sync: Arc<dyn SyncService>,
    pub transport: Arc<dyn Transport>,
    pub rpc_server: Arc<dyn RpcServer>,
    pub rpc_clients: Arc<dyn RpcClientFactory>,
    pub chain: Arc<dyn ChainEventProvider>,
    pub ip_discovery: Arc<dyn IpDiscovery>,
}

struct HubInner {
    options: HubOptions,
    secret_key: Option<iroh::SecretKey>,
    bootstrap: Vec<PeerAddr>,
    allowed_peers: Option<Vec<PeerId>>,

    store: Arc<dyn Store>,
    sync: Arc<dyn SyncService>,
    transport: Arc<dyn Transport>,
    rpc_server: Arc<dyn RpcServer>,
    chain: Arc<dyn ChainEventProvider>,
    ip_discovery: Arc<dyn IpDiscovery>,

    resolver: Arc<PeerSyncResolver>,
    router: GossipRouter,
    revoke_queue: JobQueue<RevokeSignerJob>,
    name_expiry_queue: JobQueue<NameExpiryJob>,
    schedulers: Vec<JobScheduler>,

    announce_ip: RwLock<Option<IpAddr>>,
    /// Event loop; stopped before anything else
    event_loop: Mutex<Option<TimerHandle>>,
    /// Pending contact info regossips
    timers: Mutex<Vec<TimerHandle>>,
}

/// A running (or runnable) hub
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Validate `options` and wire the hub; nothing starts yet
    pub fn new(options: HubOptions, deps: HubDeps) -> HubResult<Self> {
        let secret_key = options.secret_key()?;
        let bootstrap = options.bootstrap_peers()?;
        let allowed_peers = options.allowed_peer_ids()?;
        let revoke_schedule = options.revoke_signer_schedule()?;
        let prune_schedule = options.prune_messages_schedule()?;
        let name_expiry_schedule = options.name_expiry_schedule()?;

        let storage = deps.store.storage();
        let revoke_queue = JobQueue::new(storage.clone(), options.revoke_delay());
        let name_expiry_queue = JobQueue::new(storage, std::time::Duration::ZERO);

        let resolver = Arc::new(PeerSyncResolver::new(deps.rpc_clients));
        let contact = Arc::new(ContactInfoExchange::new(
            deps.transport.clone(),
            resolver.clone(),
            deps.sync.clone(),
        ));
        let router = GossipRouter::new(resolver.clone(), deps.sync.clone(), contact);

        let schedulers = vec![
            JobScheduler::new(
                revoke_schedule,
                Arc::new(RevokeSignerWorker::new(
                    revoke_queue.clone(),
                    deps.store.clone(),
                )),
            ),
            JobScheduler::new(
                prune_schedule,
                Arc::new(PruneMessagesWorker::new(deps.store.clone())),
            ),
            JobScheduler::new(
                name_expiry_schedule,
                Arc::new(NameExpiryWorker::new(
                    name_expiry_queue.clone(),
                    deps.store.clone(),
                    deps.chain.clone(),
                )),
            ),
        ];

        Ok(Self {
            inner: Arc::new(HubInner {
                options,
                secret_key,
                bootstrap,
                allowed_peers,
                store: deps.store,
                sync: deps.sync,
                transport: deps.transport,
                rpc_server: deps.rpc_server,
                chain: deps.chain,
                ip_discovery: deps.ip_discovery,
                resolver,
                router,
                revoke_queue,
                name_expiry_queue,
                schedulers,
                announce_ip: RwLock::new(None),
                event_loop: Mutex::new(None),
                timers: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Bring every subsystem up, in dependency order
    ///
    /// The first failing step aborts the rest and is returned.
    pub async fn start(&self) -> HubResult<()> {
        let inner = &self.inner;

        let announce_ip = inner.resolve_announce_ip().await;
        *inner.announce_ip.write() = Some(announce_ip);

        inner.store.open().await?;
        if inner.options.reset_db {
            info!("Clearing database");
            inner.store.clear().await?;
        }

        inner.chain.start(inner.clone()).await?;
        // the transport starts exchanging snapshots right away
        inner.sync.initialize().await?;

        inner
            .transport
            .start(
                &inner.bootstrap,
                TransportOptions {
                    network: inner.options.network,
                    secret_key: inner.secret_key.clone(),
                    bind_addr: inner.options.gossip_bind_addr(),
                    allowed_peers: inner.allowed_peers.clone(),
                },
            )
            .await?;

        let handler: Arc<dyn RpcHandler> = Arc::new(HubRpcHandler { hub: inner.clone() });
        let rpc_address = inner
            .rpc_server
            .start(inner.options.rpc_bind_addr(), handler)
            .await?;

        // subscribe to events before joining topics so nothing is missed
        let network_events = inner.transport.events();
        let store_events = inner.store.subscribe();
        let hub = inner.clone();
        *inner.event_loop.lock() = Some(TimerHandle::spawn(move |cancel| {
            run_event_loop(hub, network_events, store_events, cancel)
        }));
        inner.transport.subscribe(Topic::Primary).await?;
        inner.transport.subscribe(Topic::Contact).await?;

        for scheduler in &inner.schedulers {
            scheduler.start();
        }

        info!(
            network = %inner.options.network,
            %announce_ip,
            rpc = %rpc_address,
            peer = ?inner.transport.peer_id(),
            "Hub started"
        );
        Ok(())
    }

    /// Tear everything down, continuing past failures
    ///
    /// Returns the first error after all steps ran.
    pub async fn stop(&self) -> HubResult<()> {
        let inner = &self.inner;

        let event_loop = inner.event_loop.lock().take();
        if let Some(handle) = event_loop {
            handle.shutdown().await;
        }
        let timers: Vec<TimerHandle> = inner.timers.lock().drain(..).collect();
        for timer in timers {
            timer.shutdown().await;
        }
        for scheduler in &inner.schedulers {
            scheduler.stop().await;
        }

        let mut first_error = None;
        record_stop("rpc server", inner.rpc_server.stop().await, &mut first_error);
        record_stop("transport", inner.transport.stop().await, &mut first_error);
        record_stop("sync", inner.sync.stop().await, &mut first_error);
        record_stop("chain provider", inner.chain.stop().await, &mut first_error);
        record_stop("store", inner.store.close().await, &mut first_error);
        inner.resolver.clear();

        match first_error {
            None => {
                info!("Hub stopped");
                Ok(())
            }
            Some(e) => Err(e),
        }
    }

    /// Our peer id; unavailable until the transport has started
    pub fn identity(&self) -> HubResult<PeerId> {
        self.inner
            .transport
            .peer_id()
            .ok_or_else(|| HubError::unavailable("hub identity is not available before start"))
    }

    pub fn rpc_address(&self) -> Option<SocketAddr> {
        self.inner.rpc_server.address()
    }

    pub fn gossip_addresses(&self) -> Vec<SocketAddr> {
        self.inner.transport.gossip_addresses()
    }

    /// What we announce to peers
    pub fn contact_info(&self) -> ContactInfo {
        self.inner.contact_info()
    }

    pub async fn hub_state(&self) -> HubResult<HubState> {
        self.inner.store.hub_state().await
    }

    pub async fn put_hub_state(&self, state: &HubState) -> HubResult<()> {
        self.inner.store.put_hub_state(state).await
    }

    pub async fn connect_address(&self, addr: &PeerAddr) -> HubResult<()> {
        self.inner.transport.connect_address(addr).await
    }

    /// Route one gossip envelope as if it came from the transport
    pub async fn handle_gossip_message(&self, envelope: GossipEnvelope) -> HubResult<()> {
        self.inner.router.handle(envelope, self.inner.as_ref()).await
    }

    /// Delete the database; for tests and throwaway instances
    pub async fn destroy_store(&self) -> HubResult<()> {
        self.inner.store.destroy().await
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn sync(&self) -> &Arc<dyn SyncService> {
        &self.inner.sync
    }

    pub fn resolver(&self) -> &Arc<PeerSyncResolver> {
        &self.inner.resolver
    }

    pub fn revoke_queue(&self) -> &JobQueue<RevokeSignerJob> {
        &self.inner.revoke_queue
    }

    pub fn name_expiry_queue(&self) -> &JobQueue<NameExpiryJob> {
        &self.inner.name_expiry_queue
    }

    /// Contact info regossips not yet fired
    pub fn pending_timers(&self) -> usize {
        let mut timers = self.inner.timers.lock();
        timers.retain(|t| !t.is_finished());
        timers.len()
    }
}

#[async_trait]
impl Submitter for Hub {
    async fn submit_message(&self, message: Message, source: SubmitSource) -> HubResult<()> {
        self.inner.submit_message(message, source).await
    }

    async fn submit_id_registry_event(
        &self,
        event: IdRegistryEvent,
        source: SubmitSource,
    ) -> HubResult<()> {
        self.inner.submit_id_registry_event(event, source).await
    }

    async fn submit_name_registry_event(
        &self,
        event: NameRegistryEvent,
        source: SubmitSource,
    ) -> HubResult<()> {
        self.inner.submit_name_registry_event(event, source).await
    }
}

fn record_stop(step: &'static str, result: HubResult<()>, first_error: &mut Option<HubError>) {
    if let Err(e) = result {
        error!(step, code = e.code(), error = %e, "Failed to stop");
        first_error.get_or_insert(e);
    }
}

impl HubInner {
    async fn resolve_announce_ip(&self) -> IpAddr {
        if let Some(ip) = self.options.announce_ip {
            return ip;
        }
        match self.ip_discovery.public_ip().await {
            Ok(ip) => {
                info!(%ip, "Discovered public ip");
                ip
            }
            Err(e) => {
                warn!(code = e.code(), error = %e, fallback = %self.options.bind_ip, "Public ip discovery failed, announcing bind ip");
                self.options.bind_ip
            }
        }
    }

    fn contact_info(&self) -> ContactInfo {
        let ip = self.announce_ip.read().unwrap_or(self.options.bind_ip);
        let gossip_port = self
            .transport
            .gossip_addresses()
            .iter()
            .find(|a| a.is_ipv4() == ip.is_ipv4())
            .map(|a| a.port())
            .unwrap_or(self.options.gossip_port);
        let rpc_port = self
            .rpc_server
            .address()
            .map(|a| a.port())
            .unwrap_or(self.options.rpc_port);
        let snapshot = self.sync.snapshot();

        ContactInfo {
            gossip_address: Some(GossipAddressInfo::from_socket_addr(SocketAddr::new(
                ip,
                gossip_port,
            ))),
            rpc_address: Some(GossipAddressInfo::from_socket_addr(SocketAddr::new(
                ip, rpc_port,
            ))),
            excluded_hashes: snapshot.excluded_hashes,
            count: snapshot.num_messages,
        }
    }

    fn enqueue_revoke(&self, fid: Fid, signer: &[u8]) {
        let job = RevokeSignerJob {
            fid,
            signer: signer.to_vec(),
        };
        match self.revoke_queue.enqueue_job(&job) {
            Ok(true) => info!(fid, signer = %hex::encode(signer), "Scheduled signer revocation"),
            Ok(false) => debug!(fid, signer = %hex::encode(signer), "Signer revocation already pending"),
            Err(e) => error!(fid, code = e.code(), error = %e, "Failed to schedule signer revocation"),
        }
    }

    fn enqueue_name_expiry(&self, fname: &[u8]) {
        let job = NameExpiryJob {
            fname: fname.to_vec(),
        };
        match self.name_expiry_queue.enqueue_job(&job) {
            Ok(true) => info!(fname = %job.dedup_key(), "Scheduled name expiry refresh"),
            Ok(false) => debug!(fname = %job.dedup_key(), "Name expiry refresh already pending"),
            Err(e) => error!(code = e.code(), error = %e, "Failed to schedule name expiry refresh"),
        }
    }

    async fn handle_gossip(&self, envelope: GossipEnvelope) {
        let kind = envelope.kind();
        match self.router.handle(envelope, self).await {
            Ok(()) => debug!(kind, "Handled gossip message"),
            Err(e) => warn!(kind, code = e.code(), error = %e, "Gossip message rejected"),
        }
    }

    fn on_peer_connected(self: &Arc<Self>, peer: PeerId) {
        info!(%peer, "Peer connected");
        let hub = self.clone();
        let timer = TimerHandle::spawn_delayed(self.options.contact_regossip_delay(), async move {
            let info = hub.contact_info();
            match hub.transport.gossip_contact_info(&info).await {
                Ok(()) => debug!(%peer, "Gossiped contact info"),
                Err(e) => warn!(%peer, code = e.code(), error = %e, "Failed to gossip contact info"),
            }
        });

        let mut timers = self.timers.lock();
        timers.retain(|t| !t.is_finished());
        timers.push(timer);
    }

    fn on_peer_disconnected(&self, peer: PeerId) {
        if self.resolver.remove(&peer).is_some() {
            info!(%peer, "Peer disconnected, dropped its rpc client");
        } else {
            info!(%peer, "Peer disconnected");
        }
    }

    /// Content merged by sync bypasses the submission API; catch its
    /// revocations here
    fn on_store_event(&self, event: StoreEvent) {
        match event {
            StoreEvent::MessageMerged { message, .. } if message.is_signer_remove() => {
                if let Some(signer) = message.signer_body() {
                    self.enqueue_revoke(message.fid(), signer);
                }
            }
            StoreEvent::IdRegistryEventMerged(event) => {
                if let Some(origin) = event.origin_address() {
                    self.enqueue_revoke(event.fid, origin);
                }
            }
            _ => {}
        }
    }
}

#[async_trait]
impl Submitter for HubInner {
    async fn submit_message(&self, message: Message, source: SubmitSource) -> HubResult<()> {
        let span = info_span!("submit_message", %source, fid = message.fid());
        async move {
            let result = self.store.merge_message(&message).await;
            match &result {
                Ok(()) => {
                    info!(fid = message.fid(), hash = %message.hash_hex(), kind = %message.message_type(), "Merged message");
                    if message.is_signer_remove() {
                        if let Some(signer) = message.signer_body() {
                            self.enqueue_revoke(message.fid(), signer);
                        }
                    }
                    if source == SubmitSource::Rpc {
                        if let Err(e) = self.transport.gossip_message(&message).await {
                            warn!(hash = %message.hash_hex(), code = e.code(), error = %e, "Failed to gossip message");
                        }
                    }
                }
                Err(e) => {
                    error!(fid = message.fid(), hash = %message.hash_hex(), code = e.code(), error = %e, "Failed to merge message");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn submit_id_registry_event(
        &self,
        event: IdRegistryEvent,
        source: SubmitSource,
    ) -> HubResult<()> {
        let span = info_span!("submit_id_registry_event", %source, fid = event.fid);
        async move {
            let result = self.store.merge_id_registry_event(&event).await;
            match &result {
                Ok(()) => {
                    info!(fid = event.fid, custody = %hex::encode(&event.to), block = event.block_number, "Merged id registry event");
                    if let Some(origin) = event.origin_address() {
                        self.enqueue_revoke(event.fid, origin);
                    }
                }
                Err(e) => {
                    error!(fid = event.fid, code = e.code(), error = %e, "Failed to merge id registry event");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn submit_name_registry_event(
        &self,
        event: NameRegistryEvent,
        source: SubmitSource,
    ) -> HubResult<()> {
        let span = info_span!("submit_name_registry_event", %source, fname = %event.fname_str());
        async move {
            let result = self.store.merge_name_registry_event(&event).await;
            match &result {
                Ok(()) => info!(fname = %event.fname_str(), block = event.block_number, "Merged name registry event"),
                Err(e) => error!(fname = %event.fname_str(), code = e.code(), error = %e, "Failed to merge name registry event"),
            }
            // the expiry must be resolved whatever the merge said
            if event.expiry.is_none() {
                self.enqueue_name_expiry(&event.fname);
            }
            result
        }
        .instrument(span)
        .await
    }
}

async fn run_event_loop(
    hub: Arc<HubInner>,
    mut network_events: broadcast::Receiver<NetworkEvent>,
    mut store_events: broadcast::Receiver<StoreEvent>,
    cancel: CancellationToken,
) {
    let mut handlers = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = network_events.recv() => match event {
                Ok(NetworkEvent::Message(Ok(envelope))) => {
                    let hub = hub.clone();
                    handlers.spawn(async move { hub.handle_gossip(envelope).await });
                }
                Ok(NetworkEvent::Message(Err(e))) => {
                    debug!(code = e.code(), error = %e, "Dropping undecodable gossip message");
                }
                Ok(NetworkEvent::PeerConnected(peer)) => hub.on_peer_connected(peer),
                Ok(NetworkEvent::PeerDisconnected(peer)) => hub.on_peer_disconnected(peer),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Network events lagged"),
                Err(RecvError::Closed) => break,
            },
            event = store_events.recv() => match event {
                Ok(event) => hub.on_store_event(event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Store events lagged"),
                Err(RecvError::Closed) => break,
            },
            Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "Gossip handler task failed");
                }
            }
        }
    }
    handlers.shutdown().await;
    debug!("Hub event loop stopped");
}

/// Serves peer and client RPC against the hub
struct HubRpcHandler {
    hub: Arc<HubInner>,
}

#[async_trait]
impl RpcHandler for HubRpcHandler {
    async fn handle(&self, request: RpcRequest) -> HubResult<RpcResponse> {
        let hub = &self.hub;
        match request {
            RpcRequest::SubmitMessage(message) => {
                hub.submit_message(message, SubmitSource::Rpc).await?;
                Ok(RpcResponse::Ok)
            }
            RpcRequest::SubmitIdRegistryEvent(event) => {
                hub.submit_id_registry_event(event, SubmitSource::Rpc).await?;
                Ok(RpcResponse::Ok)
            }
            RpcRequest::SubmitNameRegistryEvent(event) => {
                hub.submit_name_registry_event(event, SubmitSource::Rpc).await?;
                Ok(RpcResponse::Ok)
            }
            RpcRequest::GetSyncSnapshot => Ok(RpcResponse::SyncSnapshot(hub.sync.snapshot())),
            RpcRequest::GetMessageHashes { shards } => {
                let hashes = hub
                    .store
                    .message_hashes()
                    .await?
                    .into_iter()
                    .filter(|h| shards.contains(&shard_of(h)))
                    .collect();
                Ok(RpcResponse::MessageHashes(hashes))
            }
            RpcRequest::GetMessages { hashes } => Ok(RpcResponse::Messages(
                hub.store.messages_by_hashes(&hashes).await?,
            )),
            RpcRequest::GetIdRegistryEvent { fid } => Ok(RpcResponse::IdRegistryEvent(
                hub.store.id_registry_event(fid).await?,
            )),
        }
    }
}
