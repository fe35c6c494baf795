//! Hubble node
//!
//! ## Usage
//!
//! ```bash
//! # Generate a peer identity
//! hubble identity create
//!
//! # Print the default configuration
//! hubble config
//!
//! # Run a node
//! hubble start --network testnet --rpc-port 2283 --bootstrap <peer-hex>@1.2.3.4:2282
//!
//! # Run a node from a config file, with JSONL logs
//! hubble start --config hub.json --log-dir ./logs
//! ```

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use hubble_core::logging::{init_logging, LogOptions};
use hubble_core::{
    ChannelEventProvider, GossipNode, HttpIpDiscovery, Hub, HubDeps, HubOptions, Network,
    SnapshotSync, Storage, Store, StoreEngine, TcpRpcClientFactory, TcpRpcServer,
};

/// Hubble - a node of the social graph network
#[derive(Parser)]
#[command(name = "hubble")]
#[command(version = "0.1.0")]
#[command(about = "Hubble - gossip, diff sync and registry ingestion")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the hub and run until Ctrl+C
    Start(StartArgs),

    /// Identity management
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },

    /// Print the effective configuration as JSON
    Config {
        /// Config file to load (default: <config dir>/hubble/config.json if present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum IdentityAction {
    /// Generate a new peer secret key
    Create {
        /// Print as a JSON config fragment
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args)]
struct StartArgs {
    /// Config file to load (default: <config dir>/hubble/config.json if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// mainnet, testnet or devnet
    #[arg(long)]
    network: Option<Network>,

    /// Hex secret key of the peer identity
    #[arg(long)]
    secret_key: Option<String>,

    /// Bootstrap peer as <peer-hex>@<ip>:<port> (repeatable)
    #[arg(short, long)]
    bootstrap: Vec<String>,

    /// Only accept gossip from this peer (repeatable)
    #[arg(long)]
    allowed_peer: Vec<String>,

    #[arg(long)]
    bind_ip: Option<IpAddr>,

    /// Address announced to peers (discovered when unset)
    #[arg(long)]
    announce_ip: Option<IpAddr>,

    #[arg(long)]
    gossip_port: Option<u16>,

    #[arg(long)]
    rpc_port: Option<u16>,

    /// Database file (a throwaway one in the temp dir when unset)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Wipe the database on start
    #[arg(long)]
    reset_db: bool,

    /// Plain-text public ip echo service
    #[arg(long)]
    ip_service_url: Option<String>,

    /// Directory for per-node JSONL logs
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn log_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Default config location (~/.config/hubble/config.json on linux)
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("hubble").join("config.json"))
}

fn load_options(config: Option<&PathBuf>) -> Result<HubOptions> {
    match config {
        Some(path) => HubOptions::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => HubOptions::load(&path)
                .with_context(|| format!("Failed to load config {}", path.display())),
            None => Ok(HubOptions::default()),
        },
    }
}

impl StartArgs {
    fn apply(self, options: &mut HubOptions) {
        if let Some(network) = self.network {
            options.network = network;
        }
        if let Some(key) = self.secret_key {
            options.peer_secret_key = Some(key);
        }
        if !self.bootstrap.is_empty() {
            options.bootstrap_addrs = self.bootstrap;
        }
        if !self.allowed_peer.is_empty() {
            options.allowed_peers = Some(self.allowed_peer);
        }
        if let Some(ip) = self.bind_ip {
            options.bind_ip = ip;
        }
        if let Some(ip) = self.announce_ip {
            options.announce_ip = Some(ip);
        }
        if let Some(port) = self.gossip_port {
            options.gossip_port = port;
        }
        if let Some(port) = self.rpc_port {
            options.rpc_port = port;
        }
        if let Some(path) = self.db_path {
            options.db_path = Some(path);
        }
        if self.reset_db {
            options.reset_db = true;
        }
    }
}

async fn start(args: StartArgs, verbosity: u8) -> Result<()> {
    let mut options = load_options(args.config.as_ref())?;
    let log_dir = args.log_dir.clone();
    let ip_service_url = args.ip_service_url.clone();
    args.apply(&mut options);

    init_logging(&LogOptions {
        filter: Some(log_filter(verbosity).to_string()),
        jsonl_dir: log_dir,
        node: format!("hub-{}", options.rpc_port),
    })
    .map_err(|e| anyhow::anyhow!(e))
    .context("Failed to initialize logging")?;

    let db_path = options.db_path_or_random();
    let store: Arc<dyn Store> = Arc::new(StoreEngine::new(Storage::new(&db_path), options.network));
    // keep the feed alive: dropping it ends the provider's event loop
    let (chain, _chain_feed) = ChannelEventProvider::new(store.clone());
    info!("No chain ingester attached; registry events arrive over gossip and rpc");
    let ip_discovery = match ip_service_url {
        Some(url) => HttpIpDiscovery::new(url),
        None => HttpIpDiscovery::default(),
    };

    let hub = Hub::new(
        options,
        HubDeps {
            store: store.clone(),
            sync: Arc::new(SnapshotSync::new(store)),
            transport: Arc::new(GossipNode::new()),
            rpc_server: Arc::new(TcpRpcServer::new()),
            rpc_clients: Arc::new(TcpRpcClientFactory::default()),
            chain: Arc::new(chain),
            ip_discovery: Arc::new(ip_discovery),
        },
    )?;

    hub.start().await.context("Failed to start hub")?;

    info!(
        peer = %hex::encode(hub.identity()?.as_bytes()),
        rpc = ?hub.rpc_address(),
        gossip = ?hub.gossip_addresses(),
        db = %db_path.display(),
        "Hubble is running, press Ctrl+C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    hub.stop().await.context("Hub did not stop cleanly")?;
    info!("Hubble stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => start(args, cli.verbose).await?,

        Commands::Identity { action } => match action {
            IdentityAction::Create { json } => {
                let key = iroh::SecretKey::generate(&mut rand::rng());
                let secret = hex::encode(key.to_bytes());
                let peer = hex::encode(key.public().as_bytes());
                if json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&serde_json::json!({
                            "peer_secret_key": secret,
                            "peer_id": peer,
                        }))?
                    );
                } else {
                    println!("Secret key: {}", secret);
                    println!("Peer ID:    {}", peer);
                }
            }
        },

        Commands::Config { config } => {
            let options = load_options(config.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&options)?);
        }
    }

    Ok(())
}
