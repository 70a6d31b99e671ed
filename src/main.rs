//! groupcached
//!
//! Runs one groupcache node: the peer protocol, the client cache routes and
//! the stats endpoints share a single listener.
//!
//! ```text
//! groupcached --listen 0.0.0.0:8080 --self-addr 10.0.0.1:8080 \
//!             --peers 10.0.0.1:8080,10.0.0.2:8080,10.0.0.3:8080 \
//!             --groups-file /etc/groupcache/groups.yaml
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use groupcache::config::GroupsFile;
use groupcache::error::Result;
use groupcache::{
    Cluster, GroupRegistry, HttpTransport, NodeServer, RingConfig, ServerState, TransportConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// groupcached - distributed read-through cache node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the HTTP server to
    #[arg(long, env = "GROUPCACHE_LISTEN", default_value = "0.0.0.0:8080")]
    listen: String,

    /// This node's address as peers reach it (host:port)
    #[arg(long, env = "GROUPCACHE_SELF_ADDR", default_value = "127.0.0.1:8080")]
    self_addr: String,

    /// Every node in the cluster, comma separated (host:port)
    #[arg(long, env = "GROUPCACHE_PEERS", value_delimiter = ',')]
    peers: Vec<String>,

    /// Ring positions per peer
    #[arg(long, env = "GROUPCACHE_VIRTUAL_REPLICAS", default_value = "50")]
    virtual_replicas: usize,

    /// Peer fetch timeout in milliseconds
    #[arg(long, env = "GROUPCACHE_FETCH_TIMEOUT_MS", default_value = "2000")]
    fetch_timeout_ms: u64,

    /// Removal broadcast timeout in milliseconds
    #[arg(long, env = "GROUPCACHE_BROADCAST_TIMEOUT_MS", default_value = "500")]
    broadcast_timeout_ms: u64,

    /// YAML file describing the groups to serve
    #[arg(long, env = "GROUPCACHE_GROUPS_FILE")]
    groups_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting groupcache node");
    info!("  Listen address: {}", args.listen);
    info!("  Self address: {}", args.self_addr);
    info!("  Virtual replicas: {}", args.virtual_replicas);
    info!("  Fetch timeout: {}ms", args.fetch_timeout_ms);

    let transport_config = TransportConfig {
        fetch_timeout: Duration::from_millis(args.fetch_timeout_ms),
        broadcast_timeout: Duration::from_millis(args.broadcast_timeout_ms),
        ..Default::default()
    };
    let ring_config = RingConfig {
        virtual_replicas: args.virtual_replicas,
    };

    let transport = Arc::new(HttpTransport::new(&transport_config)?);
    let cluster = Arc::new(Cluster::new(
        &args.self_addr,
        ring_config,
        transport_config,
        transport,
    )?);
    cluster.set_peers(&args.peers)?;
    info!("Cluster has {} peers", cluster.peers().len());

    let registry = Arc::new(GroupRegistry::new(Arc::clone(&cluster)));
    if let Some(path) = &args.groups_file {
        let configs = GroupsFile::load(path)?.into_configs()?;
        for config in configs {
            registry.add(config)?;
        }
        info!("Loaded {} groups from {}", registry.len(), path);
    } else {
        info!("No groups file given; serving no groups");
    }

    let server = NodeServer::bind(&args.listen, ServerState::new(registry)).await?;
    let shutdown = server.shutdown_token();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        shutdown.cancel();
    });

    server.run().await.map_err(|e| {
        error!("Node server error: {}", e);
        e
    })?;

    info!("Node shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
