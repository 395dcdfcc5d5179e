//! QuorumKV Proxy Binary
//!
//! Starts the routing proxy in front of a sharded backend cluster.

use std::sync::Arc;

use clap::Parser;
use quorumkv::network::Server;
use quorumkv::{Config, RouterHandle, ShardTable};
use tracing_subscriber::{fmt, EnvFilter};

/// QuorumKV Proxy
#[derive(Parser, Debug)]
#[command(name = "quorumkv-proxy")]
#[command(about = "Quorum routing proxy for sharded key-value clusters")]
#[command(version)]
struct Args {
    /// Listen address (host:port)
    #[arg(short, long, default_value = "0.0.0.0:7905")]
    listen: String,

    /// Number of shards (power of two)
    #[arg(short, long, default_value = "1")]
    shards: usize,

    /// Route entry `addr=shards`, shards in hex, `-` prefix marks a backup
    /// (e.g. `10.0.0.1:9000=0,1,-2`). Repeatable.
    #[arg(long = "route")]
    routes: Vec<String>,

    /// Backends serving every shard as primaries (comma separated);
    /// used when no --route is given
    #[arg(long, value_delimiter = ',')]
    hosts: Vec<String>,

    /// Main hosts per key
    #[arg(short = 'n', long, default_value = "3")]
    replicas: usize,

    /// Writes required
    #[arg(short = 'w', long, default_value = "2")]
    writes: usize,

    /// Reads required
    #[arg(short = 'r', long, default_value = "1")]
    reads: usize,

    /// Backend read deadline in milliseconds
    #[arg(long, default_value = "2000")]
    read_timeout_ms: u64,

    /// Backend write deadline in milliseconds
    #[arg(long, default_value = "2000")]
    write_timeout_ms: u64,

    /// Maximum concurrent client connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,
}

fn build_table(args: &Args) -> quorumkv::Result<ShardTable> {
    if args.routes.is_empty() {
        return ShardTable::uniform(&args.hosts, args.shards);
    }
    let mut table = ShardTable::new(args.shards);
    for entry in &args.routes {
        table.parse_route(entry)?;
    }
    Ok(table)
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,quorumkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("QuorumKV Proxy v{}", quorumkv::VERSION);
    tracing::info!("Listen address: {}", args.listen);
    tracing::info!(
        "Quorum N={} W={} R={} over {} shards",
        args.replicas,
        args.writes,
        args.reads,
        args.shards
    );

    let config = Config::builder()
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .quorum(args.replicas, args.writes, args.reads)
        .read_timeout_ms(args.read_timeout_ms)
        .write_timeout_ms(args.write_timeout_ms)
        .build();

    let table = match build_table(&args) {
        Ok(table) => table,
        Err(e) => {
            tracing::error!("Invalid shard table: {}", e);
            std::process::exit(1);
        }
    };

    let router = match RouterHandle::new(&table, config.clone()) {
        Ok(router) => Arc::new(router),
        Err(e) => {
            tracing::error!("Failed to start router: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Router initialized successfully");

    let mut server = Server::new(config, router);
    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
