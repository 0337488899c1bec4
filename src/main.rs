use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use hive::config::{NodeConfig, RunPolicyKind, StoreConfig};
use hive::engine::Engine;
use hive::shutdown::install_shutdown_handler;
use hive::store::{KeyValueStore, RedisStore};

#[derive(Parser, Debug)]
#[command(name = "hive")]
#[command(version)]
#[command(about = "Self-organizing container cluster coordinator")]
struct Args {
    /// Node name (default: hostname)
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Address other nodes use to reach this one
    /// (default: resolved from the node name)
    #[arg(short = 'l', long)]
    listen: Option<String>,

    /// Listen port
    #[arg(short = 'p', long, default_value = "4500")]
    port: u16,

    /// Zone for node
    #[arg(short = 'z', long, default_value = "default")]
    zone: String,

    /// Run policy: random (default) or unique
    #[arg(short = 'r', long, default_value = "default")]
    run_policy: RunPolicyKind,

    /// Path to the container daemon socket
    #[arg(long, default_value = "/var/run/docker.sock")]
    docker: PathBuf,

    /// Redis hostname
    #[arg(long, default_value = "localhost")]
    redis_host: String,

    /// Redis port
    #[arg(long, default_value = "6379")]
    redis_port: u16,

    /// Redis password
    #[arg(long)]
    redis_password: Option<String>,

    /// Maximum concurrent store operations
    #[arg(long, default_value = "10")]
    pool_size: usize,

    /// Timeout for a single store operation in milliseconds
    #[arg(long, default_value = "2000")]
    store_timeout_ms: u64,

    /// Largest NumberOfInstances accepted for a container job
    #[arg(long, default_value = "1000")]
    max_instances: usize,
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| {
            tracing::warn!("Could not determine hostname, using localhost");
            "localhost".to_string()
        })
}

/// First non-loopback address the node name resolves to.
async fn resolve_advertise_host(name: &str) -> String {
    match tokio::net::lookup_host((name, 0)).await {
        Ok(addrs) => {
            let found = addrs
                .map(|addr: SocketAddr| addr.ip())
                .find(|ip: &IpAddr| !ip.is_loopback());
            match found {
                Some(ip) => ip.to_string(),
                None => {
                    tracing::warn!(
                        node = name,
                        "No non-loopback address found, advertising localhost"
                    );
                    "localhost".to_string()
                }
            }
        }
        Err(e) => {
            tracing::warn!(
                node = name,
                error = %e,
                "Failed to resolve node name, advertising localhost"
            );
            "localhost".to_string()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = hive::VERSION, "Docker Hive");

    let name = args.name.unwrap_or_else(hostname);
    let advertise_host = match args.listen.filter(|host| !host.is_empty()) {
        Some(host) => host,
        None => resolve_advertise_host(&name).await,
    };

    let store_config = StoreConfig {
        host: args.redis_host,
        port: args.redis_port,
        password: args.redis_password,
        pool_size: args.pool_size,
        op_timeout_ms: args.store_timeout_ms,
    };

    let mut config = NodeConfig::new(name, args.zone)
        .with_listen_addr(SocketAddr::from(([0, 0, 0, 0], args.port)))
        .with_advertise_host(advertise_host)
        .with_run_policy(args.run_policy)
        .with_max_instances(args.max_instances)
        .with_store(store_config);
    config.docker_socket = args.docker;
    config.validate()?;

    tracing::info!(
        host = %config.store.host,
        port = config.store.port,
        pool_size = config.store.pool_size,
        "Connecting to store"
    );
    let store: Arc<dyn KeyValueStore> = Arc::new(RedisStore::connect(&config.store).await?);

    let shutdown = install_shutdown_handler();
    let engine = Arc::new(Engine::new(config, store)?);
    engine.run(shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
