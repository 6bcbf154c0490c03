//! CQL Discovery
//!
//! Runs topology discovery against a cluster described by a TOML fixture and
//! prints the resulting topology as JSON.
//!
//! The fixture is re-read on every query, so editing it while the tool runs
//! simulates nodes joining, leaving or moving between datacenters.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use cql_discovery::connection::AdminConnection;
use cql_discovery::fixture::{StaticClusterConnection, StaticConnectionProvider};
use cql_discovery::host::DefaultHostFactory;
use cql_discovery::metrics::DiscoveryMetrics;
use cql_discovery::policy::DcAwareRoundRobinPolicy;
use cql_discovery::{
    ControlConnection, DefaultDiscoveryPolicy, DiscoveryConfig, DiscoveryContext, DiscoveryPolicy,
    Host, HostRegistry,
};

/// CQL Discovery - cluster topology from the system tables
#[derive(Parser, Debug)]
#[command(name = "cql-discovery")]
#[command(version)]
#[command(about = "Discover the topology of a CQL cluster", long_about = None)]
struct Args {
    /// Cluster description served as system.local / system.peers
    #[arg(short, long)]
    fixture: PathBuf,

    /// Path to configuration file
    #[arg(short, long, default_value = "discovery.toml")]
    config: PathBuf,

    /// Print the topology once and exit
    #[arg(long)]
    once: bool,

    /// Refresh interval in seconds (overrides the config file)
    #[arg(long)]
    interval: Option<u64>,

    /// Local datacenter (overrides the config file)
    #[arg(long)]
    local_dc: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("CQL Discovery v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = if args.config.exists() {
        DiscoveryConfig::load(&args.config)?
    } else {
        warn!("Config file not found, using defaults");
        DiscoveryConfig::default()
    };

    let mut config = config.with_local_datacenter(args.local_dc);
    if let Some(interval) = args.interval {
        config = config.with_refresh_interval_secs(interval);
    }
    config.validate()?;

    info!("Configuration:");
    info!("   Native port: {}", config.native_port);
    info!("   Refresh interval: {}s", config.refresh_interval_secs);
    info!("   Address translations: {}", config.address_translation.len());

    let config = Arc::new(config);

    // Administrative connection backed by the fixture
    let connection = Arc::new(StaticClusterConnection::load(&args.fixture)?);
    connection.watch(&args.fixture);
    info!("Connected to {} ({:?})", connection.address(), args.fixture);

    let registry = Arc::new(HostRegistry::new());
    registry.add_if_absent(Arc::new(Host::new(connection.address())));

    let metrics = Arc::new(DiscoveryMetrics::new());
    let load_balancing = Arc::new(DcAwareRoundRobinPolicy::new(
        config.local_datacenter.clone(),
        config.used_hosts_per_remote_dc,
    ));

    let engine = Arc::new(DefaultDiscoveryPolicy::new());
    engine.init(DiscoveryContext {
        connections: Arc::new(StaticConnectionProvider::new(connection.clone())),
        registry: registry.clone(),
        translator: config.address_translator()?,
        load_balancing: load_balancing.clone(),
        protocol: config.protocol_options(),
        metrics: metrics.clone(),
    });

    let control = ControlConnection::new(
        engine.clone(),
        registry,
        load_balancing,
        Arc::new(DefaultHostFactory),
        config.clone(),
        metrics.clone(),
    );

    let status = control.refresh_topology().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    if !args.once {
        info!("Press Ctrl+C to stop");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
            }
            _ = control.run_periodic_refresh(config.refresh_interval()) => {}
        }

        if let Some(status) = control.status() {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    engine.close();
    eprint!("{}", metrics.to_prometheus());

    info!("CQL Discovery shutting down");
    Ok(())
}
