//! Control Connection
//!
//! Owns the host registry and keeps it in line with the cluster. Every
//! refresh runs one scan through the discovery policy, registers new hosts,
//! drops hosts that left and records a `TopologyStatus` snapshot.
//!
//! Scans are serialized: a refresh waits for the one in flight to finish.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DiscoveryConfig;
use crate::discovery::{DiscoveryInfo, DiscoveryPolicy};
use crate::error::DiscoveryError;
use crate::host::{Host, HostDistance, HostFactory, HostRegistry, HostState};
use crate::metrics::DiscoveryMetrics;
use crate::policy::LoadBalancingPolicy;
use crate::types::ScanPhase;

// =============================================================================
// TOPOLOGY STATUS
// =============================================================================

/// Per-host line of a topology status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStatus {
    pub address: SocketAddr,
    pub datacenter: Option<String>,
    pub rack: Option<String>,
    pub release_version: Option<String>,
    pub state: HostState,
    pub distance: HostDistance,
    pub tokens: usize,
}

impl HostStatus {
    fn of(host: &Host) -> Self {
        let meta = host.metadata();
        Self {
            address: host.address(),
            datacenter: meta.datacenter,
            rack: meta.rack,
            release_version: meta.release_version,
            state: host.state(),
            distance: host.distance(),
            tokens: meta.tokens.len(),
        }
    }
}

/// Cluster view after the last successful refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyStatus {
    pub cluster_name: Option<String>,
    pub partitioner: Option<String>,

    /// Hosts in the registry
    pub host_count: usize,

    /// Hosts with a token set
    pub token_owners: usize,

    /// Distinct schema versions reported by live hosts
    pub schema_versions: Vec<Uuid>,

    pub schema_agreement: bool,

    pub hosts: Vec<HostStatus>,

    pub last_refresh: DateTime<Utc>,
}

impl TopologyStatus {
    fn new(info: &DiscoveryInfo, registry: &HostRegistry) -> Self {
        let hosts: Vec<_> = registry.all().iter().map(|h| HostStatus::of(h)).collect();
        Self {
            cluster_name: info.cluster_name().map(str::to_string),
            partitioner: info.partitioner().map(str::to_string),
            host_count: hosts.len(),
            token_owners: info.token_map().len(),
            schema_versions: info.schema_versions().iter().copied().collect(),
            schema_agreement: info.has_schema_agreement(),
            hosts,
            last_refresh: Utc::now(),
        }
    }
}

// =============================================================================
// CONTROL CONNECTION
// =============================================================================

/// Reconciles the host registry with the discovered topology
pub struct ControlConnection {
    engine: Arc<dyn DiscoveryPolicy>,
    registry: Arc<HostRegistry>,
    load_balancing: Arc<dyn LoadBalancingPolicy>,
    factory: Arc<dyn HostFactory>,
    config: Arc<DiscoveryConfig>,
    metrics: Arc<DiscoveryMetrics>,

    /// Held for the duration of a scan and its reconciliation
    scan_lock: Mutex<()>,

    /// Set once a scan has succeeded and the policy has been initialized
    announced: AtomicBool,

    status: RwLock<Option<TopologyStatus>>,
}

impl ControlConnection {
    pub fn new(
        engine: Arc<dyn DiscoveryPolicy>,
        registry: Arc<HostRegistry>,
        load_balancing: Arc<dyn LoadBalancingPolicy>,
        factory: Arc<dyn HostFactory>,
        config: Arc<DiscoveryConfig>,
        metrics: Arc<DiscoveryMetrics>,
    ) -> Self {
        Self {
            engine,
            registry,
            load_balancing,
            factory,
            config,
            metrics,
            scan_lock: Mutex::new(()),
            announced: AtomicBool::new(false),
            status: RwLock::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<HostRegistry> {
        &self.registry
    }

    /// Status recorded by the last successful refresh
    pub fn status(&self) -> Option<TopologyStatus> {
        self.status.read().clone()
    }

    fn phase(&self) -> ScanPhase {
        if self.announced.load(Ordering::SeqCst) {
            ScanPhase::Incremental
        } else {
            ScanPhase::Initial
        }
    }

    /// Scan the cluster and apply the result to the registry
    pub async fn refresh_topology(&self) -> Result<TopologyStatus, DiscoveryError> {
        let _scan = self.scan_lock.lock().await;

        let phase = self.phase();
        let info = self.engine.scan(self.factory.as_ref(), phase).await?;
        self.reconcile(&info, phase);
        self.announced.store(true, Ordering::SeqCst);

        let status = TopologyStatus::new(&info, &self.registry);
        *self.status.write() = Some(status.clone());
        Ok(status)
    }

    fn reconcile(&self, info: &DiscoveryInfo, phase: ScanPhase) {
        let mut added = Vec::new();
        for host in info.hosts() {
            let (registered, inserted) = self.registry.add_if_absent(host.clone());
            if registered.state() == HostState::Added {
                registered.set_up();
                added.push(registered.clone());
            }
            if inserted {
                info!("New Cassandra host {} added", registered);
            }
            if let Some(tokens) = info.token_map().get(host) {
                registered.set_tokens(tokens.clone());
            }
        }

        let mut removed = Vec::new();
        for host in self.registry.all() {
            if info.contains(&host.address()) || info.connected_address() == Some(host.address()) {
                continue;
            }
            if self.registry.remove(&host.address()).is_some() {
                info!("Cassandra host {} removed", host);
                removed.push(host);
            }
        }

        match phase {
            ScanPhase::Initial => self.load_balancing.init(&self.registry.all()),
            ScanPhase::Incremental => {
                for host in &added {
                    self.load_balancing.on_add(host);
                }
            }
        }
        for host in &removed {
            self.load_balancing.on_remove(host);
        }

        self.metrics.add_hosts_added(added.len() as u64);
        self.metrics.add_hosts_removed(removed.len() as u64);
        debug!(
            "Reconciled {} scan: {} added, {} removed, {} known",
            phase,
            added.len(),
            removed.len(),
            self.registry.len()
        );
    }

    /// Refresh one host, dropping it if the cluster no longer knows it
    pub async fn refresh_node(&self, host: &Arc<Host>) -> Result<bool, DiscoveryError> {
        let keep = self.engine.refresh_node_info(host).await?;
        if !keep && self.registry.remove(&host.address()).is_some() {
            self.load_balancing.on_remove(host);
            self.metrics.add_hosts_removed(1);
        }
        Ok(keep)
    }

    /// A host stopped answering
    pub fn mark_down(&self, host: &Arc<Host>) {
        if host.state() == HostState::Down {
            return;
        }
        warn!("Host {} is down", host);
        host.set_down();
        self.load_balancing.on_down(host);
    }

    /// A host answers again; its metadata is refreshed before it is routed to
    ///
    /// Returns false if the host left the cluster in the meantime.
    pub async fn mark_up(&self, host: &Arc<Host>) -> Result<bool, DiscoveryError> {
        if host.is_up() {
            return Ok(true);
        }
        if !self.refresh_node(host).await? {
            return Ok(false);
        }
        info!("Host {} is up", host);
        host.set_up();
        self.load_balancing.on_up(host);
        Ok(true)
    }

    /// Re-scan until live hosts report a single schema version
    ///
    /// Returns false if agreement was not reached within the configured wait.
    pub async fn wait_for_schema_agreement(&self) -> Result<bool, DiscoveryError> {
        let poll = self.config.schema_agreement_poll();
        let deadline = tokio::time::Instant::now() + self.config.schema_agreement_wait();

        loop {
            let status = self.refresh_topology().await?;
            if status.schema_agreement {
                debug!("Schema agreement reached");
                return Ok(true);
            }
            if tokio::time::Instant::now() + poll > deadline {
                warn!(
                    "No schema agreement after {}s ({} versions)",
                    self.config.schema_agreement_wait_secs,
                    status.schema_versions.len()
                );
                return Ok(false);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Refresh the topology every `period`, forever
    pub async fn run_periodic_refresh(&self, period: Duration) {
        info!("Starting periodic topology refresh (every {:?})", period);

        let mut interval = tokio::time::interval(period);
        // First tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;

            match self.refresh_topology().await {
                Ok(status) => debug!(
                    "Topology refreshed: {} hosts, schema agreement: {}",
                    status.host_count, status.schema_agreement
                ),
                Err(e) => warn!("Topology refresh failed: {}", e),
            }
        }
    }
}
