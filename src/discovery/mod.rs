//! Topology Discovery
//!
//! Reads `system.local` and `system.peers` over the administrative
//! connection, folds the rows into shared `Host` objects and returns an
//! immutable snapshot for the control connection to reconcile.
//!
//! ```text
//! ControlConnection ──scan()──▶ DiscoveryPolicy ──send()──▶ AdminConnection
//!        │                          │   │
//!        │                          │   └── AddressTranslator (peer rows)
//!        │                          └────── LoadBalancingPolicy (on_down / on_add)
//!        ◀──────── DiscoveryInfo ───┘
//! ```

pub mod address;
mod engine;

pub use engine::DefaultDiscoveryPolicy;

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::connection::{AdminConnection, ConnectionProvider};
use crate::error::DiscoveryError;
use crate::host::{Host, HostFactory, HostRegistry};
use crate::metrics::DiscoveryMetrics;
use crate::policy::{AddressTranslator, LoadBalancingPolicy};
use crate::types::{ScanPhase, DEFAULT_NATIVE_PORT};

// =============================================================================
// CONTEXT
// =============================================================================

/// Native protocol parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolOptions {
    /// Port combined with peer broadcast addresses
    pub port: u16,
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_NATIVE_PORT,
        }
    }
}

/// Cluster-wide collaborators a discovery policy is bound to
#[derive(Clone)]
pub struct DiscoveryContext {
    /// Source of the administrative connection
    pub connections: Arc<dyn ConnectionProvider>,

    /// Known hosts (read-only for the engine)
    pub registry: Arc<HostRegistry>,

    /// Peer address rewriting
    pub translator: Arc<dyn AddressTranslator>,

    /// Receives location change notifications
    pub load_balancing: Arc<dyn LoadBalancingPolicy>,

    pub protocol: ProtocolOptions,

    pub metrics: Arc<DiscoveryMetrics>,
}

impl DiscoveryContext {
    /// Current administrative connection
    pub fn connection(&self) -> Result<Arc<dyn AdminConnection>, DiscoveryError> {
        self.connections
            .admin_connection()
            .ok_or(DiscoveryError::Unavailable)
    }
}

// =============================================================================
// DISCOVERY POLICY
// =============================================================================

/// Strategy for discovering the nodes of a cluster
///
/// The caller serializes `scan` invocations; at most one scan runs per
/// policy instance.
#[async_trait]
pub trait DiscoveryPolicy: Send + Sync {
    /// Bind the policy to a cluster
    fn init(&self, context: DiscoveryContext);

    /// Scan the whole cluster
    ///
    /// Hosts seen for the first time are created through `factory` but not
    /// registered; that is left to the caller.
    async fn scan(
        &self,
        factory: &dyn HostFactory,
        phase: ScanPhase,
    ) -> Result<DiscoveryInfo, DiscoveryError>;

    /// Refresh the metadata of one host
    ///
    /// Returns false when the host should be dropped from the registry.
    async fn refresh_node_info(&self, host: &Arc<Host>) -> Result<bool, DiscoveryError>;

    /// Release the bound context
    fn close(&self);
}

// =============================================================================
// DISCOVERY INFO
// =============================================================================

/// Snapshot produced by one scan
#[derive(Debug, Clone, Default)]
pub struct DiscoveryInfo {
    connected: Option<SocketAddr>,
    cluster_name: Option<String>,
    partitioner: Option<String>,
    hosts: Vec<Arc<Host>>,
    token_map: HashMap<Arc<Host>, BTreeSet<String>>,
    schema_versions: BTreeSet<Uuid>,
}

impl DiscoveryInfo {
    /// Node the scan was read from
    pub fn connected_address(&self) -> Option<SocketAddr> {
        self.connected
    }

    pub fn cluster_name(&self) -> Option<&str> {
        self.cluster_name.as_deref()
    }

    pub fn partitioner(&self) -> Option<&str> {
        self.partitioner.as_deref()
    }

    /// Hosts in merge order: connected host first, then peers
    pub fn hosts(&self) -> &[Arc<Host>] {
        &self.hosts
    }

    /// Tokens per host; empty unless the partitioner is known
    pub fn token_map(&self) -> &HashMap<Arc<Host>, BTreeSet<String>> {
        &self.token_map
    }

    pub fn schema_versions(&self) -> &BTreeSet<Uuid> {
        &self.schema_versions
    }

    /// Whether the polled hosts agree on one schema version
    pub fn has_schema_agreement(&self) -> bool {
        self.schema_versions.len() <= 1
    }

    pub fn contains(&self, address: &SocketAddr) -> bool {
        self.hosts.iter().any(|h| h.address() == *address)
    }
}

/// Accumulates a snapshot during a scan
#[derive(Default)]
pub(crate) struct DiscoveryInfoBuilder {
    connected: Option<SocketAddr>,
    cluster_name: Option<String>,
    partitioner: Option<String>,
    hosts: Vec<Arc<Host>>,
    seen: HashMap<SocketAddr, Arc<Host>>,
    token_map: HashMap<Arc<Host>, BTreeSet<String>>,
    schema_versions: BTreeSet<Uuid>,
}

impl DiscoveryInfoBuilder {
    pub(crate) fn connected(&mut self, address: SocketAddr) {
        self.connected = Some(address);
    }

    pub(crate) fn cluster(&mut self, cluster_name: Option<String>, partitioner: Option<String>) {
        self.cluster_name = cluster_name;
        self.partitioner = partitioner;
    }

    pub(crate) fn partitioner_known(&self) -> bool {
        self.partitioner.is_some()
    }

    /// Host already merged into this snapshot under `address`
    pub(crate) fn known(&self, address: &SocketAddr) -> Option<Arc<Host>> {
        self.seen.get(address).cloned()
    }

    pub(crate) fn host(&mut self, host: &Arc<Host>) {
        if self.seen.contains_key(&host.address()) {
            warn!(
                "Host {} appears twice in the system tables, keeping the last row's tokens",
                host
            );
            return;
        }
        self.seen.insert(host.address(), host.clone());
        self.hosts.push(host.clone());
    }

    /// Record tokens, only if the partitioner is known and `tokens` is non-empty
    pub(crate) fn tokens(&mut self, host: &Arc<Host>, tokens: &BTreeSet<String>) {
        if self.partitioner_known() && !tokens.is_empty() {
            self.token_map.insert(host.clone(), tokens.clone());
        }
    }

    pub(crate) fn schema_version(&mut self, version: Option<Uuid>) {
        if let Some(version) = version {
            self.schema_versions.insert(version);
        }
    }

    pub(crate) fn build(self) -> DiscoveryInfo {
        DiscoveryInfo {
            connected: self.connected,
            cluster_name: self.cluster_name,
            partitioner: self.partitioner,
            hosts: self.hosts,
            token_map: self.token_map,
            schema_versions: self.schema_versions,
        }
    }
}
