//! Core types for administrative queries
//!
//! Rows read from `system.local` and `system.peers`, the queries that produce
//! them, and the scan phase that drives policy notifications.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Default native protocol port
pub const DEFAULT_NATIVE_PORT: u16 = 9042;

const SELECT_LOCAL: &str = "SELECT * FROM system.local WHERE key='local'";
const SELECT_PEERS: &str = "SELECT * FROM system.peers";

// =============================================================================
// ADMINISTRATIVE QUERIES
// =============================================================================

/// A query issued over the administrative connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminQuery {
    /// The connected node's own row
    Local,

    /// Every row of the peers table
    Peers,

    /// The peers row whose `peer` column equals the given listen address
    Peer { listen_address: IpAddr },
}

/// System table read by an administrative query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemTable {
    Local,
    Peers,
}

impl AdminQuery {
    pub fn table(&self) -> SystemTable {
        match self {
            AdminQuery::Local => SystemTable::Local,
            AdminQuery::Peers | AdminQuery::Peer { .. } => SystemTable::Peers,
        }
    }

    /// CQL text for this query
    pub fn cql(&self) -> String {
        match self {
            AdminQuery::Local => SELECT_LOCAL.to_string(),
            AdminQuery::Peers => SELECT_PEERS.to_string(),
            AdminQuery::Peer { listen_address } => {
                format!("{} WHERE peer='{}'", SELECT_PEERS, listen_address)
            }
        }
    }
}

impl fmt::Display for AdminQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminQuery::Local => write!(f, "system.local"),
            AdminQuery::Peers => write!(f, "system.peers"),
            AdminQuery::Peer { listen_address } => write!(f, "system.peers[{}]", listen_address),
        }
    }
}

// =============================================================================
// SCAN PHASE
// =============================================================================

/// Lifecycle phase of a scan
///
/// During the initial scan the load balancing policy has not seen any host
/// yet, so location changes are applied silently. Every later scan is
/// incremental and announces location changes to the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanPhase {
    /// Bulk bootstrap of the topology
    Initial,

    /// Update of an already announced topology
    Incremental,
}

impl ScanPhase {
    /// Whether location changes must be announced to the policy
    pub fn notifies_policy(&self) -> bool {
        matches!(self, ScanPhase::Incremental)
    }
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanPhase::Initial => write!(f, "initial"),
            ScanPhase::Incremental => write!(f, "incremental"),
        }
    }
}

// =============================================================================
// SYSTEM TABLE ROWS
// =============================================================================

/// Address columns only present in `system.peers`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerColumns {
    /// `peer`: the node's internal listen address
    pub peer: Option<IpAddr>,

    /// `rpc_address`: the address clients should use to contact the node
    pub rpc_address: Option<IpAddr>,
}

/// One row of `system.local` or `system.peers`
///
/// A null `tokens` column is read as an empty set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemRow {
    /// Cluster name (local row only)
    pub cluster_name: Option<String>,

    /// Partitioner class name (local row only)
    pub partitioner: Option<String>,

    /// Cassandra release version
    pub release_version: Option<String>,

    /// Tokens owned by the node
    pub tokens: BTreeSet<String>,

    /// Schema version reported by the node
    pub schema_version: Option<Uuid>,

    /// Datacenter name
    pub data_center: Option<String>,

    /// Rack name
    pub rack: Option<String>,

    /// Set when the row was read from the peers table
    #[serde(skip)]
    pub peer_columns: Option<PeerColumns>,
}

impl SystemRow {
    /// Empty row shaped like `system.local`
    pub fn local() -> Self {
        Self::default()
    }

    /// Empty row shaped like `system.peers`
    pub fn peer(peer: Option<IpAddr>, rpc_address: Option<IpAddr>) -> Self {
        Self {
            peer_columns: Some(PeerColumns { peer, rpc_address }),
            ..Self::default()
        }
    }

    pub fn with_cluster(mut self, cluster_name: &str, partitioner: &str) -> Self {
        self.cluster_name = Some(cluster_name.to_string());
        self.partitioner = Some(partitioner.to_string());
        self
    }

    pub fn with_location(mut self, data_center: Option<&str>, rack: Option<&str>) -> Self {
        self.data_center = data_center.map(str::to_string);
        self.rack = rack.map(str::to_string);
        self
    }

    pub fn with_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens = tokens.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_schema_version(mut self, version: Uuid) -> Self {
        self.schema_version = Some(version);
        self
    }

    pub fn with_release_version(mut self, version: &str) -> Self {
        self.release_version = Some(version.to_string());
        self
    }

    /// Whether the row carries the `peer` column
    pub fn has_listen_column(&self) -> bool {
        self.peer_columns.is_some()
    }

    /// Value of the `peer` column, if the row has one and it is non-null
    pub fn listen_address(&self) -> Option<IpAddr> {
        self.peer_columns.and_then(|c| c.peer)
    }

    /// Value of the `rpc_address` column, if the row has one and it is non-null
    pub fn rpc_address(&self) -> Option<IpAddr> {
        self.peer_columns.and_then(|c| c.rpc_address)
    }

    /// Whether the row carries any location column
    pub fn has_location(&self) -> bool {
        self.data_center.is_some() || self.rack.is_some()
    }
}
