//! Cluster Hosts
//!
//! A `Host` is one cluster node, identified by the address clients use to
//! contact it. The same `Arc<Host>` is shared by the registry, the discovery
//! engine and the load balancing policy; metadata is mutated in place.

mod registry;

pub use registry::HostRegistry;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

// =============================================================================
// HOST STATE
// =============================================================================

/// Liveness of a host as seen by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    /// Created by a factory, not yet announced to the policy
    #[default]
    Added,
    /// Reachable
    Up,
    /// Unreachable
    Down,
}

/// Routing distance assigned by the load balancing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostDistance {
    /// Preferred for queries
    Local,
    /// Used when local hosts are exhausted
    Remote,
    /// Never queried
    #[default]
    Ignored,
}

impl fmt::Display for HostDistance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostDistance::Local => write!(f, "local"),
            HostDistance::Remote => write!(f, "remote"),
            HostDistance::Ignored => write!(f, "ignored"),
        }
    }
}

// =============================================================================
// HOST
// =============================================================================

/// Metadata read from the system tables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostMetadata {
    /// Internal listen address (`peer` column)
    pub listen_address: Option<IpAddr>,

    /// Datacenter name
    pub datacenter: Option<String>,

    /// Rack name
    pub rack: Option<String>,

    /// Cassandra release version
    pub release_version: Option<String>,

    /// Tokens owned by the host
    pub tokens: BTreeSet<String>,
}

/// One node of the cluster
pub struct Host {
    address: SocketAddr,
    metadata: RwLock<HostMetadata>,
    state: RwLock<HostState>,
    distance: RwLock<HostDistance>,
}

impl Host {
    /// Create a host that has not been announced yet
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            metadata: RwLock::new(HostMetadata::default()),
            state: RwLock::new(HostState::Added),
            distance: RwLock::new(HostDistance::Ignored),
        }
    }

    /// Contact address; the host's identity
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Copy of the current metadata
    pub fn metadata(&self) -> HostMetadata {
        self.metadata.read().clone()
    }

    pub fn listen_address(&self) -> Option<IpAddr> {
        self.metadata.read().listen_address
    }

    pub fn datacenter(&self) -> Option<String> {
        self.metadata.read().datacenter.clone()
    }

    pub fn rack(&self) -> Option<String> {
        self.metadata.read().rack.clone()
    }

    /// Datacenter and rack read under a single lock
    pub fn location(&self) -> (Option<String>, Option<String>) {
        let meta = self.metadata.read();
        (meta.datacenter.clone(), meta.rack.clone())
    }

    pub fn release_version(&self) -> Option<String> {
        self.metadata.read().release_version.clone()
    }

    pub fn tokens(&self) -> BTreeSet<String> {
        self.metadata.read().tokens.clone()
    }

    pub fn state(&self) -> HostState {
        *self.state.read()
    }

    pub fn is_up(&self) -> bool {
        self.state() == HostState::Up
    }

    pub fn distance(&self) -> HostDistance {
        *self.distance.read()
    }

    /// Replace datacenter and rack together
    pub fn set_location(&self, datacenter: Option<String>, rack: Option<String>) {
        let mut meta = self.metadata.write();
        meta.datacenter = datacenter;
        meta.rack = rack;
    }

    pub fn set_listen_address(&self, listen_address: Option<IpAddr>) {
        self.metadata.write().listen_address = listen_address;
    }

    pub fn set_release_version(&self, version: Option<String>) {
        self.metadata.write().release_version = version;
    }

    pub fn set_tokens(&self, tokens: BTreeSet<String>) {
        self.metadata.write().tokens = tokens;
    }

    pub fn set_up(&self) {
        *self.state.write() = HostState::Up;
    }

    pub fn set_down(&self) {
        *self.state.write() = HostState::Down;
    }

    /// Owned by the load balancing policy
    pub fn set_distance(&self, distance: HostDistance) {
        *self.distance.write() = distance;
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Host {}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meta = self.metadata.read();
        f.debug_struct("Host")
            .field("address", &self.address)
            .field("datacenter", &meta.datacenter)
            .field("rack", &meta.rack)
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

// =============================================================================
// HOST FACTORY
// =============================================================================

/// Creates hosts for peers seen for the first time
pub trait HostFactory: Send + Sync {
    fn new_host(&self, address: SocketAddr) -> Arc<Host>;
}

/// Factory producing plain, unannounced hosts
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHostFactory;

impl HostFactory for DefaultHostFactory {
    fn new_host(&self, address: SocketAddr) -> Arc<Host> {
        Arc::new(Host::new(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_new_host_defaults() {
        let host = Host::new(addr("10.0.0.1:9042"));
        assert_eq!(host.state(), HostState::Added);
        assert!(!host.is_up());
        assert_eq!(host.distance(), HostDistance::Ignored);
        assert_eq!(host.metadata(), HostMetadata::default());
    }

    #[test]
    fn test_identity_is_address() {
        let a = Host::new(addr("10.0.0.1:9042"));
        let b = Host::new(addr("10.0.0.1:9042"));
        b.set_location(Some("dc2".to_string()), None);

        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(Arc::new(a));
        set.insert(Arc::new(b));
        assert_eq!(set.len(), 1);

        assert_ne!(Host::new(addr("10.0.0.1:9042")), Host::new(addr("10.0.0.1:9043")));
    }

    #[test]
    fn test_location_update() {
        let host = Host::new(addr("10.0.0.1:9042"));
        host.set_location(Some("dc1".to_string()), Some("r1".to_string()));
        assert_eq!(host.location(), (Some("dc1".to_string()), Some("r1".to_string())));

        host.set_location(Some("dc2".to_string()), None);
        assert_eq!(host.datacenter().as_deref(), Some("dc2"));
        assert_eq!(host.rack(), None);
    }

    #[test]
    fn test_state_transitions() {
        let host = Host::new(addr("10.0.0.1:9042"));
        host.set_up();
        assert!(host.is_up());
        host.set_down();
        assert_eq!(host.state(), HostState::Down);
        assert!(!host.is_up());
    }

    #[test]
    fn test_default_factory() {
        let host = DefaultHostFactory.new_host(addr("10.0.0.7:9042"));
        assert_eq!(host.address(), addr("10.0.0.7:9042"));
        assert_eq!(host.state(), HostState::Added);
    }
}
