//! Host Registry
//!
//! In-memory map of known hosts keyed by contact address.
//! Owned by the control connection; the discovery engine only reads it.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use super::{Host, HostState};

/// Registry of hosts known to the driver
#[derive(Default)]
pub struct HostRegistry {
    hosts: RwLock<HashMap<SocketAddr, Arc<Host>>>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a host by contact address
    pub fn get(&self, address: &SocketAddr) -> Option<Arc<Host>> {
        self.hosts.read().get(address).cloned()
    }

    pub fn contains(&self, address: &SocketAddr) -> bool {
        self.hosts.read().contains_key(address)
    }

    /// Register a host unless one already exists for its address
    ///
    /// Returns the registered host and whether it was newly inserted.
    pub fn add_if_absent(&self, host: Arc<Host>) -> (Arc<Host>, bool) {
        let mut hosts = self.hosts.write();
        if let Some(existing) = hosts.get(&host.address()) {
            return (existing.clone(), false);
        }
        debug!("Registering host {}", host.address());
        hosts.insert(host.address(), host.clone());
        (host, true)
    }

    /// Remove a host
    pub fn remove(&self, address: &SocketAddr) -> Option<Arc<Host>> {
        self.hosts.write().remove(address)
    }

    /// All hosts, sorted by address
    pub fn all(&self) -> Vec<Arc<Host>> {
        let mut hosts: Vec<_> = self.hosts.read().values().cloned().collect();
        hosts.sort_by_key(|h| h.address());
        hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.read().is_empty()
    }

    /// Number of hosts currently up
    pub fn up_count(&self) -> usize {
        self.hosts
            .read()
            .values()
            .filter(|h| h.state() == HostState::Up)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(s: &str) -> Arc<Host> {
        Arc::new(Host::new(s.parse().unwrap()))
    }

    #[test]
    fn test_add_and_get() {
        let registry = HostRegistry::new();
        assert!(registry.is_empty());

        let (added, inserted) = registry.add_if_absent(host("10.0.0.1:9042"));
        assert!(inserted);
        assert_eq!(registry.len(), 1);

        let found = registry.get(&"10.0.0.1:9042".parse().unwrap()).unwrap();
        assert!(Arc::ptr_eq(&added, &found));
    }

    #[test]
    fn test_add_keeps_existing_instance() {
        let registry = HostRegistry::new();
        let (first, _) = registry.add_if_absent(host("10.0.0.1:9042"));
        let (second, inserted) = registry.add_if_absent(host("10.0.0.1:9042"));

        assert!(!inserted);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove() {
        let registry = HostRegistry::new();
        registry.add_if_absent(host("10.0.0.1:9042"));
        registry.add_if_absent(host("10.0.0.2:9042"));

        let removed = registry.remove(&"10.0.0.1:9042".parse().unwrap());
        assert!(removed.is_some());
        assert!(!registry.contains(&"10.0.0.1:9042".parse().unwrap()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_all_sorted_and_up_count() {
        let registry = HostRegistry::new();
        registry.add_if_absent(host("10.0.0.3:9042"));
        let (h1, _) = registry.add_if_absent(host("10.0.0.1:9042"));
        registry.add_if_absent(host("10.0.0.2:9042"));
        h1.set_up();

        let addresses: Vec<_> = registry.all().iter().map(|h| h.address().to_string()).collect();
        assert_eq!(addresses, vec!["10.0.0.1:9042", "10.0.0.2:9042", "10.0.0.3:9042"]);
        assert_eq!(registry.up_count(), 1);
    }
}
