//! Datacenter-Aware Round Robin
//!
//! Files hosts by datacenter. Hosts of the local datacenter are preferred;
//! a bounded number of hosts per remote datacenter serve as fallback.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::LoadBalancingPolicy;
use crate::host::{Host, HostDistance};

/// Key used for hosts that report no datacenter
const UNKNOWN_DC: &str = "";

/// Round robin over the local datacenter, remote datacenters as fallback
pub struct DcAwareRoundRobinPolicy {
    /// Local datacenter; inferred from the first host filed when unset
    local_dc: RwLock<Option<String>>,

    /// Remote hosts per datacenter considered `Remote` rather than `Ignored`
    used_hosts_per_remote_dc: usize,

    /// Hosts filed under the datacenter they had when added
    per_dc: RwLock<BTreeMap<String, Vec<Arc<Host>>>>,

    /// Rotation offset for local query plans
    index: AtomicUsize,
}

impl DcAwareRoundRobinPolicy {
    pub fn new(local_dc: Option<String>, used_hosts_per_remote_dc: usize) -> Self {
        Self {
            local_dc: RwLock::new(local_dc),
            used_hosts_per_remote_dc,
            per_dc: RwLock::new(BTreeMap::new()),
            index: AtomicUsize::new(0),
        }
    }

    pub fn local_dc(&self) -> Option<String> {
        self.local_dc.read().clone()
    }

    /// Addresses filed under a datacenter
    pub fn hosts_in(&self, dc: &str) -> Vec<std::net::SocketAddr> {
        self.per_dc
            .read()
            .get(dc)
            .map(|hosts| hosts.iter().map(|h| h.address()).collect())
            .unwrap_or_default()
    }

    /// Live hosts in routing order: rotated local hosts, then remote fallbacks
    pub fn query_plan(&self) -> Vec<Arc<Host>> {
        let local_dc = self.local_dc().unwrap_or_default();
        let per_dc = self.per_dc.read();
        let mut plan = Vec::new();

        if let Some(local) = per_dc.get(&local_dc) {
            let live: Vec<_> = local.iter().filter(|h| h.is_up()).cloned().collect();
            if !live.is_empty() {
                let start = self.index.fetch_add(1, Ordering::Relaxed) % live.len();
                plan.extend(live.iter().cycle().skip(start).take(live.len()).cloned());
            }
        }

        for (dc, hosts) in per_dc.iter() {
            if *dc == local_dc {
                continue;
            }
            plan.extend(
                hosts
                    .iter()
                    .take(self.used_hosts_per_remote_dc)
                    .filter(|h| h.is_up())
                    .cloned(),
            );
        }

        plan
    }

    fn dc_of(host: &Host) -> String {
        host.datacenter().unwrap_or_else(|| UNKNOWN_DC.to_string())
    }

    fn file(&self, host: &Arc<Host>) {
        let dc = Self::dc_of(host);

        {
            let mut local_dc = self.local_dc.write();
            if local_dc.is_none() && dc != UNKNOWN_DC {
                info!("Using {} as local datacenter (inferred from {})", dc, host.address());
                *local_dc = Some(dc.clone());
            }
        }

        {
            let mut per_dc = self.per_dc.write();
            let hosts = per_dc.entry(dc.clone()).or_default();
            if !hosts.iter().any(|h| h.address() == host.address()) {
                hosts.push(host.clone());
            }
        }

        host.set_distance(self.distance(host));
        debug!("Filed {} under datacenter '{}' ({})", host.address(), dc, host.distance());
    }

    fn unfile(&self, host: &Host) {
        let mut per_dc = self.per_dc.write();
        for hosts in per_dc.values_mut() {
            hosts.retain(|h| h.address() != host.address());
        }
        per_dc.retain(|_, hosts| !hosts.is_empty());
    }
}

impl LoadBalancingPolicy for DcAwareRoundRobinPolicy {
    fn init(&self, hosts: &[Arc<Host>]) {
        for host in hosts {
            self.file(host);
        }
    }

    fn distance(&self, host: &Host) -> HostDistance {
        let dc = Self::dc_of(host);
        if self.local_dc.read().as_deref() == Some(dc.as_str()) {
            return HostDistance::Local;
        }

        let per_dc = self.per_dc.read();
        match per_dc
            .get(&dc)
            .and_then(|hosts| hosts.iter().position(|h| h.address() == host.address()))
        {
            Some(position) if position < self.used_hosts_per_remote_dc => HostDistance::Remote,
            _ => HostDistance::Ignored,
        }
    }

    fn on_add(&self, host: &Arc<Host>) {
        self.file(host);
    }

    fn on_up(&self, host: &Arc<Host>) {
        self.file(host);
    }

    fn on_down(&self, host: &Arc<Host>) {
        self.unfile(host);
    }

    fn on_remove(&self, host: &Arc<Host>) {
        self.unfile(host);
        host.set_distance(HostDistance::Ignored);
    }
}
