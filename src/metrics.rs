//! Discovery Metrics
//!
//! Counters for scans, skipped rows and topology changes, exported in
//! Prometheus text format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics collector shared by the engine and the control connection
#[derive(Default)]
pub struct DiscoveryMetrics {
    /// Start time for uptime calculation
    start_time: Option<Instant>,

    /// Scans started
    pub scans: AtomicU64,

    /// Scans that returned an error
    pub scans_failed: AtomicU64,

    /// Peer rows discarded by address resolution
    pub peer_rows_skipped: AtomicU64,

    /// Hosts created through a host factory
    pub hosts_created: AtomicU64,

    /// Datacenter/rack changes applied to known hosts
    pub location_changes: AtomicU64,

    /// Single-host refreshes
    pub node_refreshes: AtomicU64,

    /// Hosts added to the registry
    pub hosts_added: AtomicU64,

    /// Hosts removed from the registry
    pub hosts_removed: AtomicU64,
}

impl DiscoveryMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn inc_scans(&self) {
        self.scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_scans_failed(&self) {
        self.scans_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_peer_rows_skipped(&self) {
        self.peer_rows_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_hosts_created(&self) {
        self.hosts_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_location_changes(&self) {
        self.location_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_node_refreshes(&self) {
        self.node_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_hosts_added(&self, count: u64) {
        self.hosts_added.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_hosts_removed(&self, count: u64) {
        self.hosts_removed.fetch_add(count, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "# HELP cql_discovery_uptime_seconds Discovery uptime in seconds\n\
             # TYPE cql_discovery_uptime_seconds gauge\n\
             cql_discovery_uptime_seconds {}\n\n",
            self.uptime_secs()
        ));

        let counters: [(&str, &str, &AtomicU64); 8] = [
            ("cql_discovery_scans_total", "Topology scans started", &self.scans),
            ("cql_discovery_scans_failed_total", "Topology scans that failed", &self.scans_failed),
            (
                "cql_discovery_peer_rows_skipped_total",
                "Peer rows without a usable address",
                &self.peer_rows_skipped,
            ),
            (
                "cql_discovery_hosts_created_total",
                "Hosts created for new peers",
                &self.hosts_created,
            ),
            (
                "cql_discovery_location_changes_total",
                "Datacenter or rack changes",
                &self.location_changes,
            ),
            ("cql_discovery_node_refreshes_total", "Single host refreshes", &self.node_refreshes),
            ("cql_discovery_hosts_added_total", "Hosts added to the registry", &self.hosts_added),
            (
                "cql_discovery_hosts_removed_total",
                "Hosts removed from the registry",
                &self.hosts_removed,
            ),
        ];

        for (name, help, value) in counters {
            output.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n\n",
                value.load(Ordering::Relaxed)
            ));
        }

        output
    }
}
