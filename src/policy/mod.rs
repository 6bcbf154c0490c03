//! Pluggable Policies
//!
//! Strategy objects consumed by the discovery engine and the control
//! connection: where to route queries, and how to rewrite peer addresses.

mod dc_aware;
mod translator;

pub use dc_aware::DcAwareRoundRobinPolicy;
pub use translator::{AddressTranslator, IdentityTranslator, StaticAddressTranslator};

use std::sync::Arc;

use crate::host::{Host, HostDistance};

/// Receives topology changes and decides routing distances
///
/// A host whose datacenter or rack changes is announced as `on_down`
/// followed by `on_add`, with the location mutated in between, so routing
/// state keyed on the old location is dropped before the new one is filed.
pub trait LoadBalancingPolicy: Send + Sync {
    /// Called once with the hosts found by the initial scan
    fn init(&self, hosts: &[Arc<Host>]);

    /// Routing distance of a host
    fn distance(&self, host: &Host) -> HostDistance;

    /// A host joined the cluster or must be re-filed
    fn on_add(&self, host: &Arc<Host>);

    /// A known host became reachable again
    fn on_up(&self, host: &Arc<Host>);

    /// A host must no longer be routed to under its current location
    fn on_down(&self, host: &Arc<Host>);

    /// A host left the cluster
    fn on_remove(&self, host: &Arc<Host>);
}
