//! CQL Cluster Topology Discovery
//!
//! Discovers the nodes of a partitioned, replicated CQL cluster through the
//! `system.local` and `system.peers` tables of one connected node, and keeps
//! a shared registry of hosts in line with what the cluster reports.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CONTROL CONNECTION                      │
//! │  serialized refreshes, registry reconciliation, status      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  DiscoveryPolicy     ←── scan / refresh_node_info           │
//! │  AdminConnection     ←── system.local + system.peers        │
//! │  AddressTranslator   ←── broadcast -> contact address       │
//! │  LoadBalancingPolicy ←── on_down / on_add on moves          │
//! │  HostRegistry        ←── address -> Arc<Host>               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod connection;
pub mod control;
pub mod discovery;
pub mod error;
pub mod fixture;
pub mod host;
pub mod metrics;
pub mod policy;
pub mod types;

pub use config::DiscoveryConfig;
pub use control::{ControlConnection, TopologyStatus};
pub use discovery::{DefaultDiscoveryPolicy, DiscoveryContext, DiscoveryInfo, DiscoveryPolicy};
pub use error::{DiscoveryError, RequestError};
pub use host::{Host, HostRegistry};
pub use types::{AdminQuery, ScanPhase, SystemRow};
