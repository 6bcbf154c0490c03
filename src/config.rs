//! Discovery Configuration
//!
//! Tunables for topology refresh, schema agreement and address translation.
//! Loaded from TOML; CLI flags override individual values.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::discovery::ProtocolOptions;
use crate::policy::{AddressTranslator, IdentityTranslator, StaticAddressTranslator};
use crate::types::DEFAULT_NATIVE_PORT;

/// Main configuration for topology discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    // === Network ===

    /// Native protocol port, combined with peer broadcast addresses
    pub native_port: u16,

    // === Timing ===

    /// Interval between periodic topology refreshes (seconds)
    pub refresh_interval_secs: u64,

    /// Maximum time to wait for schema agreement (seconds)
    pub schema_agreement_wait_secs: u64,

    /// Delay between two schema agreement checks (milliseconds)
    pub schema_agreement_poll_millis: u64,

    // === Load Balancing ===

    /// Local datacenter; inferred from the first host seen when unset
    pub local_datacenter: Option<String>,

    /// Hosts per remote datacenter kept as fallback
    pub used_hosts_per_remote_dc: usize,

    // === Address Translation ===

    /// Broadcast IP -> public socket address, for nodes behind NAT
    pub address_translation: BTreeMap<String, String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            native_port: DEFAULT_NATIVE_PORT,

            refresh_interval_secs: 60,
            schema_agreement_wait_secs: 10,
            schema_agreement_poll_millis: 200,

            local_datacenter: None,
            used_hosts_per_remote_dc: 0,

            address_translation: BTreeMap::new(),
        }
    }
}

impl DiscoveryConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    // Builder-style methods for CLI overrides

    pub fn with_native_port(mut self, port: u16) -> Self {
        self.native_port = port;
        self
    }

    pub fn with_refresh_interval_secs(mut self, secs: u64) -> Self {
        self.refresh_interval_secs = secs;
        self
    }

    pub fn with_local_datacenter(mut self, dc: Option<String>) -> Self {
        if dc.is_some() {
            self.local_datacenter = dc;
        }
        self
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn schema_agreement_wait(&self) -> Duration {
        Duration::from_secs(self.schema_agreement_wait_secs)
    }

    pub fn schema_agreement_poll(&self) -> Duration {
        Duration::from_millis(self.schema_agreement_poll_millis)
    }

    pub fn protocol_options(&self) -> ProtocolOptions {
        ProtocolOptions {
            port: self.native_port,
        }
    }

    /// Parsed `address_translation` table
    pub fn translation_table(&self) -> anyhow::Result<HashMap<IpAddr, SocketAddr>> {
        let mut table = HashMap::with_capacity(self.address_translation.len());
        for (from, to) in &self.address_translation {
            let ip: IpAddr = from
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid translated address '{}': {}", from, e))?;
            let target: SocketAddr = to
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid translation target '{}': {}", to, e))?;
            table.insert(ip, target);
        }
        Ok(table)
    }

    /// Translator described by the configuration
    pub fn address_translator(&self) -> anyhow::Result<Arc<dyn AddressTranslator>> {
        if self.address_translation.is_empty() {
            return Ok(Arc::new(IdentityTranslator));
        }
        Ok(Arc::new(StaticAddressTranslator::new(self.translation_table()?)))
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.native_port == 0 {
            anyhow::bail!("native_port must not be 0");
        }

        if self.refresh_interval_secs == 0 {
            anyhow::bail!("refresh_interval_secs must be greater than 0");
        }

        if self.schema_agreement_poll() >= self.schema_agreement_wait() {
            anyhow::bail!(
                "schema_agreement_poll_millis ({}) must be shorter than \
                 schema_agreement_wait_secs ({})",
                self.schema_agreement_poll_millis,
                self.schema_agreement_wait_secs
            );
        }

        self.translation_table()?;

        Ok(())
    }
}
