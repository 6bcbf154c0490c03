//! Address Translation
//!
//! Rewrites the broadcast address a node advertises into the address this
//! client must dial, e.g. when nodes sit behind NAT.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

/// Maps an advertised address to a contactable one
///
/// Returning `None` keeps the advertised address.
pub trait AddressTranslator: Send + Sync {
    fn translate(&self, address: SocketAddr) -> Option<SocketAddr>;
}

/// Keeps every address as advertised
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTranslator;

impl AddressTranslator for IdentityTranslator {
    fn translate(&self, address: SocketAddr) -> Option<SocketAddr> {
        Some(address)
    }
}

/// Fixed table from advertised IP to public socket address
#[derive(Debug, Clone, Default)]
pub struct StaticAddressTranslator {
    mappings: HashMap<IpAddr, SocketAddr>,
}

impl StaticAddressTranslator {
    pub fn new(mappings: HashMap<IpAddr, SocketAddr>) -> Self {
        Self { mappings }
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

impl AddressTranslator for StaticAddressTranslator {
    fn translate(&self, address: SocketAddr) -> Option<SocketAddr> {
        let translated = self.mappings.get(&address.ip()).copied();
        if let Some(public) = translated {
            debug!("Translated {} to {}", address, public);
        }
        translated
    }
}
