//! Peer Address Resolution
//!
//! Decides which address identifies the node behind a `system.peers` row.
//!
//! 1. A row naming the connected node itself is a phantom entry: ignored.
//! 2. A row without `rpc_address` is incomplete: ignored.
//! 3. A wildcard `rpc_address` falls back to the listen address.
//! 4. The result, with the native port, goes through the address translator.

use std::net::{IpAddr, SocketAddr};
use tracing::{debug, warn};

use crate::policy::AddressTranslator;

/// Resolve the contact address of a peer row
///
/// `connected` is the remote address of the administrative connection,
/// `listen` and `broadcast` are the row's `peer` and `rpc_address` columns.
pub fn resolve_peer_address(
    connected: SocketAddr,
    listen: Option<IpAddr>,
    broadcast: Option<IpAddr>,
    port: u16,
    translator: &dyn AddressTranslator,
) -> Option<SocketAddr> {
    let connected_ip = connected.ip();

    if listen == Some(connected_ip) || broadcast == Some(connected_ip) {
        debug!(
            "system.peers on node {} has a row for itself, ignoring it",
            connected
        );
        return None;
    }

    let broadcast = match broadcast {
        Some(ip) => ip,
        None => {
            warn!(
                "No rpc_address found for host {} in {}'s peers system table, it will be ignored",
                display_ip(listen),
                connected
            );
            return None;
        }
    };

    let effective = if broadcast.is_unspecified() {
        match listen {
            Some(listen) => {
                warn!(
                    "Found host with {} as rpc_address, using listen_address ({}) to contact \
                     it instead. If this is incorrect you should avoid the use of {} server side.",
                    broadcast, listen, broadcast
                );
                listen
            }
            None => {
                warn!(
                    "Found host with {} as rpc_address and no listen_address in {}'s \
                     peers system table, it will be ignored",
                    broadcast, connected
                );
                return None;
            }
        }
    } else {
        broadcast
    };

    Some(translate(effective, port, translator))
}

/// Apply the translator, keeping the original address when it declines
pub fn translate(ip: IpAddr, port: u16, translator: &dyn AddressTranslator) -> SocketAddr {
    let original = SocketAddr::new(ip, port);
    translator.translate(original).unwrap_or(original)
}

fn display_ip(ip: Option<IpAddr>) -> String {
    ip.map(|ip| ip.to_string())
        .unwrap_or_else(|| "<unknown>".to_string())
}
