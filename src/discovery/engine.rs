//! Default Discovery Policy
//!
//! Relies on `system.local` and `system.peers` to discover the nodes of
//! the cluster.
//!
//! A scan writes both queries before awaiting either, then always folds the
//! local row first and the peer rows second, whatever order the responses
//! arrive in.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::address::resolve_peer_address;
use super::{DiscoveryContext, DiscoveryInfo, DiscoveryInfoBuilder, DiscoveryPolicy};
use crate::connection::{AdminConnection, RowsFuture};
use crate::error::DiscoveryError;
use crate::host::{Host, HostFactory};
use crate::types::{AdminQuery, ScanPhase, SystemRow};

/// Discovery through the system tables of the connected node
#[derive(Default)]
pub struct DefaultDiscoveryPolicy {
    context: RwLock<Option<Arc<DiscoveryContext>>>,
}

impl DefaultDiscoveryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.context.read().is_some()
    }

    fn context(&self) -> Result<Arc<DiscoveryContext>, DiscoveryError> {
        self.context
            .read()
            .clone()
            .ok_or(DiscoveryError::NotInitialized)
    }
}

#[async_trait]
impl DiscoveryPolicy for DefaultDiscoveryPolicy {
    fn init(&self, context: DiscoveryContext) {
        let mut bound = self.context.write();
        if bound.is_some() {
            warn!("Discovery policy initialized twice, replacing the previous context");
        }
        *bound = Some(Arc::new(context));
    }

    async fn scan(
        &self,
        factory: &dyn HostFactory,
        phase: ScanPhase,
    ) -> Result<DiscoveryInfo, DiscoveryError> {
        let ctx = self.context()?;
        let connection = ctx.connection()?;
        ctx.metrics.inc_scans();
        debug!("Starting {} scan through {}", phase, connection.address());

        let result = scan_tables(&ctx, connection.as_ref(), factory, phase).await;
        if let Err(e) = &result {
            ctx.metrics.inc_scans_failed();
            debug!("Scan through {} failed: {}", connection.address(), e);
        }
        result
    }

    async fn refresh_node_info(&self, host: &Arc<Host>) -> Result<bool, DiscoveryError> {
        let ctx = self.context()?;
        let connection = ctx.connection()?;
        ctx.metrics.inc_node_refreshes();

        let row = match fetch_row_for_host(&ctx, connection.as_ref(), host).await {
            Ok(row) => row,
            Err(e) if connection.is_defunct() => {
                debug!(
                    "Administrative connection is down, could not refresh node info for {}: {}",
                    host, e
                );
                return Ok(true);
            }
            Err(e) => return Err(e),
        };

        match row {
            Some(row) => {
                update_host_info(&ctx, host, &row, ScanPhase::Incremental);
                Ok(true)
            }
            // Row unreadable while the connection is down: keep the host
            None if connection.is_defunct() => {
                debug!(
                    "Administrative connection is down, could not refresh node info for {}",
                    host
                );
                Ok(true)
            }
            None => {
                warn!(
                    "No row found for host {} in {}'s peers system table. {} will be ignored.",
                    host,
                    connection.address(),
                    host
                );
                Ok(false)
            }
        }
    }

    fn close(&self) {
        if self.context.write().take().is_some() {
            debug!("Discovery policy closed");
        }
    }
}

// =============================================================================
// SCAN
// =============================================================================

async fn scan_tables(
    ctx: &DiscoveryContext,
    connection: &dyn AdminConnection,
    factory: &dyn HostFactory,
    phase: ScanPhase,
) -> Result<DiscoveryInfo, DiscoveryError> {
    let local = dispatch(connection, AdminQuery::Local)?;
    let peers = dispatch(connection, AdminQuery::Peers)?;
    let (local_rows, peer_rows) = futures::try_join!(local, peers)?;

    let mut info = DiscoveryInfoBuilder::default();
    info.connected(connection.address());

    if let Some(local_row) = local_rows.into_iter().next() {
        info.cluster(local_row.cluster_name.clone(), local_row.partitioner.clone());

        let connected_address = connection.address();
        match ctx.registry.get(&connected_address) {
            Some(connected_host) => {
                update_host_info(ctx, &connected_host, &local_row, phase);
                info.tokens(&connected_host, &local_row.tokens);
                info.schema_version(local_row.schema_version);
                info.host(&connected_host);
            }
            // Possible if the host was removed while this scan was running
            None => debug!(
                "Host in local system table ({}) unknown to us (ok if said host just got removed)",
                connected_address
            ),
        }
    }

    for peer_row in &peer_rows {
        let Some(peer_address) = resolve_peer_address(
            connection.address(),
            peer_row.listen_address(),
            peer_row.rpc_address(),
            ctx.protocol.port,
            ctx.translator.as_ref(),
        ) else {
            ctx.metrics.inc_peer_rows_skipped();
            continue;
        };

        // Several rows may resolve to one address: they share one host
        let known = info
            .known(&peer_address)
            .or_else(|| ctx.registry.get(&peer_address));
        let peer = match known {
            Some(peer) => peer,
            None => {
                debug!("New peer {} found in system.peers", peer_address);
                ctx.metrics.inc_hosts_created();
                factory.new_host(peer_address)
            }
        };

        update_host_info(ctx, &peer, peer_row, phase);
        info.tokens(&peer, &peer_row.tokens);
        if peer.is_up() {
            info.schema_version(peer_row.schema_version);
        }
        info.host(&peer);
    }

    let info = info.build();
    debug!(
        "Scan complete: {} hosts, {} token owners, {} schema versions",
        info.hosts().len(),
        info.token_map().len(),
        info.schema_versions().len()
    );
    Ok(info)
}

/// Write `query` and wrap its response errors
fn dispatch(
    connection: &dyn AdminConnection,
    query: AdminQuery,
) -> Result<impl Future<Output = Result<Vec<SystemRow>, DiscoveryError>>, DiscoveryError> {
    let pending: RowsFuture = connection
        .send(query)
        .map_err(|e| DiscoveryError::request_failed(query, e))?;
    Ok(async move {
        pending
            .await
            .map_err(|e| DiscoveryError::request_failed(query, e))
    })
}

// =============================================================================
// NODE REFRESH
// =============================================================================

async fn fetch_row_for_host(
    ctx: &DiscoveryContext,
    connection: &dyn AdminConnection,
    host: &Host,
) -> Result<Option<SystemRow>, DiscoveryError> {
    if connection.address() == host.address() {
        let rows = dispatch(connection, AdminQuery::Local)?.await?;
        return Ok(rows.into_iter().next());
    }

    if let Some(listen_address) = host.listen_address() {
        let rows = dispatch(connection, AdminQuery::Peer { listen_address })?.await?;
        return Ok(rows.into_iter().next());
    }

    // Listen address unknown: fetch the whole table and match on contact address
    let rows = dispatch(connection, AdminQuery::Peers)?.await?;
    Ok(rows.into_iter().find(|row| {
        resolve_peer_address(
            connection.address(),
            row.listen_address(),
            row.rpc_address(),
            ctx.protocol.port,
            ctx.translator.as_ref(),
        ) == Some(host.address())
    }))
}

// =============================================================================
// HOST METADATA
// =============================================================================

fn update_host_info(ctx: &DiscoveryContext, host: &Arc<Host>, row: &SystemRow, phase: ScanPhase) {
    if row.has_location() {
        update_location(ctx, host, row.data_center.clone(), row.rack.clone(), phase);
    }
    host.set_release_version(row.release_version.clone());
    if row.has_listen_column() {
        host.set_listen_address(row.listen_address());
    }
}

/// Apply a datacenter/rack change
///
/// Outside the initial scan the policy sees `on_down` with the old location
/// and `on_add` with the new one, never a host mid-move.
fn update_location(
    ctx: &DiscoveryContext,
    host: &Arc<Host>,
    datacenter: Option<String>,
    rack: Option<String>,
    phase: ScanPhase,
) {
    let current = host.location();
    if current.0 == datacenter && current.1 == rack {
        return;
    }

    if phase.notifies_policy() {
        info!(
            "Host {} moved from {:?}/{:?} to {:?}/{:?}",
            host, current.0, current.1, datacenter, rack
        );
        ctx.metrics.inc_location_changes();
        ctx.load_balancing.on_down(host);
        host.set_location(datacenter, rack);
        ctx.load_balancing.on_add(host);
    } else {
        host.set_location(datacenter, rack);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestError;
    use crate::fixture::{StaticClusterConnection, StaticConnectionProvider};
    use crate::host::{DefaultHostFactory, HostRegistry};
    use crate::metrics::DiscoveryMetrics;
    use crate::policy::IdentityTranslator;
    use crate::test_support::{PolicyEvent, RecordingPolicy};
    use crate::types::SystemTable;
    use crate::discovery::ProtocolOptions;
    use std::net::{IpAddr, SocketAddr};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    const CONNECTED: &str = "10.0.0.1:9042";

    struct Harness {
        policy: DefaultDiscoveryPolicy,
        connection: Arc<StaticClusterConnection>,
        provider: Arc<StaticConnectionProvider>,
        registry: Arc<HostRegistry>,
        load_balancing: Arc<RecordingPolicy>,
        metrics: Arc<DiscoveryMetrics>,
    }

    impl Harness {
        fn new() -> Self {
            let connection = Arc::new(StaticClusterConnection::new(addr(CONNECTED)));
            let provider = Arc::new(StaticConnectionProvider::new(connection.clone()));
            let registry = Arc::new(HostRegistry::new());
            let load_balancing = Arc::new(RecordingPolicy::default());
            let metrics = Arc::new(DiscoveryMetrics::new());

            registry.add_if_absent(Arc::new(Host::new(addr(CONNECTED))));

            let policy = DefaultDiscoveryPolicy::new();
            policy.init(DiscoveryContext {
                connections: provider.clone(),
                registry: registry.clone(),
                translator: Arc::new(IdentityTranslator),
                load_balancing: load_balancing.clone(),
                protocol: ProtocolOptions::default(),
                metrics: metrics.clone(),
            });

            Self {
                policy,
                connection,
                provider,
                registry,
                load_balancing,
                metrics,
            }
        }

        fn register(&self, address: &str) -> Arc<Host> {
            self.registry.add_if_absent(Arc::new(Host::new(addr(address)))).0
        }

        async fn scan(&self, phase: ScanPhase) -> DiscoveryInfo {
            self.policy.scan(&DefaultHostFactory, phase).await.unwrap()
        }
    }

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn ip(s: &str) -> Option<IpAddr> {
        Some(s.parse().unwrap())
    }

    fn local_row() -> SystemRow {
        SystemRow::local()
            .with_cluster("test", "Murmur3")
            .with_tokens(["100"])
    }

    fn peer_row(address: &str) -> SystemRow {
        SystemRow::peer(ip(address), ip(address))
    }

    #[tokio::test]
    async fn test_scan_self_and_peer() {
        let h = Harness::new();
        h.connection.set_local(Some(local_row()));
        h.connection.set_peers(vec![peer_row("10.0.0.2")
            .with_location(Some("dc1"), None)
            .with_tokens(["200"])]);

        let info = h.scan(ScanPhase::Initial).await;

        assert_eq!(info.connected_address(), Some(addr(CONNECTED)));
        assert_eq!(info.cluster_name(), Some("test"));
        assert_eq!(info.partitioner(), Some("Murmur3"));
        assert_eq!(info.hosts().len(), 2);
        assert_eq!(info.token_map().len(), 2);
        assert_eq!(info.hosts()[0].address(), addr(CONNECTED));

        let peer = &info.hosts()[1];
        assert_eq!(peer.address(), addr("10.0.0.2:9042"));
        assert_eq!(peer.datacenter().as_deref(), Some("dc1"));
        assert_eq!(peer.listen_address(), ip("10.0.0.2"));

        // New peers are created but not registered
        assert!(!h.registry.contains(&peer.address()));
        assert_eq!(h.metrics.hosts_created.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_scan_dispatches_both_queries_first() {
        let h = Harness::new();
        h.connection.set_local(Some(local_row()));

        h.scan(ScanPhase::Initial).await;

        assert_eq!(
            h.connection.sent_queries(),
            vec![AdminQuery::Local, AdminQuery::Peers]
        );
    }

    #[tokio::test]
    async fn test_peers_sent_before_local_response_awaited() {
        let h = Harness::new();
        h.connection.set_local(Some(local_row()));
        h.connection.fail_responses(SystemTable::Local, Some(RequestError::ConnectionClosed));

        let err = h.policy.scan(&DefaultHostFactory, ScanPhase::Initial).await.unwrap_err();

        assert!(matches!(
            err,
            DiscoveryError::RequestFailed { query: AdminQuery::Local, .. }
        ));
        assert_eq!(
            h.connection.sent_queries(),
            vec![AdminQuery::Local, AdminQuery::Peers]
        );
    }

    /// Host factory counting the hosts it creates
    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
    }

    impl HostFactory for CountingFactory {
        fn new_host(&self, address: SocketAddr) -> Arc<Host> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Arc::new(Host::new(address))
        }
    }

    #[tokio::test]
    async fn test_rows_sharing_an_address_share_one_host() {
        let h = Harness::new();
        h.connection.set_local(Some(local_row()));
        h.connection.set_peers(vec![
            SystemRow::peer(ip("192.168.0.2"), ip("10.0.0.2"))
                .with_location(Some("dc1"), None)
                .with_tokens(["1"]),
            SystemRow::peer(ip("192.168.0.2"), ip("10.0.0.2"))
                .with_location(Some("dc2"), None)
                .with_tokens(["2"]),
        ]);

        let factory = CountingFactory::default();
        let info = h.policy.scan(&factory, ScanPhase::Incremental).await.unwrap();

        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(info.hosts().len(), 2);

        let peer = info.hosts()[1].clone();
        assert_eq!(peer.address(), addr("10.0.0.2:9042"));
        assert_eq!(peer.datacenter().as_deref(), Some("dc2"));
        assert_eq!(peer.listen_address(), ip("192.168.0.2"));

        let tokens: Vec<_> = info.token_map()[&peer].iter().cloned().collect();
        assert_eq!(tokens, vec!["2".to_string()]);

        // Every notification reaches the one host, in row order
        assert_eq!(
            h.load_balancing.events(),
            vec![
                PolicyEvent::Down(peer.address(), None),
                PolicyEvent::Add(peer.address(), Some("dc1".to_string())),
                PolicyEvent::Down(peer.address(), Some("dc1".to_string())),
                PolicyEvent::Add(peer.address(), Some("dc2".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn test_wildcard_rpc_address_uses_listen_address() {
        let h = Harness::new();
        h.connection.set_peers(vec![SystemRow::peer(ip("10.0.0.3"), ip("0.0.0.0"))]);

        let info = h.scan(ScanPhase::Initial).await;

        assert_eq!(info.hosts().len(), 1);
        assert_eq!(info.hosts()[0].address(), addr("10.0.0.3:9042"));
    }

    #[tokio::test]
    async fn test_self_referencing_peer_row_excluded() {
        let h = Harness::new();
        h.connection.set_local(Some(local_row()));
        h.connection.set_peers(vec![
            SystemRow::peer(ip("10.0.0.9"), ip("10.0.0.1")),
            peer_row("10.0.0.2"),
            SystemRow::peer(ip("10.0.0.5"), None),
        ]);

        let info = h.scan(ScanPhase::Initial).await;

        let addresses: Vec<_> = info.hosts().iter().map(|h| h.address()).collect();
        assert_eq!(addresses, vec![addr(CONNECTED), addr("10.0.0.2:9042")]);
        assert_eq!(h.metrics.peer_rows_skipped.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_no_tokens_without_partitioner() {
        let h = Harness::new();
        h.connection.set_local(Some(SystemRow::local().with_tokens(["100"])));
        h.connection.set_peers(vec![peer_row("10.0.0.2").with_tokens(["200"])]);

        let info = h.scan(ScanPhase::Initial).await;

        assert_eq!(info.partitioner(), None);
        assert_eq!(info.hosts().len(), 2);
        assert!(info.token_map().is_empty());
    }

    #[tokio::test]
    async fn test_empty_tokens_not_mapped() {
        let h = Harness::new();
        h.connection.set_local(Some(SystemRow::local().with_cluster("test", "Murmur3")));
        h.connection.set_peers(vec![peer_row("10.0.0.2").with_tokens(["200"])]);

        let info = h.scan(ScanPhase::Initial).await;

        assert_eq!(info.token_map().len(), 1);
        for (host, tokens) in info.token_map() {
            assert_eq!(host.address(), addr("10.0.0.2:9042"));
            assert!(!tokens.is_empty());
        }
    }

    #[tokio::test]
    async fn test_schema_versions_only_from_up_hosts() {
        let h = Harness::new();
        let up = h.register("10.0.0.2:9042");
        up.set_up();
        let down = h.register("10.0.0.3:9042");
        down.set_down();

        let local_version = Uuid::new_v4();
        let up_version = Uuid::new_v4();
        let down_version = Uuid::new_v4();
        h.connection.set_local(Some(local_row().with_schema_version(local_version)));
        h.connection.set_peers(vec![
            peer_row("10.0.0.2").with_schema_version(up_version),
            peer_row("10.0.0.3").with_schema_version(down_version),
            peer_row("10.0.0.4").with_schema_version(Uuid::new_v4()),
            peer_row("10.0.0.5"),
        ]);

        let info = h.scan(ScanPhase::Incremental).await;

        // 10.0.0.4 is a brand new host, not up yet
        let expected: std::collections::BTreeSet<_> =
            [local_version, up_version].into_iter().collect();
        assert_eq!(info.schema_versions(), &expected);
        assert_eq!(info.hosts().len(), 5);
    }

    #[tokio::test]
    async fn test_location_change_notifies_down_then_add() {
        let h = Harness::new();
        let peer = h.register("10.0.0.2:9042");
        peer.set_location(Some("dc1".to_string()), Some("r1".to_string()));
        h.connection.set_peers(vec![peer_row("10.0.0.2").with_location(Some("dc2"), Some("r1"))]);

        h.scan(ScanPhase::Incremental).await;

        assert_eq!(
            h.load_balancing.events(),
            vec![
                PolicyEvent::Down(peer.address(), Some("dc1".to_string())),
                PolicyEvent::Add(peer.address(), Some("dc2".to_string())),
            ]
        );
        assert_eq!(peer.datacenter().as_deref(), Some("dc2"));
        assert_eq!(h.metrics.location_changes.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_unchanged_location_is_silent() {
        let h = Harness::new();
        let peer = h.register("10.0.0.2:9042");
        peer.set_location(Some("dc1".to_string()), Some("r1".to_string()));
        h.connection.set_peers(vec![peer_row("10.0.0.2").with_location(Some("dc1"), Some("r1"))]);

        h.scan(ScanPhase::Incremental).await;

        assert!(h.load_balancing.events().is_empty());
    }

    #[tokio::test]
    async fn test_initial_scan_updates_location_silently() {
        let h = Harness::new();
        let connected = h.registry.get(&addr(CONNECTED)).unwrap();
        let peer = h.register("10.0.0.2:9042");
        peer.set_location(Some("dc1".to_string()), None);
        h.connection.set_local(Some(local_row().with_location(Some("dc9"), Some("r9"))));
        h.connection.set_peers(vec![peer_row("10.0.0.2").with_location(Some("dc2"), None)]);

        h.scan(ScanPhase::Initial).await;

        assert!(h.load_balancing.events().is_empty());
        assert_eq!(peer.datacenter().as_deref(), Some("dc2"));
        assert_eq!(connected.location(), (Some("dc9".to_string()), Some("r9".to_string())));
    }

    #[tokio::test]
    async fn test_row_without_location_keeps_location() {
        let h = Harness::new();
        let peer = h.register("10.0.0.2:9042");
        peer.set_location(Some("dc1".to_string()), Some("r1".to_string()));
        h.connection.set_peers(vec![peer_row("10.0.0.2").with_release_version("4.0.1")]);

        h.scan(ScanPhase::Incremental).await;

        assert_eq!(peer.location(), (Some("dc1".to_string()), Some("r1".to_string())));
        assert_eq!(peer.release_version().as_deref(), Some("4.0.1"));
        assert!(h.load_balancing.events().is_empty());
    }

    #[tokio::test]
    async fn test_local_row_leaves_listen_address() {
        let h = Harness::new();
        let connected = h.registry.get(&addr(CONNECTED)).unwrap();
        connected.set_listen_address(ip("192.168.0.1"));
        h.connection.set_local(Some(local_row()));

        h.scan(ScanPhase::Incremental).await;

        assert_eq!(connected.listen_address(), ip("192.168.0.1"));
    }

    #[tokio::test]
    async fn test_connected_host_missing_from_registry() {
        let h = Harness::new();
        h.registry.remove(&addr(CONNECTED));
        h.connection.set_local(Some(local_row()));
        h.connection.set_peers(vec![peer_row("10.0.0.2").with_tokens(["200"])]);

        let info = h.scan(ScanPhase::Incremental).await;

        assert_eq!(info.cluster_name(), Some("test"));
        assert_eq!(info.hosts().len(), 1);
        assert_eq!(info.hosts()[0].address(), addr("10.0.0.2:9042"));
    }

    #[tokio::test]
    async fn test_local_row_processed_first_despite_late_response() {
        let h = Harness::new();
        h.connection.set_latency(SystemTable::Local, Duration::from_millis(50));
        h.connection.set_local(Some(local_row()));
        h.connection.set_peers(vec![peer_row("10.0.0.2"), peer_row("10.0.0.3")]);

        let info = h.scan(ScanPhase::Initial).await;

        let addresses: Vec<_> = info.hosts().iter().map(|h| h.address()).collect();
        assert_eq!(
            addresses,
            vec![addr(CONNECTED), addr("10.0.0.2:9042"), addr("10.0.0.3:9042")]
        );
    }

    #[tokio::test]
    async fn test_scan_fails_when_either_request_fails() {
        let h = Harness::new();
        h.connection.set_local(Some(local_row()));
        h.connection.fail_responses(SystemTable::Peers, Some(RequestError::ConnectionClosed));

        let err = h.policy.scan(&DefaultHostFactory, ScanPhase::Initial).await.unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::RequestFailed { query: AdminQuery::Peers, .. }
        ));

        h.connection.fail_responses(SystemTable::Peers, None);
        h.connection.fail_writes(Some(RequestError::Busy));
        let err = h.policy.scan(&DefaultHostFactory, ScanPhase::Initial).await.unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::RequestFailed { query: AdminQuery::Local, source: RequestError::Busy }
        ));
        assert_eq!(h.metrics.scans_failed.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_scan_without_connection() {
        let h = Harness::new();
        h.provider.set(None);

        let err = h.policy.scan(&DefaultHostFactory, ScanPhase::Initial).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Unavailable));
        assert!(h.connection.sent_queries().is_empty());
    }

    #[tokio::test]
    async fn test_not_initialized_and_close() {
        let policy = DefaultDiscoveryPolicy::new();
        let err = policy.scan(&DefaultHostFactory, ScanPhase::Initial).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::NotInitialized));

        let h = Harness::new();
        assert!(h.policy.is_initialized());
        h.policy.close();
        h.policy.close();
        assert!(!h.policy.is_initialized());

        let host = h.register("10.0.0.2:9042");
        let err = h.policy.refresh_node_info(&host).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::NotInitialized));
    }

    #[tokio::test]
    async fn test_refresh_connected_host_uses_local_table() {
        let h = Harness::new();
        let connected = h.registry.get(&addr(CONNECTED)).unwrap();
        h.connection.set_local(Some(local_row().with_release_version("4.1.0")));

        assert!(h.policy.refresh_node_info(&connected).await.unwrap());

        assert_eq!(h.connection.sent_queries(), vec![AdminQuery::Local]);
        assert_eq!(connected.release_version().as_deref(), Some("4.1.0"));
    }

    #[tokio::test]
    async fn test_refresh_by_listen_address() {
        let h = Harness::new();
        let peer = h.register("10.0.0.2:9042");
        peer.set_listen_address(ip("192.168.0.2"));
        peer.set_location(Some("dc1".to_string()), None);
        h.connection.set_peers(vec![SystemRow::peer(ip("192.168.0.2"), ip("10.0.0.2"))
            .with_location(Some("dc2"), None)]);

        assert!(h.policy.refresh_node_info(&peer).await.unwrap());

        assert_eq!(
            h.connection.sent_queries(),
            vec![AdminQuery::Peer { listen_address: "192.168.0.2".parse().unwrap() }]
        );
        assert_eq!(peer.datacenter().as_deref(), Some("dc2"));
        // Refreshes are always incremental
        assert_eq!(h.load_balancing.events().len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_by_full_scan() {
        let h = Harness::new();
        let peer = h.register("10.0.0.3:9042");
        h.connection.set_peers(vec![
            peer_row("10.0.0.2"),
            SystemRow::peer(ip("192.168.0.3"), ip("10.0.0.3")).with_release_version("3.11.4"),
        ]);

        assert!(h.policy.refresh_node_info(&peer).await.unwrap());

        assert_eq!(h.connection.sent_queries(), vec![AdminQuery::Peers]);
        assert_eq!(peer.release_version().as_deref(), Some("3.11.4"));
        assert_eq!(peer.listen_address(), ip("192.168.0.3"));
    }

    #[tokio::test]
    async fn test_refresh_missing_row_on_healthy_connection() {
        let h = Harness::new();
        let peer = h.register("10.0.0.7:9042");
        h.connection.set_peers(vec![peer_row("10.0.0.2")]);

        assert!(!h.policy.refresh_node_info(&peer).await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_missing_row_on_defunct_connection() {
        let h = Harness::new();
        let peer = h.register("10.0.0.7:9042");
        peer.set_location(Some("dc1".to_string()), None);
        h.connection.set_defunct(true);

        assert!(h.policy.refresh_node_info(&peer).await.unwrap());
        assert_eq!(peer.datacenter().as_deref(), Some("dc1"));
        assert!(h.load_balancing.events().is_empty());

        h.connection.fail_responses(SystemTable::Peers, Some(RequestError::ConnectionClosed));
        assert!(h.policy.refresh_node_info(&peer).await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_request_failure_on_healthy_connection() {
        let h = Harness::new();
        let peer = h.register("10.0.0.7:9042");
        h.connection.fail_responses(
            SystemTable::Peers,
            Some(RequestError::Server("overloaded".to_string())),
        );

        let err = h.policy.refresh_node_info(&peer).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::RequestFailed { .. }));
    }

    #[tokio::test]
    async fn test_refresh_without_connection() {
        let h = Harness::new();
        let peer = h.register("10.0.0.2:9042");
        h.provider.set(None);

        let err = h.policy.refresh_node_info(&peer).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Unavailable));
    }
}
