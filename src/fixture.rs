//! Static Cluster Connection
//!
//! An administrative connection answering from an in-memory copy of the
//! system tables. The tables can be loaded from a TOML file, which is
//! re-read on every request when watched, and failures or latency can be
//! injected per table.
//!
//! ## File format
//!
//! ```toml
//! address = "10.0.0.1:9042"
//!
//! [local]
//! cluster_name = "test"
//! partitioner = "org.apache.cassandra.dht.Murmur3Partitioner"
//! tokens = ["100"]
//!
//! [[peers]]
//! peer = "10.0.0.2"
//! rpc_address = "10.0.0.2"
//! data_center = "dc1"
//! tokens = ["200"]
//! ```

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::connection::{AdminConnection, ConnectionProvider, RowsFuture};
use crate::error::RequestError;
use crate::types::{AdminQuery, PeerColumns, SystemRow, SystemTable};

// =============================================================================
// FILE FORMAT
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FixtureFile {
    address: SocketAddr,
    #[serde(default)]
    local: Option<SystemRow>,
    #[serde(default)]
    peers: Vec<PeerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PeerEntry {
    #[serde(default)]
    peer: Option<IpAddr>,
    #[serde(default)]
    rpc_address: Option<IpAddr>,
    #[serde(flatten)]
    row: SystemRow,
}

impl From<PeerEntry> for SystemRow {
    fn from(entry: PeerEntry) -> Self {
        SystemRow {
            peer_columns: Some(PeerColumns {
                peer: entry.peer,
                rpc_address: entry.rpc_address,
            }),
            ..entry.row
        }
    }
}

/// Contents of the two system tables
#[derive(Debug, Clone, Default)]
struct Tables {
    local: Option<SystemRow>,
    peers: Vec<SystemRow>,
}

fn parse_fixture(content: &str) -> anyhow::Result<(SocketAddr, Tables)> {
    let file: FixtureFile = toml::from_str(content)?;
    let local = file.local.map(|row| SystemRow {
        peer_columns: None,
        ..row
    });
    let peers = file.peers.into_iter().map(SystemRow::from).collect();
    Ok((file.address, Tables { local, peers }))
}

// =============================================================================
// CONNECTION
// =============================================================================

/// Administrative connection backed by static system tables
pub struct StaticClusterConnection {
    address: SocketAddr,
    tables: RwLock<Tables>,
    source: RwLock<Option<PathBuf>>,
    defunct: AtomicBool,
    write_failure: RwLock<Option<RequestError>>,
    response_failures: RwLock<HashMap<SystemTable, RequestError>>,
    latency: RwLock<HashMap<SystemTable, Duration>>,
    sent: Mutex<Vec<AdminQuery>>,
}

impl StaticClusterConnection {
    /// Connection to `address` with empty system tables
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            tables: RwLock::new(Tables::default()),
            source: RwLock::new(None),
            defunct: AtomicBool::new(false),
            write_failure: RwLock::new(None),
            response_failures: RwLock::new(HashMap::new()),
            latency: RwLock::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Parse a cluster description
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let (address, tables) = parse_fixture(content)?;
        let connection = Self::new(address);
        *connection.tables.write() = tables;
        Ok(connection)
    }

    /// Load a cluster description from a TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Re-read `path` before answering each request
    pub fn watch(&self, path: &Path) {
        *self.source.write() = Some(path.to_path_buf());
    }

    pub fn set_local(&self, row: Option<SystemRow>) {
        self.tables.write().local = row;
    }

    pub fn set_peers(&self, rows: Vec<SystemRow>) {
        self.tables.write().peers = rows;
    }

    pub fn set_defunct(&self, defunct: bool) {
        self.defunct.store(defunct, Ordering::SeqCst);
    }

    /// Make every `send` fail before the request is written
    pub fn fail_writes(&self, error: Option<RequestError>) {
        *self.write_failure.write() = error;
    }

    /// Make responses for `table` fail
    pub fn fail_responses(&self, table: SystemTable, error: Option<RequestError>) {
        let mut failures = self.response_failures.write();
        match error {
            Some(error) => failures.insert(table, error),
            None => failures.remove(&table),
        };
    }

    /// Delay responses for `table`
    pub fn set_latency(&self, table: SystemTable, latency: Duration) {
        self.latency.write().insert(table, latency);
    }

    /// Queries sent so far, in order
    pub fn sent_queries(&self) -> Vec<AdminQuery> {
        self.sent.lock().clone()
    }

    fn reload(&self) {
        let Some(path) = self.source.read().clone() else {
            return;
        };

        match std::fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|content| parse_fixture(&content))
        {
            Ok((address, tables)) => {
                if address != self.address {
                    warn!(
                        "Fixture {:?} now describes {}, still answering as {}",
                        path, address, self.address
                    );
                }
                *self.tables.write() = tables;
            }
            Err(e) => warn!("Failed to reload fixture {:?}: {}", path, e),
        }
    }

    fn rows_for(&self, query: AdminQuery) -> Vec<SystemRow> {
        let tables = self.tables.read();
        match query {
            AdminQuery::Local => tables.local.iter().cloned().collect(),
            AdminQuery::Peers => tables.peers.clone(),
            AdminQuery::Peer { listen_address } => tables
                .peers
                .iter()
                .filter(|row| row.listen_address() == Some(listen_address))
                .cloned()
                .collect(),
        }
    }
}

impl AdminConnection for StaticClusterConnection {
    fn address(&self) -> SocketAddr {
        self.address
    }

    fn is_defunct(&self) -> bool {
        self.defunct.load(Ordering::SeqCst)
    }

    fn send(&self, query: AdminQuery) -> Result<RowsFuture, RequestError> {
        self.sent.lock().push(query);

        if let Some(error) = self.write_failure.read().clone() {
            return Err(error);
        }

        self.reload();

        let table = query.table();
        let outcome = match self.response_failures.read().get(&table) {
            Some(error) => Err(error.clone()),
            None => Ok(self.rows_for(query)),
        };
        let latency = self.latency.read().get(&table).copied();

        debug!("Sent {} to {}", query.cql(), self.address);

        Ok(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            outcome
        }
        .boxed())
    }
}

// =============================================================================
// PROVIDER
// =============================================================================

/// Provider handing out one static connection, or none
#[derive(Default)]
pub struct StaticConnectionProvider {
    connection: RwLock<Option<Arc<StaticClusterConnection>>>,
}

impl StaticConnectionProvider {
    pub fn new(connection: Arc<StaticClusterConnection>) -> Self {
        Self {
            connection: RwLock::new(Some(connection)),
        }
    }

    /// Provider with no connection available
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set(&self, connection: Option<Arc<StaticClusterConnection>>) {
        *self.connection.write() = connection;
    }
}

impl ConnectionProvider for StaticConnectionProvider {
    fn admin_connection(&self) -> Option<Arc<dyn AdminConnection>> {
        self.connection
            .read()
            .clone()
            .map(|c| c as Arc<dyn AdminConnection>)
    }
}
