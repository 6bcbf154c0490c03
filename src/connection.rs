//! Administrative Connection
//!
//! The discovery engine never owns a connection. It asks a provider for the
//! current administrative connection and issues queries over it.
//!
//! `send` writes the request before returning; the returned future only
//! waits for the response. Two requests can therefore be in flight before
//! either is awaited.

use futures::future::BoxFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::RequestError;
use crate::types::{AdminQuery, SystemRow};

/// Pending response to an administrative query
pub type RowsFuture = BoxFuture<'static, Result<Vec<SystemRow>, RequestError>>;

/// Connection used for topology and schema introspection
pub trait AdminConnection: Send + Sync {
    /// Remote address of the connected node
    fn address(&self) -> SocketAddr;

    /// Whether the connection has failed and will not recover
    fn is_defunct(&self) -> bool;

    /// Write `query` to the connection
    ///
    /// Fails immediately if the request cannot be written.
    fn send(&self, query: AdminQuery) -> Result<RowsFuture, RequestError>;
}

/// Source of the current administrative connection
pub trait ConnectionProvider: Send + Sync {
    fn admin_connection(&self) -> Option<Arc<dyn AdminConnection>>;
}
