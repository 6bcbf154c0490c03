//! Discovery Errors
//!
//! Failures of administrative requests and of the discovery engine.

use crate::types::AdminQuery;

/// Network-level failure of one administrative request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// Connection closed before the response arrived
    #[error("connection closed")]
    ConnectionClosed,

    /// No free stream for a new request
    #[error("connection busy")]
    Busy,

    /// Write or read failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Error response from the node
    #[error("server error: {0}")]
    Server(String),
}

/// Errors returned by the discovery engine
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// Called before `init` or after `close`
    #[error("discovery policy is not initialized")]
    NotInitialized,

    /// No administrative connection available
    #[error("no administrative connection available")]
    Unavailable,

    /// Administrative request failed at the network layer
    #[error("administrative query on {query} failed: {source}")]
    RequestFailed {
        query: AdminQuery,
        #[source]
        source: RequestError,
    },
}

impl DiscoveryError {
    /// Request failure for `query`
    pub fn request_failed(query: AdminQuery, source: RequestError) -> Self {
        DiscoveryError::RequestFailed { query, source }
    }

    /// Whether another administrative connection may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DiscoveryError::Unavailable | DiscoveryError::RequestFailed { .. }
        )
    }
}
