//! Connection lifecycle management.
//!
//! The pool is generic over how connections are created and validated so it
//! can be exercised without a server. [`AseConnector`] is the production
//! implementation, dialing the configured server and logging in.

use ase_client::{ConnectionConfig, Dialog};
use tokio::net::TcpStream;

use crate::error::PoolError;

/// Creates new connections for the pool.
///
/// `#[async_trait]` is used for object safety so pools over different
/// connector types can share infrastructure.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The connection type this connector produces.
    type Connection: PoolableConnection;

    /// Establish and authenticate a new connection.
    async fn connect(&self) -> Result<Self::Connection, PoolError>;
}

#[async_trait::async_trait]
impl<C: Connector> Connector for std::sync::Arc<C> {
    type Connection = C::Connection;

    async fn connect(&self) -> Result<Self::Connection, PoolError> {
        (**self).connect().await
    }
}

/// Operations the pool needs from a pooled connection.
#[async_trait::async_trait]
pub trait PoolableConnection: Send + 'static {
    /// Verify the connection is alive by executing a lightweight query.
    async fn ping(&mut self, query: &str) -> Result<(), PoolError>;

    /// Check if the connection is still valid for use.
    ///
    /// A lighter-weight check than [`ping`](Self::ping); no server round
    /// trip is made.
    fn is_valid(&self) -> bool;
}

/// Production connector: dials the configured ASE server and logs in.
#[derive(Debug, Clone)]
pub struct AseConnector {
    config: ConnectionConfig,
}

impl AseConnector {
    /// Create a connector for the given connection configuration.
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// The connection configuration used for new connections.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl Connector for AseConnector {
    type Connection = Dialog<TcpStream>;

    async fn connect(&self) -> Result<Self::Connection, PoolError> {
        Dialog::connect(&self.config)
            .await
            .map_err(|e| PoolError::ConnectionCreation(e.to_string()))
    }
}

#[async_trait::async_trait]
impl PoolableConnection for Dialog<TcpStream> {
    async fn ping(&mut self, query: &str) -> Result<(), PoolError> {
        self.execute(query)
            .await
            .map(drop)
            .map_err(|e| PoolError::UnhealthyConnection(e.to_string()))
    }

    fn is_valid(&self) -> bool {
        self.is_usable()
    }
}
