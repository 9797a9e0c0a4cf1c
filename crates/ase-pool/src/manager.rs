//! Pool registry keyed by connection configuration.
//!
//! Applications that open connections to several servers or databases can
//! route every acquisition through one manager; interchangeable
//! configurations (same server, database, login and charset) share a pool.

use ase_client::ConnectionConfig;
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::AseConnector;
use crate::pool::{Pool, PooledConnection};

/// Manages one pool per distinct connection configuration.
pub struct PoolManager {
    pool_config: PoolConfig,
    pools: Mutex<HashMap<String, Pool<AseConnector>>>,
}

impl PoolManager {
    /// Create a manager applying the given pool configuration to every
    /// pool it opens.
    #[must_use]
    pub fn new(pool_config: PoolConfig) -> Self {
        Self {
            pool_config,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Get a connection for the given configuration, creating its pool on
    /// first use.
    ///
    /// A configuration with pooling disabled gets a dedicated connection
    /// that is closed on release instead of returning to any pool.
    pub async fn get(
        &self,
        config: &ConnectionConfig,
    ) -> Result<PooledConnection<AseConnector>, PoolError> {
        if !config.pooling {
            let single = self
                .pool_config
                .clone()
                .min_connections(0)
                .max_connections(1)
                .connection_timeout(config.timeouts.login_timeout);
            let pool = Pool::new(AseConnector::new(config.clone()), single).await?;
            let conn = pool.get().await?;
            pool.close();
            return Ok(conn);
        }
        self.pool_for(config).await?.get().await
    }

    /// Get or create the pool for a configuration.
    pub async fn pool_for(&self, config: &ConnectionConfig) -> Result<Pool<AseConnector>, PoolError> {
        let key = config.pool_key();

        if let Some(pool) = self.pools.lock().get(&key) {
            return Ok(pool.clone());
        }

        let mut pool_config = self.pool_config.clone();
        if let Some(min) = config.min_pool_size {
            pool_config = pool_config.min_connections(min);
        }
        if let Some(max) = config.max_pool_size {
            pool_config = pool_config.max_connections(max);
        }
        // The descriptor's login timeout bounds waiting for a slot too, so
        // a full pool fails in the same time a slow login would.
        pool_config = pool_config.connection_timeout(config.timeouts.login_timeout);

        // Built outside the lock; min connections may dial the server.
        // When two tasks race, the loser's pool is dropped unused.
        let pool = Pool::new(AseConnector::new(config.clone()), pool_config).await?;
        Ok(self
            .pools
            .lock()
            .entry(key)
            .or_insert(pool)
            .clone())
    }

    /// Number of distinct pools currently open.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.lock().len()
    }

    /// Close every pool and forget it.
    pub fn close_all(&self) {
        let mut pools = self.pools.lock();
        for pool in pools.values() {
            pool.close();
        }
        pools.clear();
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("pool_count", &self.pool_count())
            .finish_non_exhaustive()
    }
}
