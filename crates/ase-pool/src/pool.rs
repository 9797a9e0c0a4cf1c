//! Connection pool implementation.

// Allow expect() on Option that is guaranteed to be Some based on prior logic
#![allow(clippy::expect_used)]

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{Connector, PoolableConnection};

/// An idle connection with its age bookkeeping.
struct IdleConn<T> {
    conn: T,
    idle_since: Instant,
    created_at: Instant,
}

impl<T> IdleConn<T> {
    fn expired(&self, config: &PoolConfig) -> bool {
        self.idle_since.elapsed() >= config.idle_timeout
            || self.created_at.elapsed() >= config.max_lifetime
    }
}

struct PoolInner<C>
where
    C: Connector,
{
    connector: C,
    config: PoolConfig,
    /// Bounds the number of checked-out connections.
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConn<C::Connection>>>,
    closed: AtomicBool,
}

impl<C> PoolInner<C>
where
    C: Connector,
{
    fn reap_expired(&self) {
        let mut idle = self.idle.lock();
        let before = idle.len();
        idle.retain(|conn| !conn.expired(&self.config));
        let reaped = before - idle.len();
        if reaped > 0 {
            tracing::debug!(reaped, remaining = idle.len(), "reaped expired idle connections");
        }
    }
}

/// A connection pool for ASE.
///
/// The pool keeps a bounded set of authenticated dialogs, reissuing idle
/// ones and creating new ones up to the configured maximum. Checked-out
/// connections return to the pool on drop; connections whose dialog became
/// unusable, or that exceeded their lifetime, are discarded instead.
///
/// # Example
///
/// ```rust,ignore
/// use ase_driver_pool::{AseConnector, Pool, PoolConfig};
/// use ase_client::ConnectionConfig;
///
/// let connector = AseConnector::new(
///     ConnectionConfig::new("ase.example.com").username("sa").password("secret"),
/// );
/// let pool = Pool::new(connector, PoolConfig::new().max_connections(20)).await?;
///
/// let mut conn = pool.get().await?;
/// conn.execute("select 1").await?;
/// // Returned to the pool on drop.
/// ```
pub struct Pool<C>
where
    C: Connector,
{
    inner: Arc<PoolInner<C>>,
}

impl<C> Clone for Pool<C>
where
    C: Connector,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> Pool<C>
where
    C: Connector,
{
    /// Create a pool, eagerly opening the configured minimum number of
    /// connections.
    pub async fn new(connector: C, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let inner = Arc::new(PoolInner {
            semaphore: Arc::new(Semaphore::new(config.max_connections as usize)),
            idle: Mutex::new(VecDeque::with_capacity(config.max_connections as usize)),
            closed: AtomicBool::new(false),
            connector,
            config,
        });

        for _ in 0..inner.config.min_connections {
            let conn = inner.connector.connect().await?;
            inner.idle.lock().push_back(IdleConn {
                conn,
                idle_since: Instant::now(),
                created_at: Instant::now(),
            });
        }

        Self::spawn_reaper(&inner);

        Ok(Self { inner })
    }

    /// Background task pruning idle connections past their timeouts. Holds
    /// only a weak reference so dropping the last pool handle stops it.
    fn spawn_reaper(inner: &Arc<PoolInner<C>>) {
        let weak: Weak<PoolInner<C>> = Arc::downgrade(inner);
        let interval = inner.config.reap_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else { break };
                if inner.closed.load(Ordering::Acquire) {
                    break;
                }
                inner.reap_expired();
            }
        });
    }

    /// Get a connection from the pool.
    ///
    /// Returns an idle connection when a healthy one is available, creates
    /// a new one while under the maximum, and otherwise waits until a
    /// connection is returned or the acquisition timeout elapses.
    pub async fn get(&self) -> Result<PooledConnection<C>, PoolError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::PoolClosed);
        }

        let timeout = self.inner.config.connection_timeout;
        let permit = tokio::time::timeout(
            timeout,
            Arc::clone(&self.inner.semaphore).acquire_owned(),
        )
        .await
        .map_err(|_| PoolError::AcquisitionTimeout(timeout))?
        .map_err(|_| PoolError::PoolClosed)?;

        // Prefer idle connections, discarding any that expired or died
        // while parked.
        loop {
            let candidate = self.inner.idle.lock().pop_front();
            let Some(mut idle) = candidate else { break };

            if idle.expired(&self.inner.config) || !idle.conn.is_valid() {
                tracing::trace!("discarding expired idle connection");
                continue;
            }
            if self.inner.config.test_on_checkout {
                if let Err(e) = idle.conn.ping(&self.inner.config.health_check_query).await {
                    tracing::debug!(error = %e, "idle connection failed health check");
                    continue;
                }
            }
            return Ok(PooledConnection {
                conn: Some(idle.conn),
                created_at: idle.created_at,
                pool: Arc::clone(&self.inner),
                _permit: permit,
            });
        }

        let conn = self.inner.connector.connect().await?;
        tracing::debug!("created new pooled connection");
        Ok(PooledConnection {
            conn: Some(conn),
            created_at: Instant::now(),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let available = self.inner.idle.lock().len() as u32;
        let max = self.inner.config.max_connections;
        let in_use = max.saturating_sub(self.inner.semaphore.available_permits() as u32);
        PoolStatus {
            available,
            in_use,
            total: available + in_use,
            max,
        }
    }

    /// Close the pool, dropping all idle connections.
    ///
    /// Waiters blocked in [`get`](Self::get) fail with
    /// [`PoolError::PoolClosed`]; checked-out connections are dropped
    /// instead of returned.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.semaphore.close();
        self.inner.idle.lock().clear();
        tracing::info!("connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl<C> std::fmt::Debug for Pool<C>
where
    C: Connector,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("Pool")
            .field("available", &status.available)
            .field("in_use", &status.in_use)
            .field("max", &status.max)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently checked out.
    pub in_use: u32,
    /// Total number of connections.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

/// A connection checked out from the pool.
///
/// Dereferences to the underlying connection. When dropped, the connection
/// is returned to the pool if it is still usable and within its lifetime.
pub struct PooledConnection<C>
where
    C: Connector,
{
    /// `Some` until returned to the pool or detached.
    conn: Option<C::Connection>,
    created_at: Instant,
    pool: Arc<PoolInner<C>>,
    _permit: OwnedSemaphorePermit,
}

impl<C> PooledConnection<C>
where
    C: Connector,
{
    /// Detach the connection from the pool.
    ///
    /// The connection will not be returned when dropped and its pool slot
    /// is released immediately.
    #[must_use]
    pub fn detach(mut self) -> C::Connection {
        self.conn.take().expect("connection present until detach or drop")
    }
}

impl<C> std::fmt::Debug for PooledConnection<C>
where
    C: Connector,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").finish_non_exhaustive()
    }
}

impl<C> Deref for PooledConnection<C>
where
    C: Connector,
{
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection present until detach or drop")
    }
}

impl<C> DerefMut for PooledConnection<C>
where
    C: Connector,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection present until detach or drop")
    }
}

impl<C> Drop for PooledConnection<C>
where
    C: Connector,
{
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else { return };

        if self.pool.closed.load(Ordering::Acquire) {
            return;
        }
        if !conn.is_valid() {
            tracing::debug!("dropping unusable connection instead of pooling it");
            return;
        }
        if self.created_at.elapsed() >= self.pool.config.max_lifetime {
            tracing::debug!("dropping connection past its maximum lifetime");
            return;
        }

        tracing::trace!("returning connection to pool");
        self.pool.idle.lock().push_back(IdleConn {
            conn,
            idle_since: Instant::now(),
            created_at: self.created_at,
        });
    }
}
