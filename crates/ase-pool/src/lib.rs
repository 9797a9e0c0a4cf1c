//! # ase-driver-pool
//!
//! Purpose-built connection pool for Sybase / SAP ASE dialogs.
//!
//! Unlike generic connection pools, this implementation understands the
//! dialog lifecycle: connections whose dialog became unusable after a
//! fatal server error are discarded rather than reissued, and checkout can
//! verify liveness with a lightweight query.
//!
//! ## Features
//!
//! - Configurable min/max pool sizes
//! - Health checks on checkout (`select 1` by default)
//! - Acquisition timeout, idle timeout and maximum connection lifetime
//! - Background reaping of expired idle connections
//!
//! ## Example
//!
//! ```rust,ignore
//! use ase_client::ConnectionConfig;
//! use ase_driver_pool::{AseConnector, Pool, PoolConfig};
//!
//! let connector = AseConnector::new(
//!     ConnectionConfig::new("ase.example.com")
//!         .username("sa")
//!         .password("secret"),
//! );
//! let pool = Pool::new(connector, PoolConfig::new().max_connections(20)).await?;
//!
//! let mut conn = pool.get().await?;
//! let result = conn.execute("select 1").await?;
//! // Connection automatically returned to pool on drop
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod pool;

pub use config::PoolConfig;
pub use error::PoolError;
pub use lifecycle::{AseConnector, Connector, PoolableConnection};
pub use manager::PoolManager;
pub use pool::{Pool, PoolStatus, PooledConnection};
