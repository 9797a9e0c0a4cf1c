//! # ase-client
//!
//! High-level async client for Sybase / SAP Adaptive Server Enterprise
//! over TDS 5.0.
//!
//! The [`Dialog`] type owns one connection and drives the half-duplex
//! request/response cycle: login with capability negotiation, language
//! (SQL) requests, stored procedure calls, option commands and request
//! cancellation via attention buffers.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ase_client::{ConnectionConfig, Dialog};
//!
//! #[tokio::main]
//! async fn main() -> ase_client::Result<()> {
//!     let config = ConnectionConfig::new("ase.example.com")
//!         .username("sa")
//!         .password("secret")
//!         .database("pubs2");
//!
//!     let mut dialog = Dialog::connect(&config).await?;
//!     let result = dialog.execute("select au_lname from authors").await?;
//!     for row in result.rows() {
//!         println!("{:?}", row.get(0));
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod dialog;
pub mod error;
pub mod result;
pub mod row;

pub use ase_types::AseValue;
pub use config::{ConnectionConfig, TimeoutConfig};
pub use dialog::Dialog;
pub use error::{Error, Result};
pub use result::{CommandResult, ResultSet, ServerMessage};
pub use row::{Column, Row};
