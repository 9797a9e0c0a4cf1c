//! # ase-codec
//!
//! Async framing layer for TDS 5.0 packet handling.
//!
//! This crate transforms raw byte streams into high-level TDS packets,
//! handling packet reassembly across TCP segment boundaries and packet
//! continuation for large messages.
//!
//! ## Architecture
//!
//! The codec layer sits between raw TCP streams and the higher-level
//! client:
//!
//! ```text
//! TCP Stream -> Tds5Codec (packet framing) -> Connection (messages) -> Dialog
//! ```
//!
//! ### Cancellation Safety
//!
//! The connection splits the TCP stream into read and write halves. This
//! allows sending attention buffers for request cancellation even while
//! blocked reading a large result set.
//!
//! ```rust,ignore
//! use ase_codec::Connection;
//!
//! let conn = Connection::new(tcp_stream);
//! let attention = conn.attention_handle();
//!
//! // Cancel from another task
//! tokio::spawn(async move {
//!     attention.cancel().await?;
//! });
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod framed;
pub mod packet_codec;

pub use connection::{AttentionHandle, Connection, Message};
pub use error::CodecError;
pub use framed::{PacketReader, PacketWriter};
pub use packet_codec::{Packet, Tds5Codec};
