//! # tds5-protocol
//!
//! Pure implementation of the TDS 5.0 (Tabular Data Stream) protocol used
//! by Sybase / SAP Adaptive Server Enterprise.
//!
//! This crate provides packet structures, the login record, capability
//! negotiation, token parsing, and serialization for TDS 5.0 dialogs,
//! including the negotiated integer byte order and session charset that
//! distinguish TDS 5.0 from the Microsoft lineage.
//!
//! ## Design Philosophy
//!
//! This crate is intentionally IO-agnostic. It contains no networking logic
//! and makes no assumptions about the async runtime. Higher-level crates
//! build upon this foundation to provide async I/O capabilities.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tds5_protocol::{BufferStatus, BufferType, PacketHeader};
//!
//! let header = PacketHeader {
//!     buffer_type: BufferType::Normal,
//!     status: BufferStatus::END_OF_MESSAGE,
//!     length: 100,
//!     channel: 0,
//!     packet_number: 1,
//!     window: 0,
//! };
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod capability;
pub mod codec;
pub mod error;
pub mod login;
pub mod packet;
pub mod token;
pub mod types;

pub use capability::{Capability, CapabilityBlock, CAP_BLOCK_LEN};
pub use codec::{ByteOrder, Session};
pub use error::ProtocolError;
pub use packet::{
    BufferStatus, BufferType, PacketHeader, DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE,
    PACKET_HEADER_SIZE,
};
pub use login::{LoginRecord, PROTOCOL_VERSION};
pub use token::{
    skip_rule, Control, DbRpc, DbRpcOptions, Done, DoneStatus, Eed, EnvChange, EnvKind, EnvUpdate,
    FormatColumn, FormatDescriptor, Language, LoginAck, LoginStatus, Msg, OptionCmd, OptionCommand,
    RawRow, SkipRule, Token, TokenReader, TokenType,
};
pub use types::{FormatStatus, LengthClass, ParamStatus, WireType};
