//! Client error types.

use thiserror::Error;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// Login rejected or negotiation not supported.
    #[error("login failed: {0}")]
    Login(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] tds5_protocol::ProtocolError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] ase_codec::CodecError),

    /// Type conversion error.
    #[error("type error: {0}")]
    Type(#[from] ase_types::TypeError),

    /// Request execution error.
    #[error("query error: {0}")]
    Query(String),

    /// Server returned an error.
    #[error("server error {number}: {message}")]
    Server {
        /// Error number.
        number: i32,
        /// Severity class (0-24).
        class: u8,
        /// Error state.
        state: u8,
        /// Error message.
        message: String,
        /// Server name where the error occurred.
        server: Option<String>,
        /// Stored procedure name (if applicable).
        procedure: Option<String>,
        /// Line number in the batch or procedure.
        line: u32,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection or login timeout occurred.
    #[error("connection timed out")]
    ConnectionTimeout,

    /// Command execution timeout occurred.
    #[error("command timed out")]
    CommandTimeout,

    /// The request was cancelled via an attention signal.
    #[error("request cancelled")]
    Cancelled,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is transient and may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout | Self::CommandTimeout | Self::ConnectionClosed | Self::Io(_)
        )
    }

    /// Check if this error indicates a protocol/driver bug.
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Check if this is a server error with a specific number.
    #[must_use]
    pub fn is_server_error(&self, number: i32) -> bool {
        matches!(self, Self::Server { number: n, .. } if *n == number)
    }

    /// Get the severity class if this is a server error.
    ///
    /// ASE severities range from 0-24:
    /// - 0-10: informational
    /// - 11-16: user errors
    /// - 17-18: resource errors
    /// - 19-24: fatal errors (connection terminating)
    #[must_use]
    pub fn class(&self) -> Option<u8> {
        match self {
            Self::Server { class, .. } => Some(*class),
            _ => None,
        }
    }

    /// Check if this error leaves the connection unusable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Server { class, .. } => *class >= 19,
            Self::ConnectionClosed | Self::Io(_) | Self::Protocol(_) | Self::Codec(_) => true,
            _ => false,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
