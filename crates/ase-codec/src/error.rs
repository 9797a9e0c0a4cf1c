//! Codec layer error types.

use thiserror::Error;

/// Errors that can occur in the packet framing layer.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The packet header could not be parsed.
    #[error("invalid packet header")]
    InvalidHeader,

    /// A packet declared a length beyond the negotiated maximum.
    #[error("packet too large: {size} bytes exceeds maximum of {max}")]
    PacketTooLarge {
        /// Declared packet size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The connection closed mid-message.
    #[error("connection closed unexpectedly")]
    ConnectionClosed,

    /// A packet switched buffer types before its message ended.
    #[error("buffer type changed mid-message: started {started:?}, got {got:?}")]
    BufferTypeChanged {
        /// Buffer type of the message's first packet.
        started: tds5_protocol::packet::BufferType,
        /// Buffer type of the offending packet.
        got: tds5_protocol::packet::BufferType,
    },

    /// Protocol level error while decoding packet contents.
    #[error(transparent)]
    Protocol(#[from] tds5_protocol::ProtocolError),

    /// Underlying transport I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
