//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding or decoding the TDS 5.0 wire format.
///
/// Every variant except [`ProtocolError::FieldTooLong`] and
/// [`ProtocolError::ValueTooLong`] indicates that the byte stream can no
/// longer be trusted to be frame-aligned. Callers must treat those as fatal
/// for the physical connection; the two length violations are caught before
/// anything is sent and leave the connection intact.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Fewer bytes were available than the wire format requires.
    #[error("truncated stream: needed {needed} bytes, {remaining} remaining")]
    TruncatedStream {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually available.
        remaining: usize,
    },

    /// A token's declared length did not match the bytes it contained.
    #[error("token 0x{token:02X} length mismatch: declared {declared}, consumed {consumed}")]
    LengthMismatch {
        /// Token type tag.
        token: u8,
        /// Length declared by the token's own length field.
        declared: usize,
        /// Bytes actually consumed by the decoder.
        consumed: usize,
    },

    /// A row or parameter token did not align with the current format.
    #[error("format mismatch: format declares {expected} columns, stream yielded {actual}")]
    ColumnCountMismatch {
        /// Column count of the governing format descriptor.
        expected: usize,
        /// Values present in the stream.
        actual: usize,
    },

    /// A row or parameter token arrived before any format descriptor.
    #[error("row token 0x{0:02X} received with no preceding format descriptor")]
    MissingFormat(u8),

    /// Unknown packet buffer type byte.
    #[error("invalid buffer type: 0x{0:02X}")]
    InvalidBufferType(u8),

    /// Unknown bits set in the packet status byte.
    #[error("invalid buffer status: 0x{0:02X}")]
    InvalidBufferStatus(u8),

    /// A data type tag with no known wire representation.
    #[error("invalid data type tag: 0x{0:02X}")]
    InvalidTypeTag(u8),

    /// Character data could not be decoded with the session charset.
    #[error("malformed string for charset {charset}")]
    MalformedString {
        /// Name of the charset that rejected the bytes.
        charset: &'static str,
    },

    /// A value was larger than its wire type's length prefix can carry.
    #[error("value of {actual} bytes exceeds the {max}-byte limit of type 0x{tag:02X}")]
    ValueTooLong {
        /// Data type tag of the owning column.
        tag: u8,
        /// Largest length the type's length prefix can express.
        max: usize,
        /// Encoded length of the offending value.
        actual: usize,
    },

    /// A login record field exceeded its fixed wire width.
    #[error("login field `{field}` exceeds {max} bytes")]
    FieldTooLong {
        /// Field name within the login record.
        field: &'static str,
        /// Maximum encoded width.
        max: usize,
    },
}

impl ProtocolError {
    /// Build a truncation error from a requirement and what remains.
    #[must_use]
    pub fn truncated(needed: usize, remaining: usize) -> Self {
        Self::TruncatedStream { needed, remaining }
    }
}
