//! Type conversion error types.

use thiserror::Error;

/// Errors that can occur during type conversion.
#[derive(Debug, Error)]
pub enum TypeError {
    /// Value is null when non-null was expected.
    #[error("unexpected null value")]
    UnexpectedNull,

    /// Type mismatch during conversion.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type name.
        expected: &'static str,
        /// Actual type name.
        actual: String,
    },

    /// Value is out of range for target type.
    #[error("value out of range for {target_type}")]
    OutOfRange {
        /// Target type name.
        target_type: &'static str,
    },

    /// A wire value's byte count does not fit the declared type.
    #[error("invalid width for {type_name}: {len} bytes")]
    InvalidWidth {
        /// Wire type name.
        type_name: &'static str,
        /// Byte count received.
        len: usize,
    },

    /// Invalid date/time value.
    #[error("invalid date/time: {0}")]
    InvalidDateTime(String),

    /// Invalid numeric/decimal value.
    #[error("invalid numeric: {0}")]
    InvalidNumeric(String),

    /// Rescaling a numeric would drop nonzero digits.
    ///
    /// Precision and scale conversions are exact or they fail; nothing is
    /// rounded implicitly.
    #[error("cannot rescale numeric from scale {from} to {to} without loss")]
    ScaleOverflow {
        /// Source scale.
        from: u8,
        /// Requested scale.
        to: u8,
    },

    /// Numeric precision beyond what the wire format carries.
    #[error("precision {0} exceeds the maximum of 38")]
    PrecisionOverflow(u8),

    /// Unsupported type conversion.
    #[error("unsupported conversion from {from} to {to}")]
    UnsupportedConversion {
        /// Source type.
        from: String,
        /// Target type.
        to: &'static str,
    },

    /// Malformed character data or framing inside a value.
    #[error(transparent)]
    Protocol(#[from] tds5_protocol::ProtocolError),
}
