//! TDS 5.0 data type tags and their wire length classes.

use bitflags::bitflags;

use crate::error::ProtocolError;

/// Sybase wire data type tag.
///
/// Fixed-width tags carry their value bytes with no length prefix; the
/// nullable `*N` variants and the legacy string/binary types carry a 1-byte
/// length; the long/BLOB family carries a 4-byte length or a text pointer
/// header. The class is captured by [`WireType::length_class`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    /// Placeholder for untyped NULL parameters.
    Void = 0x1F,
    /// IMAGE: long binary with text pointer.
    Image = 0x22,
    /// TEXT: long character with text pointer.
    Text = 0x23,
    /// VARBINARY, 1-byte length.
    VarBinary = 0x25,
    /// Nullable integer, width 1/2/4/8 given by the value length.
    IntN = 0x26,
    /// VARCHAR, 1-byte length.
    VarChar = 0x27,
    /// BINARY, 1-byte length (blank-padded on the server).
    Binary = 0x2D,
    /// CHAR, 1-byte length (blank-padded).
    Char = 0x2F,
    /// TINYINT, 1 byte unsigned.
    Int1 = 0x30,
    /// BIT, 1 byte.
    Bit = 0x32,
    /// SMALLINT, 2 bytes.
    Int2 = 0x34,
    /// INT, 4 bytes.
    Int4 = 0x38,
    /// SMALLDATETIME: 2-byte days since 1900-01-01 + 2-byte minutes.
    ShortDate = 0x3A,
    /// REAL, 4 bytes.
    Real = 0x3B,
    /// MONEY, 8 bytes.
    Money = 0x3C,
    /// DATETIME: 4-byte days since 1900-01-01 + 4-byte 1/300s ticks.
    DateTime = 0x3D,
    /// FLOAT, 8 bytes.
    Flt8 = 0x3E,
    /// Nullable bit, 1-byte length.
    BitN = 0x68,
    /// DECIMAL: 1-byte length, sign byte + big-endian mantissa.
    Decimal = 0x6A,
    /// NUMERIC: same wire shape as DECIMAL.
    Numeric = 0x6C,
    /// Nullable float, width 4/8 given by the value length.
    FltN = 0x6D,
    /// Nullable money, width 4/8 given by the value length.
    MoneyN = 0x6E,
    /// Nullable datetime, width 4/8 given by the value length.
    DateTimeN = 0x6F,
    /// SMALLMONEY, 4 bytes.
    ShortMoney = 0x7A,
    /// BIGINT, 8 bytes.
    Int8 = 0x7F,
    /// Long character without text pointer, 4-byte length.
    LongChar = 0xAF,
    /// BIGDATETIME: 8-byte microseconds since 0001-01-01, nullable.
    BigDateTimeN = 0xBB,
    /// BIGTIME: 8-byte microseconds since midnight, nullable.
    BigTimeN = 0xBC,
    /// Long binary with a class-id header, 4-byte length.
    LongBinary = 0xE1,
}

/// How a value of a given type is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthClass {
    /// Fixed width, no length prefix.
    Fixed(usize),
    /// 1-byte length prefix; zero length is the wire NULL signal.
    ByteLen,
    /// 4-byte length prefix (LONGCHAR / LONGBINARY).
    LongLen,
    /// Text pointer header: 1-byte pointer length (zero = NULL), pointer,
    /// 8-byte timestamp, 4-byte data length, data.
    TextPtr,
}

impl WireType {
    /// Create a wire type from a raw tag byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x1F => Ok(Self::Void),
            0x22 => Ok(Self::Image),
            0x23 => Ok(Self::Text),
            0x25 => Ok(Self::VarBinary),
            0x26 => Ok(Self::IntN),
            0x27 => Ok(Self::VarChar),
            0x2D => Ok(Self::Binary),
            0x2F => Ok(Self::Char),
            0x30 => Ok(Self::Int1),
            0x32 => Ok(Self::Bit),
            0x34 => Ok(Self::Int2),
            0x38 => Ok(Self::Int4),
            0x3A => Ok(Self::ShortDate),
            0x3B => Ok(Self::Real),
            0x3C => Ok(Self::Money),
            0x3D => Ok(Self::DateTime),
            0x3E => Ok(Self::Flt8),
            0x68 => Ok(Self::BitN),
            0x6A => Ok(Self::Decimal),
            0x6C => Ok(Self::Numeric),
            0x6D => Ok(Self::FltN),
            0x6E => Ok(Self::MoneyN),
            0x6F => Ok(Self::DateTimeN),
            0x7A => Ok(Self::ShortMoney),
            0x7F => Ok(Self::Int8),
            0xAF => Ok(Self::LongChar),
            0xBB => Ok(Self::BigDateTimeN),
            0xBC => Ok(Self::BigTimeN),
            0xE1 => Ok(Self::LongBinary),
            _ => Err(ProtocolError::InvalidTypeTag(value)),
        }
    }

    /// Wire length class for this type.
    #[must_use]
    pub const fn length_class(self) -> LengthClass {
        match self {
            Self::Void => LengthClass::Fixed(0),
            Self::Int1 | Self::Bit => LengthClass::Fixed(1),
            Self::Int2 => LengthClass::Fixed(2),
            Self::Int4 | Self::Real | Self::ShortMoney | Self::ShortDate => LengthClass::Fixed(4),
            Self::Int8 | Self::Flt8 | Self::Money | Self::DateTime => LengthClass::Fixed(8),
            Self::IntN
            | Self::BitN
            | Self::FltN
            | Self::MoneyN
            | Self::DateTimeN
            | Self::BigDateTimeN
            | Self::BigTimeN
            | Self::Decimal
            | Self::Numeric
            | Self::Char
            | Self::VarChar
            | Self::Binary
            | Self::VarBinary => LengthClass::ByteLen,
            Self::LongChar | Self::LongBinary => LengthClass::LongLen,
            Self::Text | Self::Image => LengthClass::TextPtr,
        }
    }

    /// Whether the format entry for this type carries precision and scale.
    #[must_use]
    pub const fn has_precision_scale(self) -> bool {
        matches!(self, Self::Decimal | Self::Numeric)
    }

    /// Whether values of this type are character data in the session charset.
    #[must_use]
    pub const fn is_character(self) -> bool {
        matches!(self, Self::Char | Self::VarChar | Self::Text | Self::LongChar)
    }
}

bitflags! {
    /// Column status flags in row format descriptors.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FormatStatus: u32 {
        /// Column is hidden (not part of the select list).
        const HIDDEN = 0x01;
        /// Column is part of a key.
        const KEY = 0x02;
        /// Column is a version/timestamp column.
        const VERSION = 0x04;
        /// Column is updatable through a cursor.
        const UPDATABLE = 0x10;
        /// Column allows NULL values. A zero-length value decodes to SQL
        /// NULL only when this flag is set.
        const NULLALLOWED = 0x20;
        /// Column is an identity column.
        const IDENTITY = 0x40;
    }
}

bitflags! {
    /// Parameter status flags in parameter format descriptors.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ParamStatus: u8 {
        /// Parameter is an output (return) parameter.
        const RETURN_VALUE = 0x01;
        /// Parameter allows NULL values.
        const NULLALLOWED = 0x20;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn tag_roundtrip() {
        for tag in [0x26u8, 0x38, 0x3D, 0x6C, 0xE1, 0xBB] {
            assert_eq!(WireType::from_u8(tag).unwrap() as u8, tag);
        }
        assert!(WireType::from_u8(0x00).is_err());
    }

    #[test]
    fn fixed_widths() {
        assert_eq!(WireType::Int4.length_class(), LengthClass::Fixed(4));
        assert_eq!(WireType::DateTime.length_class(), LengthClass::Fixed(8));
        assert_eq!(WireType::ShortDate.length_class(), LengthClass::Fixed(4));
        assert_eq!(WireType::IntN.length_class(), LengthClass::ByteLen);
        assert_eq!(WireType::Text.length_class(), LengthClass::TextPtr);
        assert_eq!(WireType::LongBinary.length_class(), LengthClass::LongLen);
    }

    #[test]
    fn numeric_has_precision_scale() {
        assert!(WireType::Numeric.has_precision_scale());
        assert!(WireType::Decimal.has_precision_scale());
        assert!(!WireType::IntN.has_precision_scale());
    }
}
