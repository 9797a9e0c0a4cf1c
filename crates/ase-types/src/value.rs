//! SQL value representation.

use bytes::Bytes;

use crate::numeric::Numeric;

/// A SQL value that can represent any ASE data type.
///
/// This enum provides a type-safe way to handle SQL values that may be
/// of various types, including NULL.
#[derive(Debug, Clone, PartialEq)]
pub enum AseValue {
    /// NULL value.
    Null,
    /// Boolean value (BIT).
    Bool(bool),
    /// 8-bit unsigned integer (TINYINT).
    TinyInt(u8),
    /// 16-bit signed integer (SMALLINT).
    SmallInt(i16),
    /// 32-bit signed integer (INT).
    Int(i32),
    /// 64-bit signed integer (BIGINT).
    BigInt(i64),
    /// 32-bit floating point (REAL).
    Float(f32),
    /// 64-bit floating point (FLOAT).
    Double(f64),
    /// String value (CHAR, VARCHAR, TEXT, LONGCHAR), decoded in the
    /// session charset.
    String(String),
    /// Binary value (BINARY, VARBINARY, IMAGE, LONGBINARY).
    Binary(Bytes),
    /// Exact numeric value (DECIMAL, NUMERIC, MONEY, SMALLMONEY).
    Numeric(Numeric),
    /// DateTime value (DATETIME, SMALLDATETIME, BIGDATETIME).
    DateTime(chrono::NaiveDateTime),
    /// Time of day value (BIGTIME).
    Time(chrono::NaiveTime),
}

impl AseValue {
    /// Check if the value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the value as a bool, if it is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as an i32, if it is one.
    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            Self::SmallInt(v) => Some(i32::from(*v)),
            Self::TinyInt(v) => Some(i32::from(*v)),
            _ => None,
        }
    }

    /// Get the value as an i64, if it is one.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::BigInt(v) => Some(*v),
            Self::Int(v) => Some(i64::from(*v)),
            Self::SmallInt(v) => Some(i64::from(*v)),
            Self::TinyInt(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Get the value as an f64, if it is one.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Float(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    /// Get the value as a string slice, if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Get the value as bytes, if it is binary.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(v) => Some(v),
            _ => None,
        }
    }

    /// Get the value as a numeric, if it is one.
    #[must_use]
    pub fn as_numeric(&self) -> Option<Numeric> {
        match self {
            Self::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as a timestamp, if it is one.
    #[must_use]
    pub fn as_datetime(&self) -> Option<chrono::NaiveDateTime> {
        match self {
            Self::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the type name as a string.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BIT",
            Self::TinyInt(_) => "TINYINT",
            Self::SmallInt(_) => "SMALLINT",
            Self::Int(_) => "INT",
            Self::BigInt(_) => "BIGINT",
            Self::Float(_) => "REAL",
            Self::Double(_) => "FLOAT",
            Self::String(_) => "VARCHAR",
            Self::Binary(_) => "VARBINARY",
            Self::Numeric(_) => "NUMERIC",
            Self::DateTime(_) => "DATETIME",
            Self::Time(_) => "BIGTIME",
        }
    }
}

impl From<bool> for AseValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<u8> for AseValue {
    fn from(v: u8) -> Self {
        Self::TinyInt(v)
    }
}

impl From<i16> for AseValue {
    fn from(v: i16) -> Self {
        Self::SmallInt(v)
    }
}

impl From<i32> for AseValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for AseValue {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<f32> for AseValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<f64> for AseValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<String> for AseValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for AseValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<Bytes> for AseValue {
    fn from(v: Bytes) -> Self {
        Self::Binary(v)
    }
}

impl From<Vec<u8>> for AseValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(v))
    }
}

impl From<Numeric> for AseValue {
    fn from(v: Numeric) -> Self {
        Self::Numeric(v)
    }
}

impl From<chrono::NaiveDateTime> for AseValue {
    fn from(v: chrono::NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<chrono::NaiveTime> for AseValue {
    fn from(v: chrono::NaiveTime) -> Self {
        Self::Time(v)
    }
}

impl<T> From<Option<T>> for AseValue
where
    T: Into<AseValue>,
{
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
