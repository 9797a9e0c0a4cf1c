//! Encoding [`AseValue`] parameters for the wire.
//!
//! Parameters travel as a PARAMFMT/PARAMS token pair. For each value this
//! module picks a wire type (always a nullable variant, so NULL stays
//! expressible), builds the format column, and produces the raw value
//! bytes the token layer frames.

use bytes::{BufMut, Bytes, BytesMut};
use tds5_protocol::codec::{self, Session};
use tds5_protocol::token::FormatColumn;
use tds5_protocol::types::WireType;

use crate::datetime;
use crate::error::TypeError;
use crate::value::AseValue;

/// Maximum value length for the 1-byte-length string/binary types.
const BYTE_LEN_MAX: usize = 255;

/// Wire length of a string in the session charset.
///
/// Character data is re-encoded before framing, and the session charset can
/// expand it (unmappable characters become numeric character references), so
/// the UTF-8 byte count says nothing about the length on the wire.
fn encoded_text_len(s: &str, session: &Session) -> usize {
    session.encode_text(s).len()
}

/// Pick the wire type used to send a value as a parameter.
#[must_use]
pub fn wire_type_for(value: &AseValue, session: &Session) -> WireType {
    match value {
        // NULL with no better type information travels as an empty VARCHAR.
        AseValue::Null => WireType::VarChar,
        AseValue::Bool(_) => WireType::BitN,
        AseValue::TinyInt(_) | AseValue::SmallInt(_) | AseValue::Int(_) | AseValue::BigInt(_) => {
            WireType::IntN
        }
        AseValue::Float(_) | AseValue::Double(_) => WireType::FltN,
        AseValue::String(s) => {
            if encoded_text_len(s, session) > BYTE_LEN_MAX {
                WireType::LongChar
            } else {
                WireType::VarChar
            }
        }
        AseValue::Binary(b) => {
            if b.len() > BYTE_LEN_MAX {
                WireType::LongBinary
            } else {
                WireType::VarBinary
            }
        }
        AseValue::Numeric(_) => WireType::Numeric,
        AseValue::DateTime(_) => WireType::DateTimeN,
        AseValue::Time(_) => WireType::BigTimeN,
    }
}

/// Build the format column describing a parameter value.
#[must_use]
pub fn format_column_for(name: &str, value: &AseValue, session: &Session) -> FormatColumn {
    let wire_type = wire_type_for(value, session);
    let mut col = FormatColumn::new(name, wire_type).nullable();
    match value {
        AseValue::Numeric(n) => {
            col = col
                .with_length(crate::numeric::Numeric::wire_size(n.precision()) as u32)
                .with_precision_scale(n.precision(), n.scale());
        }
        AseValue::String(s) => {
            col = col.with_length(encoded_text_len(s, session).max(1) as u32);
        }
        AseValue::Binary(b) => {
            col = col.with_length(b.len().max(1) as u32);
        }
        AseValue::Null => {
            col = col.with_length(1);
        }
        AseValue::Bool(_) => {
            col = col.with_length(1);
        }
        AseValue::TinyInt(_)
        | AseValue::SmallInt(_)
        | AseValue::Int(_)
        | AseValue::BigInt(_)
        | AseValue::Float(_)
        | AseValue::Double(_)
        | AseValue::DateTime(_)
        | AseValue::Time(_) => {
            col = col.with_length(8);
        }
    }
    col
}

/// Encode a value to its raw wire bytes, `None` for NULL.
pub fn encode_value(value: &AseValue, session: &Session) -> Result<Option<Bytes>, TypeError> {
    let order = session.byte_order;
    let mut buf = BytesMut::new();

    match value {
        AseValue::Null => return Ok(None),
        AseValue::Bool(v) => buf.put_u8(u8::from(*v)),
        AseValue::TinyInt(v) => buf.put_u8(*v),
        AseValue::SmallInt(v) => codec::put_i16(&mut buf, order, *v),
        AseValue::Int(v) => codec::put_i32(&mut buf, order, *v),
        AseValue::BigInt(v) => codec::put_i64(&mut buf, order, *v),
        AseValue::Float(v) => codec::put_u32(&mut buf, order, v.to_bits()),
        AseValue::Double(v) => codec::put_u64(&mut buf, order, v.to_bits()),
        AseValue::String(s) => {
            if s.is_empty() {
                // A present-but-empty string needs one padding byte; zero
                // length on the wire would read back as NULL.
                buf.put_u8(b' ');
            } else {
                buf.put_slice(&session.encode_text(s));
            }
        }
        AseValue::Binary(b) => {
            if b.is_empty() {
                buf.put_u8(0);
            } else {
                buf.put_slice(b);
            }
        }
        AseValue::Numeric(n) => buf.put_slice(&n.to_wire()),
        AseValue::DateTime(dt) => {
            let (days, ticks) = datetime::datetime_to_wire(*dt)?;
            codec::put_i32(&mut buf, order, days);
            codec::put_u32(&mut buf, order, ticks);
        }
        AseValue::Time(t) => {
            codec::put_u64(&mut buf, order, datetime::bigtime_to_wire(*t));
        }
    }

    Ok(Some(buf.freeze()))
}
