//! Decoding raw wire values into [`AseValue`].
//!
//! The token layer hands over one raw byte slice per column (or `None` for
//! a zero-length value); this module interprets it against the column's
//! declared type, the session byte order and charset.

use bytes::Bytes;
use tds5_protocol::codec::{self, Session};
use tds5_protocol::token::FormatColumn;
use tds5_protocol::types::WireType;

use crate::datetime;
use crate::error::TypeError;
use crate::numeric::Numeric;
use crate::value::AseValue;

/// Decode one raw column value.
///
/// A missing (zero-length) value decodes to NULL when the column is marked
/// NULLALLOWED; otherwise it is a genuinely empty string or binary value.
pub fn decode_value(
    col: &FormatColumn,
    raw: Option<&Bytes>,
    session: &Session,
) -> Result<AseValue, TypeError> {
    let Some(raw) = raw else {
        return Ok(decode_absent(col));
    };
    decode_present(col, raw, session)
}

fn decode_absent(col: &FormatColumn) -> AseValue {
    if col.null_allowed() {
        return AseValue::Null;
    }
    if col.wire_type.is_character() {
        AseValue::String(String::new())
    } else if matches!(
        col.wire_type,
        WireType::Binary | WireType::VarBinary | WireType::LongBinary | WireType::Image
    ) {
        AseValue::Binary(Bytes::new())
    } else {
        // Fixed types never arrive zero-length; only VOID and the variable
        // families can, and VOID has no value at all.
        AseValue::Null
    }
}

fn decode_present(col: &FormatColumn, raw: &Bytes, session: &Session) -> Result<AseValue, TypeError> {
    let order = session.byte_order;
    let mut buf = raw.as_ref();

    let value = match col.wire_type {
        WireType::Void => AseValue::Null,

        WireType::Int1 => {
            expect_len("TINYINT", raw, 1)?;
            AseValue::TinyInt(codec::get_u8(&mut buf)?)
        }
        WireType::Int2 => {
            expect_len("SMALLINT", raw, 2)?;
            AseValue::SmallInt(codec::get_i16(&mut buf, order)?)
        }
        WireType::Int4 => {
            expect_len("INT", raw, 4)?;
            AseValue::Int(codec::get_i32(&mut buf, order)?)
        }
        WireType::Int8 => {
            expect_len("BIGINT", raw, 8)?;
            AseValue::BigInt(codec::get_i64(&mut buf, order)?)
        }
        WireType::IntN => match raw.len() {
            1 => AseValue::TinyInt(codec::get_u8(&mut buf)?),
            2 => AseValue::SmallInt(codec::get_i16(&mut buf, order)?),
            4 => AseValue::Int(codec::get_i32(&mut buf, order)?),
            8 => AseValue::BigInt(codec::get_i64(&mut buf, order)?),
            len => {
                return Err(TypeError::InvalidWidth {
                    type_name: "INTN",
                    len,
                })
            }
        },

        WireType::Bit => {
            expect_len("BIT", raw, 1)?;
            AseValue::Bool(codec::get_u8(&mut buf)? != 0)
        }
        WireType::BitN => {
            expect_len("BITN", raw, 1)?;
            AseValue::Bool(codec::get_u8(&mut buf)? != 0)
        }

        WireType::Real => {
            expect_len("REAL", raw, 4)?;
            AseValue::Float(f32::from_bits(codec::get_u32(&mut buf, order)?))
        }
        WireType::Flt8 => {
            expect_len("FLOAT", raw, 8)?;
            AseValue::Double(f64::from_bits(codec::get_u64(&mut buf, order)?))
        }
        WireType::FltN => match raw.len() {
            4 => AseValue::Float(f32::from_bits(codec::get_u32(&mut buf, order)?)),
            8 => AseValue::Double(f64::from_bits(codec::get_u64(&mut buf, order)?)),
            len => {
                return Err(TypeError::InvalidWidth {
                    type_name: "FLTN",
                    len,
                })
            }
        },

        WireType::Char | WireType::VarChar | WireType::LongChar | WireType::Text => {
            AseValue::String(session.decode_text(raw)?)
        }

        WireType::Binary | WireType::VarBinary | WireType::LongBinary | WireType::Image => {
            AseValue::Binary(raw.clone())
        }

        WireType::Decimal | WireType::Numeric => {
            let precision = col.precision.unwrap_or(crate::numeric::MAX_PRECISION);
            let scale = col.scale.unwrap_or(0);
            AseValue::Numeric(Numeric::from_wire(raw, precision, scale)?)
        }

        WireType::Money => {
            expect_len("MONEY", raw, 8)?;
            AseValue::Numeric(money_from_wire(&mut buf, session)?)
        }
        WireType::ShortMoney => {
            expect_len("SMALLMONEY", raw, 4)?;
            AseValue::Numeric(short_money_from_wire(&mut buf, session)?)
        }
        WireType::MoneyN => match raw.len() {
            4 => AseValue::Numeric(short_money_from_wire(&mut buf, session)?),
            8 => AseValue::Numeric(money_from_wire(&mut buf, session)?),
            len => {
                return Err(TypeError::InvalidWidth {
                    type_name: "MONEYN",
                    len,
                })
            }
        },

        WireType::DateTime => {
            expect_len("DATETIME", raw, 8)?;
            let days = codec::get_i32(&mut buf, order)?;
            let ticks = codec::get_u32(&mut buf, order)?;
            AseValue::DateTime(datetime::datetime_from_wire(days, ticks)?)
        }
        WireType::ShortDate => {
            expect_len("SMALLDATETIME", raw, 4)?;
            let days = codec::get_u16(&mut buf, order)?;
            let minutes = codec::get_u16(&mut buf, order)?;
            AseValue::DateTime(datetime::shortdate_from_wire(days, minutes)?)
        }
        WireType::DateTimeN => match raw.len() {
            4 => {
                let days = codec::get_u16(&mut buf, order)?;
                let minutes = codec::get_u16(&mut buf, order)?;
                AseValue::DateTime(datetime::shortdate_from_wire(days, minutes)?)
            }
            8 => {
                let days = codec::get_i32(&mut buf, order)?;
                let ticks = codec::get_u32(&mut buf, order)?;
                AseValue::DateTime(datetime::datetime_from_wire(days, ticks)?)
            }
            len => {
                return Err(TypeError::InvalidWidth {
                    type_name: "DATETIMEN",
                    len,
                })
            }
        },
        WireType::BigDateTimeN => {
            expect_len("BIGDATETIME", raw, 8)?;
            let micros = codec::get_u64(&mut buf, order)?;
            AseValue::DateTime(datetime::bigdatetime_from_wire(micros)?)
        }
        WireType::BigTimeN => {
            expect_len("BIGTIME", raw, 8)?;
            let micros = codec::get_u64(&mut buf, order)?;
            AseValue::Time(datetime::bigtime_from_wire(micros)?)
        }
    };

    Ok(value)
}

/// MONEY: two 4-byte words, most significant first, scaled by 10^-4.
fn money_from_wire(buf: &mut &[u8], session: &Session) -> Result<Numeric, TypeError> {
    let order = session.byte_order;
    let high = codec::get_u32(buf, order)?;
    let low = codec::get_u32(buf, order)?;
    let raw = (i64::from(high as i32) << 32) | i64::from(low);
    Ok(Numeric::new(raw < 0, raw.unsigned_abs().into(), 19, 4)?)
}

fn short_money_from_wire(buf: &mut &[u8], session: &Session) -> Result<Numeric, TypeError> {
    let raw = codec::get_i32(buf, session.byte_order)?;
    Ok(Numeric::new(raw < 0, raw.unsigned_abs().into(), 10, 4)?)
}

fn expect_len(type_name: &'static str, raw: &Bytes, len: usize) -> Result<(), TypeError> {
    if raw.len() == len {
        Ok(())
    } else {
        Err(TypeError::InvalidWidth {
            type_name,
            len: raw.len(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds5_protocol::codec::ByteOrder;

    fn col(wire_type: WireType) -> FormatColumn {
        FormatColumn::new("c", wire_type).nullable()
    }

    #[test]
    fn integers_decode_in_session_order() {
        let session = Session::default();
        let value = decode_value(
            &col(WireType::Int4),
            Some(&Bytes::from_static(&[0x01, 0x00, 0x00, 0x00])),
            &session,
        )
        .unwrap();
        assert_eq!(value, AseValue::Int(1));

        let be = Session {
            byte_order: ByteOrder::BigEndian,
            ..Session::default()
        };
        let value = decode_value(
            &col(WireType::Int4),
            Some(&Bytes::from_static(&[0x01, 0x00, 0x00, 0x00])),
            &be,
        )
        .unwrap();
        assert_eq!(value, AseValue::Int(0x0100_0000));
    }

    #[test]
    fn intn_width_selects_rust_type() {
        let session = Session::default();
        let cases: [(&[u8], AseValue); 4] = [
            (&[5], AseValue::TinyInt(5)),
            (&[5, 0], AseValue::SmallInt(5)),
            (&[5, 0, 0, 0], AseValue::Int(5)),
            (&[5, 0, 0, 0, 0, 0, 0, 0], AseValue::BigInt(5)),
        ];
        for (bytes, expected) in cases {
            let raw = Bytes::copy_from_slice(bytes);
            assert_eq!(
                decode_value(&col(WireType::IntN), Some(&raw), &session).unwrap(),
                expected
            );
        }

        let err = decode_value(
            &col(WireType::IntN),
            Some(&Bytes::from_static(&[0, 0, 0])),
            &session,
        )
        .unwrap_err();
        assert!(matches!(err, TypeError::InvalidWidth { type_name: "INTN", len: 3 }));
    }

    #[test]
    fn null_against_nullable_column() {
        let session = Session::default();
        let value = decode_value(&col(WireType::VarChar), None, &session).unwrap();
        assert_eq!(value, AseValue::Null);
    }

    #[test]
    fn zero_length_against_non_nullable_column_is_empty() {
        let session = Session::default();
        let strict = FormatColumn::new("c", WireType::VarChar);
        assert_eq!(
            decode_value(&strict, None, &session).unwrap(),
            AseValue::String(String::new())
        );

        let strict = FormatColumn::new("c", WireType::VarBinary);
        assert_eq!(
            decode_value(&strict, None, &session).unwrap(),
            AseValue::Binary(Bytes::new())
        );
    }

    #[test]
    fn money_is_scaled_by_ten_thousand() {
        let session = Session::default();
        // 12.3456 = 123456 * 10^-4; little-endian words, high word first.
        let raw = Bytes::from_static(&[0x00, 0x00, 0x00, 0x00, 0x40, 0xE2, 0x01, 0x00]);
        let value = decode_value(&col(WireType::Money), Some(&raw), &session).unwrap();
        let numeric = value.as_numeric().unwrap();
        assert_eq!(numeric.to_string(), "12.3456");
    }

    #[test]
    fn numeric_uses_column_precision_and_scale() {
        let session = Session::default();
        let column = col(WireType::Numeric).with_precision_scale(10, 2);
        // sign 0, magnitude 0x3039 = 12345 -> 123.45
        let raw = Bytes::from_static(&[0x00, 0x30, 0x39]);
        let value = decode_value(&column, Some(&raw), &session).unwrap();
        assert_eq!(value.as_numeric().unwrap().to_string(), "123.45");
    }

    #[test]
    fn datetime_layouts() {
        let session = Session::default();

        // Day 0 at noon: ticks = 12 * 3600 * 300.
        let ticks: u32 = 12 * 3600 * 300;
        let mut raw = Vec::new();
        raw.extend_from_slice(&0i32.to_le_bytes());
        raw.extend_from_slice(&ticks.to_le_bytes());
        let value = decode_value(
            &col(WireType::DateTime),
            Some(&Bytes::from(raw)),
            &session,
        )
        .unwrap();
        assert_eq!(
            value.as_datetime().unwrap().to_string(),
            "1900-01-01 12:00:00"
        );

        // DATETIMEN with a 4-byte body decodes as SMALLDATETIME.
        let mut raw = Vec::new();
        raw.extend_from_slice(&1u16.to_le_bytes());
        raw.extend_from_slice(&90u16.to_le_bytes());
        let value = decode_value(
            &col(WireType::DateTimeN),
            Some(&Bytes::from(raw)),
            &session,
        )
        .unwrap();
        assert_eq!(
            value.as_datetime().unwrap().to_string(),
            "1900-01-02 01:30:00"
        );
    }

    #[test]
    fn text_decodes_in_session_charset() {
        let session = Session::default();
        // 0xE9 is e-acute in the default windows-1252 charset.
        let raw = Bytes::from_static(&[0x63, 0x61, 0x66, 0xE9]);
        let value = decode_value(&col(WireType::VarChar), Some(&raw), &session).unwrap();
        assert_eq!(value, AseValue::String("caf\u{e9}".into()));
    }
}
