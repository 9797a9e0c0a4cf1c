//! Codec utilities for TDS 5.0 encoding and decoding.
//!
//! TDS 5.0 does not fix a byte order: the client declares its integer and
//! float formats in the login record and both sides use that order for the
//! rest of the session. Every multi-byte read and write here therefore takes
//! the session's [`ByteOrder`]. The packet header length is the one
//! exception and is always big-endian (see `packet`).
//!
//! Strings on the wire are byte sequences in the session charset, prefixed
//! by a 1-byte or 2-byte length. A byte sequence is not valid text until it
//! has been decoded with that charset.

use bytes::{Buf, BufMut, Bytes};

use crate::error::ProtocolError;

/// Negotiated integer byte order for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// Least significant byte first. The order modern ASE servers use.
    #[default]
    LittleEndian,
    /// Most significant byte first.
    BigEndian,
}

/// Per-connection wire settings shared by all token codecs.
///
/// Owned by the dialog session; token `read`/`write` implementations take it
/// by reference rather than threading charset and byte order individually.
#[derive(Debug, Clone, Copy)]
pub struct Session {
    /// Integer/float byte order declared in the login record.
    pub byte_order: ByteOrder,
    /// Negotiated text encoding for character data.
    pub charset: &'static encoding_rs::Encoding,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            byte_order: ByteOrder::LittleEndian,
            charset: encoding_rs::WINDOWS_1252,
        }
    }
}

impl Session {
    /// Resolve a Sybase charset name to an encoding.
    ///
    /// ASE charset names predate the WHATWG labels `encoding_rs` knows, so
    /// the common ones are mapped explicitly; anything else is tried as a
    /// label directly.
    #[must_use]
    pub fn charset_for_name(name: &str) -> Option<&'static encoding_rs::Encoding> {
        match name.to_ascii_lowercase().as_str() {
            // iso_1 is ISO 8859-1; windows-1252 is its decoding superset.
            "iso_1" | "iso88591" | "ascii_8" => Some(encoding_rs::WINDOWS_1252),
            "utf8" => Some(encoding_rs::UTF_8),
            "cp1252" => Some(encoding_rs::WINDOWS_1252),
            "cp1251" => Some(encoding_rs::WINDOWS_1251),
            "sjis" => Some(encoding_rs::SHIFT_JIS),
            "eucjis" => Some(encoding_rs::EUC_JP),
            other => encoding_rs::Encoding::for_label(other.as_bytes()),
        }
    }

    /// Decode `bytes` with the session charset.
    pub fn decode_text(&self, bytes: &[u8]) -> Result<String, ProtocolError> {
        let (text, _, had_errors) = self.charset.decode(bytes);
        if had_errors {
            return Err(ProtocolError::MalformedString {
                charset: self.charset.name(),
            });
        }
        Ok(text.into_owned())
    }

    /// Encode `text` with the session charset.
    #[must_use]
    pub fn encode_text(&self, text: &str) -> Vec<u8> {
        let (bytes, _, _) = self.charset.encode(text);
        bytes.into_owned()
    }
}

/// Fail unless at least `needed` bytes remain in `src`.
fn ensure(src: &impl Buf, needed: usize) -> Result<(), ProtocolError> {
    if src.remaining() < needed {
        return Err(ProtocolError::truncated(needed, src.remaining()));
    }
    Ok(())
}

/// Read a single byte.
pub fn get_u8(src: &mut impl Buf) -> Result<u8, ProtocolError> {
    ensure(src, 1)?;
    Ok(src.get_u8())
}

/// Read a 16-bit unsigned integer in the session byte order.
pub fn get_u16(src: &mut impl Buf, order: ByteOrder) -> Result<u16, ProtocolError> {
    ensure(src, 2)?;
    Ok(match order {
        ByteOrder::LittleEndian => src.get_u16_le(),
        ByteOrder::BigEndian => src.get_u16(),
    })
}

/// Read a 32-bit unsigned integer in the session byte order.
pub fn get_u32(src: &mut impl Buf, order: ByteOrder) -> Result<u32, ProtocolError> {
    ensure(src, 4)?;
    Ok(match order {
        ByteOrder::LittleEndian => src.get_u32_le(),
        ByteOrder::BigEndian => src.get_u32(),
    })
}

/// Read a 64-bit unsigned integer in the session byte order.
pub fn get_u64(src: &mut impl Buf, order: ByteOrder) -> Result<u64, ProtocolError> {
    ensure(src, 8)?;
    Ok(match order {
        ByteOrder::LittleEndian => src.get_u64_le(),
        ByteOrder::BigEndian => src.get_u64(),
    })
}

/// Read a 16-bit signed integer in the session byte order.
pub fn get_i16(src: &mut impl Buf, order: ByteOrder) -> Result<i16, ProtocolError> {
    Ok(get_u16(src, order)? as i16)
}

/// Read a 32-bit signed integer in the session byte order.
pub fn get_i32(src: &mut impl Buf, order: ByteOrder) -> Result<i32, ProtocolError> {
    Ok(get_u32(src, order)? as i32)
}

/// Read a 64-bit signed integer in the session byte order.
pub fn get_i64(src: &mut impl Buf, order: ByteOrder) -> Result<i64, ProtocolError> {
    Ok(get_u64(src, order)? as i64)
}

/// Read exactly `len` bytes.
pub fn get_bytes(src: &mut impl Buf, len: usize) -> Result<Bytes, ProtocolError> {
    ensure(src, len)?;
    Ok(src.copy_to_bytes(len))
}

/// Skip exactly `len` bytes.
pub fn skip(src: &mut impl Buf, len: usize) -> Result<(), ProtocolError> {
    ensure(src, len)?;
    src.advance(len);
    Ok(())
}

/// Write a 16-bit unsigned integer in the session byte order.
pub fn put_u16(dst: &mut impl BufMut, order: ByteOrder, value: u16) {
    match order {
        ByteOrder::LittleEndian => dst.put_u16_le(value),
        ByteOrder::BigEndian => dst.put_u16(value),
    }
}

/// Write a 32-bit unsigned integer in the session byte order.
pub fn put_u32(dst: &mut impl BufMut, order: ByteOrder, value: u32) {
    match order {
        ByteOrder::LittleEndian => dst.put_u32_le(value),
        ByteOrder::BigEndian => dst.put_u32(value),
    }
}

/// Write a 64-bit unsigned integer in the session byte order.
pub fn put_u64(dst: &mut impl BufMut, order: ByteOrder, value: u64) {
    match order {
        ByteOrder::LittleEndian => dst.put_u64_le(value),
        ByteOrder::BigEndian => dst.put_u64(value),
    }
}

/// Write a 16-bit signed integer in the session byte order.
pub fn put_i16(dst: &mut impl BufMut, order: ByteOrder, value: i16) {
    put_u16(dst, order, value as u16);
}

/// Write a 32-bit signed integer in the session byte order.
pub fn put_i32(dst: &mut impl BufMut, order: ByteOrder, value: i32) {
    put_u32(dst, order, value as u32);
}

/// Write a 64-bit signed integer in the session byte order.
pub fn put_i64(dst: &mut impl BufMut, order: ByteOrder, value: i64) {
    put_u64(dst, order, value as u64);
}

/// Read a string with a 1-byte length prefix, decoded with the session
/// charset.
pub fn read_b_string(src: &mut impl Buf, session: &Session) -> Result<String, ProtocolError> {
    let len = get_u8(src)? as usize;
    let bytes = get_bytes(src, len)?;
    session.decode_text(&bytes)
}

/// Read a string with a 2-byte length prefix, decoded with the session
/// charset.
pub fn read_us_string(src: &mut impl Buf, session: &Session) -> Result<String, ProtocolError> {
    let len = get_u16(src, session.byte_order)? as usize;
    let bytes = get_bytes(src, len)?;
    session.decode_text(&bytes)
}

/// Write a string with a 1-byte length prefix in the session charset.
///
/// Strings longer than 255 encoded bytes are truncated at the limit.
pub fn write_b_string(dst: &mut impl BufMut, session: &Session, s: &str) {
    let bytes = session.encode_text(s);
    let len = bytes.len().min(255);
    dst.put_u8(len as u8);
    dst.put_slice(&bytes[..len]);
}

/// Write a string with a 2-byte length prefix in the session charset.
pub fn write_us_string(dst: &mut impl BufMut, session: &Session, s: &str) {
    let bytes = session.encode_text(s);
    let len = bytes.len().min(65535);
    put_u16(dst, session.byte_order, len as u16);
    dst.put_slice(&bytes[..len]);
}

/// Read an opaque byte array with a 1-byte length prefix.
pub fn read_b_bytes(src: &mut impl Buf) -> Result<Bytes, ProtocolError> {
    let len = get_u8(src)? as usize;
    get_bytes(src, len)
}

/// Write an opaque byte array with a 1-byte length prefix.
pub fn write_b_bytes(dst: &mut impl BufMut, bytes: &[u8]) {
    let len = bytes.len().min(255);
    dst.put_u8(len as u8);
    dst.put_slice(&bytes[..len]);
}
