//! TDS 5.0 capability negotiation.
//!
//! At login the client appends a CAPABILITY token (0xE2) to the login
//! record: one block of request capabilities it asserts and one block of
//! response capabilities it refuses to accept. The server answers with its
//! own CAPABILITY token intersecting the sets. The bit layout must be
//! reproduced exactly; a mismatch makes the server silently fall back to
//! older encodings (no bigdatetime, no wide tables) instead of erroring.
//!
//! Bits are numbered from 1 starting at the least significant bit of the
//! *last* byte of a block, so a block is a big-endian bit array.

use bytes::{Buf, BufMut};

use crate::codec;
use crate::error::ProtocolError;

/// Size in bytes of each capability block.
pub const CAP_BLOCK_LEN: usize = 14;

/// Block discriminator for request capabilities.
pub const CAP_REQUEST: u8 = 0x01;
/// Block discriminator for response capabilities.
pub const CAP_RESPONSE: u8 = 0x02;

/// Request capability bit numbers.
///
/// The names follow the `CS_REQ_*`/`CS_DATA_*` constants of Open Client.
pub mod request {
    /// Language requests.
    pub const LANG: u16 = 1;
    /// RPC requests.
    pub const RPC: u16 = 2;
    /// Registered procedure event notifications.
    pub const EVT: u16 = 3;
    /// Multiple result sets per request.
    pub const MSTAT: u16 = 4;
    /// Notification requests.
    pub const NOTIF: u16 = 5;
    /// RPC requests with parameter format/value blocks.
    pub const PARAM: u16 = 6;
    /// 1-byte integers.
    pub const DATA_INT1: u16 = 7;
    /// 2-byte integers.
    pub const DATA_INT2: u16 = 8;
    /// 4-byte integers.
    pub const DATA_INT4: u16 = 9;
    /// Bit values.
    pub const DATA_BIT: u16 = 10;
    /// Fixed-length character data.
    pub const DATA_CHAR: u16 = 11;
    /// Variable-length character data.
    pub const DATA_VCHAR: u16 = 12;
    /// Fixed-length binary data.
    pub const DATA_BIN: u16 = 13;
    /// Variable-length binary data.
    pub const DATA_VBIN: u16 = 14;
    /// 8-byte money.
    pub const DATA_MNY8: u16 = 15;
    /// 4-byte money.
    pub const DATA_MNY4: u16 = 16;
    /// 8-byte datetime.
    pub const DATA_DATE8: u16 = 17;
    /// 4-byte short datetime.
    pub const DATA_DATE4: u16 = 18;
    /// 4-byte float.
    pub const DATA_FLT4: u16 = 19;
    /// 8-byte float.
    pub const DATA_FLT8: u16 = 20;
    /// Numeric values.
    pub const DATA_NUM: u16 = 21;
    /// TEXT values.
    pub const DATA_TEXT: u16 = 22;
    /// IMAGE values.
    pub const DATA_IMAGE: u16 = 23;
    /// Decimal values.
    pub const DATA_DEC: u16 = 24;
    /// Long character values (LONGCHAR).
    pub const DATA_LCHAR: u16 = 25;
    /// Long binary values (LONGBINARY).
    pub const DATA_LBIN: u16 = 26;
    /// Nullable integers (INTN).
    pub const DATA_INTN: u16 = 27;
    /// Nullable datetimes (DATETIMEN).
    pub const DATA_DATETIMEN: u16 = 28;
    /// Nullable money (MONEYN).
    pub const DATA_MONEYN: u16 = 29;
    /// Out-of-band (attention) cancels.
    pub const CON_OOB: u16 = 36;
    /// Tokenized bulk copy.
    pub const PROTO_BULK: u16 = 40;
    /// Dynamic SQL.
    pub const PROTO_DYNAMIC: u16 = 44;
    /// Nullable floats (FLTN).
    pub const DATA_FLTN: u16 = 46;
    /// Nullable bits (BITN).
    pub const DATA_BITN: u16 = 47;
    /// 8-byte integers.
    pub const DATA_INT8: u16 = 48;
    /// Wide (v2) row format tokens.
    pub const WIDETABLES: u16 = 58;
    /// Nullable bigdatetime/bigtime values.
    pub const DATA_BIGDATETIME: u16 = 79;
}

/// Response capability bit numbers (`CS_RES_*`): features the client asks
/// the server *not* to use in responses.
pub mod response {
    /// Suppress informational MSG tokens.
    pub const NOMSG: u16 = 3;
    /// Suppress extended error data, plain done status only.
    pub const NOEED: u16 = 4;
    /// No TDS debug tokens.
    pub const NOTDSDEBUG: u16 = 14;
}

/// A fixed-size capability bit block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilityBlock {
    bytes: [u8; CAP_BLOCK_LEN],
}

impl CapabilityBlock {
    /// Create an empty block (no bits set).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: [0; CAP_BLOCK_LEN],
        }
    }

    /// Create a block from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; CAP_BLOCK_LEN]) -> Self {
        Self { bytes }
    }

    /// Set a capability bit. Bits beyond the block are ignored.
    pub fn set(&mut self, bit: u16) {
        let bit = bit as usize;
        if bit == 0 || bit > CAP_BLOCK_LEN * 8 {
            return;
        }
        let idx = CAP_BLOCK_LEN - 1 - (bit - 1) / 8;
        self.bytes[idx] |= 1 << ((bit - 1) % 8);
    }

    /// Check whether a capability bit is set.
    #[must_use]
    pub fn contains(&self, bit: u16) -> bool {
        let bit = bit as usize;
        if bit == 0 || bit > CAP_BLOCK_LEN * 8 {
            return false;
        }
        let idx = CAP_BLOCK_LEN - 1 - (bit - 1) / 8;
        self.bytes[idx] & (1 << ((bit - 1) % 8)) != 0
    }

    /// Raw block bytes as sent on the wire.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; CAP_BLOCK_LEN] {
        &self.bytes
    }
}

/// A CAPABILITY token: request assertions plus response suppressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capability {
    /// Features the client asserts it can issue.
    pub request: CapabilityBlock,
    /// Response features the client refuses to accept.
    pub response: CapabilityBlock,
}

impl Capability {
    /// The capability set this driver asserts at login.
    ///
    /// Everything the token and value codecs implement is requested; the
    /// response block stays empty so the server may use its full response
    /// vocabulary.
    #[must_use]
    pub fn client_default() -> Self {
        let mut request = CapabilityBlock::new();
        for bit in [
            request::LANG,
            request::RPC,
            request::MSTAT,
            request::PARAM,
            request::DATA_INT1,
            request::DATA_INT2,
            request::DATA_INT4,
            request::DATA_BIT,
            request::DATA_CHAR,
            request::DATA_VCHAR,
            request::DATA_BIN,
            request::DATA_VBIN,
            request::DATA_MNY8,
            request::DATA_MNY4,
            request::DATA_DATE8,
            request::DATA_DATE4,
            request::DATA_FLT4,
            request::DATA_FLT8,
            request::DATA_NUM,
            request::DATA_TEXT,
            request::DATA_IMAGE,
            request::DATA_DEC,
            request::DATA_LCHAR,
            request::DATA_LBIN,
            request::DATA_INTN,
            request::DATA_DATETIMEN,
            request::DATA_MONEYN,
            request::CON_OOB,
            request::DATA_FLTN,
            request::DATA_BITN,
            request::DATA_INT8,
            request::WIDETABLES,
            request::DATA_BIGDATETIME,
        ] {
            request.set(bit);
        }

        Self {
            request,
            response: CapabilityBlock::new(),
        }
    }

    /// Encode the token body (excluding the 0xE2 tag byte).
    pub fn encode_body(&self, dst: &mut impl BufMut, order: crate::codec::ByteOrder) {
        let block_len = (2 + CAP_BLOCK_LEN) as u16;
        codec::put_u16(dst, order, block_len * 2);
        dst.put_u8(CAP_REQUEST);
        dst.put_u8(CAP_BLOCK_LEN as u8);
        dst.put_slice(self.request.as_bytes());
        dst.put_u8(CAP_RESPONSE);
        dst.put_u8(CAP_BLOCK_LEN as u8);
        dst.put_slice(self.response.as_bytes());
    }

    /// Decode the token body (excluding the 0xE2 tag byte).
    ///
    /// Servers may send blocks shorter or longer than ours; missing high
    /// bytes read as zero and extra high bytes are skipped, keeping the
    /// reader aligned for the next token.
    pub fn decode_body(
        src: &mut impl Buf,
        order: crate::codec::ByteOrder,
    ) -> Result<Self, ProtocolError> {
        let total = codec::get_u16(src, order)? as usize;
        let mut body = codec::get_bytes(src, total)?;

        let mut capability = Self::default();
        while body.has_remaining() {
            let kind = codec::get_u8(&mut body)?;
            let len = codec::get_u8(&mut body)? as usize;
            let block_bytes = codec::get_bytes(&mut body, len)?;

            let mut bytes = [0u8; CAP_BLOCK_LEN];
            // Bits count from the end of the block, so align on the tail.
            let copy = len.min(CAP_BLOCK_LEN);
            bytes[CAP_BLOCK_LEN - copy..].copy_from_slice(&block_bytes[len - copy..]);
            let block = CapabilityBlock::from_bytes(bytes);

            match kind {
                CAP_REQUEST => capability.request = block,
                CAP_RESPONSE => capability.response = block,
                // Unknown block kinds are skipped; bytes already consumed.
                _ => {}
            }
        }

        Ok(capability)
    }
}
