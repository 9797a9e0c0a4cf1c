//! TDS 5.0 packet (buffer) header definitions.
//!
//! Every network packet carries an 8-byte header. A logical message may span
//! multiple packets; the last one is marked `END_OF_MESSAGE`. The length
//! field is big-endian regardless of the session byte order.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// TDS packet header size in bytes.
pub const PACKET_HEADER_SIZE: usize = 8;

/// Maximum TDS packet size (64KB - 1).
pub const MAX_PACKET_SIZE: usize = 65535;

/// Default TDS 5.0 packet size before negotiation.
pub const DEFAULT_PACKET_SIZE: usize = 512;

/// TDS buffer type: the kind of message a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BufferType {
    /// Login record (first message of a dialog).
    Login = 0x02,
    /// Server response token stream.
    Response = 0x04,
    /// Attention (cancel) signal.
    Cancel = 0x06,
    /// Tokenized client request (language, RPC, option commands).
    Normal = 0x0F,
}

impl BufferType {
    /// Create a buffer type from a raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x02 => Ok(Self::Login),
            0x04 => Ok(Self::Response),
            0x06 => Ok(Self::Cancel),
            0x0F => Ok(Self::Normal),
            _ => Err(ProtocolError::InvalidBufferType(value)),
        }
    }
}

bitflags! {
    /// TDS buffer status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferStatus: u8 {
        /// Normal packet, more packets to follow.
        const NORMAL = 0x00;
        /// End of message (last packet).
        const END_OF_MESSAGE = 0x01;
        /// Server acknowledges an attention signal.
        const ATTENTION_ACK = 0x02;
        /// Client requests cancellation of the current request.
        const ATTENTION = 0x04;
        /// Payload is encrypted.
        const ENCRYPTED = 0x08;
    }
}

/// TDS packet header.
///
/// Layout: 1-byte buffer type, 1-byte status, 2-byte big-endian total
/// length, 2-byte channel, 1-byte packet number, 1-byte window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Kind of message this packet belongs to.
    pub buffer_type: BufferType,
    /// Status flags.
    pub status: BufferStatus,
    /// Total packet length including header, big-endian on the wire.
    pub length: u16,
    /// Logical channel. Zero unless the server multiplexes events.
    pub channel: u16,
    /// Packet sequence number (wraps at 255).
    pub packet_number: u8,
    /// Window size (unused, should be 0).
    pub window: u8,
}

impl PacketHeader {
    /// Create a new packet header.
    #[must_use]
    pub const fn new(buffer_type: BufferType, status: BufferStatus, length: u16) -> Self {
        Self {
            buffer_type,
            status,
            length,
            channel: 0,
            packet_number: 0,
            window: 0,
        }
    }

    /// Parse a packet header from bytes.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::truncated(PACKET_HEADER_SIZE, src.remaining()));
        }

        let buffer_type = BufferType::from_u8(src.get_u8())?;
        let status_byte = src.get_u8();
        let status = BufferStatus::from_bits(status_byte)
            .ok_or(ProtocolError::InvalidBufferStatus(status_byte))?;
        let length = src.get_u16();
        let channel = src.get_u16();
        let packet_number = src.get_u8();
        let window = src.get_u8();

        Ok(Self {
            buffer_type,
            status,
            length,
            channel,
            packet_number,
            window,
        })
    }

    /// Encode the packet header to bytes.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.buffer_type as u8);
        dst.put_u8(self.status.bits());
        dst.put_u16(self.length);
        dst.put_u16(self.channel);
        dst.put_u8(self.packet_number);
        dst.put_u8(self.window);
    }

    /// Encode the packet header to a new `Bytes` buffer.
    #[must_use]
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Get the payload length (total length minus header).
    #[must_use]
    pub const fn payload_length(&self) -> usize {
        self.length.saturating_sub(PACKET_HEADER_SIZE as u16) as usize
    }

    /// Check if this is the last packet in a message.
    #[must_use]
    pub const fn is_end_of_message(&self) -> bool {
        self.status.contains(BufferStatus::END_OF_MESSAGE)
    }

    /// Set the packet sequence number.
    #[must_use]
    pub const fn with_packet_number(mut self, number: u8) -> Self {
        self.packet_number = number;
        self
    }
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self {
            buffer_type: BufferType::Normal,
            status: BufferStatus::END_OF_MESSAGE,
            length: PACKET_HEADER_SIZE as u16,
            channel: 0,
            packet_number: 1,
            window: 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = PacketHeader {
            buffer_type: BufferType::Normal,
            status: BufferStatus::END_OF_MESSAGE,
            length: 100,
            channel: 7,
            packet_number: 3,
            window: 0,
        };

        let bytes = header.encode_to_bytes();
        assert_eq!(bytes.len(), PACKET_HEADER_SIZE);

        let mut cursor = bytes.as_ref();
        let decoded = PacketHeader::decode(&mut cursor).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn length_is_big_endian() {
        let header = PacketHeader::new(BufferType::Login, BufferStatus::END_OF_MESSAGE, 0x0201);
        let bytes = header.encode_to_bytes();
        assert_eq!(bytes[2], 0x02);
        assert_eq!(bytes[3], 0x01);
    }

    #[test]
    fn payload_length() {
        let header = PacketHeader::new(BufferType::Normal, BufferStatus::END_OF_MESSAGE, 100);
        assert_eq!(header.payload_length(), 92);
    }

    #[test]
    fn buffer_type_from_u8() {
        assert_eq!(BufferType::from_u8(0x02).unwrap(), BufferType::Login);
        assert_eq!(BufferType::from_u8(0x0F).unwrap(), BufferType::Normal);
        assert!(BufferType::from_u8(0xAB).is_err());
    }
}
