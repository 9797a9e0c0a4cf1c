//! TDS 5.0 login record.
//!
//! The login record is a fixed-layout structure sent as the first message of
//! a dialog (buffer type 0x02). String fields occupy a fixed width: the
//! encoded bytes, zero padding up to the width, then one trailing byte with
//! the actual length. The client's CAPABILITY token is appended directly
//! after the record in the same message.

use bytes::{BufMut, BytesMut};

use crate::capability::Capability;
use crate::codec::{ByteOrder, Session};
use crate::error::ProtocolError;
use crate::token::TokenType;

/// Wire width of the host, user, password, application, server, language
/// and charset fields.
pub const FIELD_WIDTH: usize = 30;
/// Wire width of the program name field.
pub const PROGNAME_WIDTH: usize = 10;
/// Wire width of the packet size field (ASCII digits).
pub const PACKETSIZE_WIDTH: usize = 6;
/// Wire width of the remote password area.
pub const REMOTE_PWD_WIDTH: usize = 255;

/// Protocol version requested at login: TDS 5.0.0.0.
pub const PROTOCOL_VERSION: [u8; 4] = [5, 0, 0, 0];

/// Byte-order/format magic values declared in the login record.
///
/// These tell the server how the client lays out its integers, characters,
/// floats and dates. The values are the Open Client constants for
/// little-endian IEEE hosts; [`ByteOrder::BigEndian`] flips the integer and
/// float codes.
mod format_codes {
    pub const INT2_LE: u8 = 0x03;
    pub const INT2_BE: u8 = 0x02;
    pub const INT4_LE: u8 = 0x01;
    pub const INT4_BE: u8 = 0x00;
    pub const CHAR_ASCII: u8 = 0x06;
    pub const FLT_IEEE_LE: u8 = 0x0A;
    pub const FLT_IEEE_BE: u8 = 0x04;
    pub const DATE_LE: u8 = 0x09;
    pub const DATE_BE: u8 = 0x08;
    pub const FLT4_IEEE_LE: u8 = 0x0D;
    pub const FLT4_IEEE_BE: u8 = 0x0C;
    pub const DATE4_LE: u8 = 0x11;
    pub const DATE4_BE: u8 = 0x10;
}

/// A TDS 5.0 login record.
#[derive(Debug, Clone)]
pub struct LoginRecord {
    /// Client host name.
    pub hostname: String,
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
    /// Client process identifier.
    pub host_process: String,
    /// Application name reported to the server.
    pub app_name: String,
    /// Server name from the interfaces entry (informational).
    pub server_name: String,
    /// Initial language, empty for server default.
    pub language: String,
    /// Requested charset name (e.g. `iso_1`, `utf8`).
    pub charset: String,
    /// Requested packet size in bytes.
    pub packet_size: u16,
    /// Integer/float byte order this client will use.
    pub byte_order: ByteOrder,
    /// Capability set appended to the record.
    pub capability: Capability,
}

impl LoginRecord {
    /// Encode the complete login message payload (record + capability
    /// token).
    pub fn encode(&self, dst: &mut BytesMut, session: &Session) -> Result<(), ProtocolError> {
        let le = self.byte_order == ByteOrder::LittleEndian;

        put_login_string(dst, session, self.hostname.as_str(), FIELD_WIDTH, "hostname")?;
        put_login_string(dst, session, self.username.as_str(), FIELD_WIDTH, "username")?;
        put_login_string(dst, session, self.password.as_str(), FIELD_WIDTH, "password")?;
        put_login_string(
            dst,
            session,
            self.host_process.as_str(),
            FIELD_WIDTH,
            "host_process",
        )?;

        dst.put_u8(if le { format_codes::INT2_LE } else { format_codes::INT2_BE });
        dst.put_u8(if le { format_codes::INT4_LE } else { format_codes::INT4_BE });
        dst.put_u8(format_codes::CHAR_ASCII);
        dst.put_u8(if le { format_codes::FLT_IEEE_LE } else { format_codes::FLT_IEEE_BE });
        dst.put_u8(if le { format_codes::DATE_LE } else { format_codes::DATE_BE });
        dst.put_u8(0x01); // notify on `use database`
        dst.put_u8(0x01); // disallow server-initiated dump/load and bulk insert
        dst.put_u8(0x00); // SQL interface type
        dst.put_u8(0x00); // network connection type
        dst.put_bytes(0, 7); // spare

        put_login_string(dst, session, self.app_name.as_str(), FIELD_WIDTH, "app_name")?;
        put_login_string(
            dst,
            session,
            self.server_name.as_str(),
            FIELD_WIDTH,
            "server_name",
        )?;

        // Remote password area: one entry for this server, password again.
        let pwd_bytes = session.encode_text(&self.password);
        if pwd_bytes.len() + 2 > REMOTE_PWD_WIDTH {
            return Err(ProtocolError::FieldTooLong {
                field: "password",
                max: REMOTE_PWD_WIDTH - 2,
            });
        }
        let mark = dst.len();
        dst.put_u8(0); // server name length: empty = any
        dst.put_u8(pwd_bytes.len() as u8);
        dst.put_slice(&pwd_bytes);
        let used = dst.len() - mark;
        dst.put_bytes(0, REMOTE_PWD_WIDTH - used);
        dst.put_u8(used as u8);

        dst.put_slice(&PROTOCOL_VERSION);

        put_login_string(dst, session, "rust-ase", PROGNAME_WIDTH, "prog_name")?;
        dst.put_slice(&[0, 3, 0, 0]); // program version

        dst.put_u8(0x00); // auto-convert short types
        dst.put_u8(if le { format_codes::FLT4_IEEE_LE } else { format_codes::FLT4_IEEE_BE });
        dst.put_u8(if le { format_codes::DATE4_LE } else { format_codes::DATE4_BE });

        put_login_string(dst, session, self.language.as_str(), FIELD_WIDTH, "language")?;
        dst.put_u8(0x01); // notify on language change

        dst.put_bytes(0, 2); // security label hierarchy
        dst.put_bytes(0, 8); // security components
        dst.put_bytes(0, 2); // security spare

        put_login_string(dst, session, self.charset.as_str(), FIELD_WIDTH, "charset")?;
        dst.put_u8(0x01); // notify on charset change

        let size_text = self.packet_size.to_string();
        put_login_string(dst, session, &size_text, PACKETSIZE_WIDTH, "packet_size")?;
        dst.put_bytes(0, 4); // spare

        dst.put_u8(TokenType::Capability as u8);
        self.capability.encode_body(dst, self.byte_order);

        Ok(())
    }
}

/// Write a fixed-width login string: encoded bytes, zero padding, then the
/// actual byte length in a trailing byte.
fn put_login_string(
    dst: &mut BytesMut,
    session: &Session,
    value: &str,
    width: usize,
    field: &'static str,
) -> Result<(), ProtocolError> {
    let bytes = session.encode_text(value);
    if bytes.len() > width {
        return Err(ProtocolError::FieldTooLong { field, max: width });
    }
    dst.put_slice(&bytes);
    dst.put_bytes(0, width - bytes.len());
    dst.put_u8(bytes.len() as u8);
    Ok(())
}
