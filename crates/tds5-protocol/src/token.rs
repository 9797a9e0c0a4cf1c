//! TDS 5.0 token stream definitions.
//!
//! Tokens are the units of TDS dialog data. A request message carries
//! language, RPC and option tokens; a response message carries format,
//! row, status, message and completion tokens, read strictly in the order
//! the server sends them.
//!
//! ## Length strategies
//!
//! Three coexist, and the reader must never guess:
//! - self-length-prefixed tokens declare their remaining length right after
//!   the tag and are consumed exactly, even for uninterpreted sub-fields;
//! - structural tokens (ROW, PARAMS) have no length of their own; each
//!   value's width comes from the governing [`FormatDescriptor`];
//! - every other tag falls back to [`skip_rule`], which derives the length
//!   encoding from the tag's own bit pattern so obsolete tokens cannot
//!   desynchronize the stream.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::capability::Capability;
use crate::codec::{self, Session};
use crate::error::ProtocolError;
use crate::types::{FormatStatus, LengthClass, ParamStatus, WireType};

/// Token type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// Parameter format, wide variant (PARAMFMT2).
    ParamFormat2 = 0x20,
    /// Language request (LANGUAGE).
    Language = 0x21,
    /// Row format, wide variant (ROWFMT2).
    RowFormat2 = 0x61,
    /// Negotiation message (MSG).
    Msg = 0x65,
    /// Return status of a stored procedure (RETURNSTATUS).
    ReturnStatus = 0x79,
    /// Option command (OPTIONCMD).
    OptionCommand = 0xA6,
    /// Login acknowledgment (LOGINACK).
    LoginAck = 0xAD,
    /// Control/format information (CONTROL).
    Control = 0xAE,
    /// Row data (ROW).
    Row = 0xD1,
    /// Parameter values (PARAMS).
    Params = 0xD7,
    /// Capability negotiation (CAPABILITY).
    Capability = 0xE2,
    /// Environment change (ENVCHANGE).
    EnvChange = 0xE3,
    /// Extended error data (EED).
    Eed = 0xE5,
    /// Remote procedure call request (DBRPC).
    DbRpc = 0xE6,
    /// Parameter format (PARAMFMT).
    ParamFormat = 0xEC,
    /// Row format (ROWFMT).
    RowFormat = 0xEE,
    /// Completion of a plain request (DONE).
    Done = 0xFD,
    /// Completion of a stored procedure (DONEPROC).
    DoneProc = 0xFE,
    /// Completion of a statement inside a procedure (DONEINPROC).
    DoneInProc = 0xFF,
}

impl TokenType {
    /// Create a token type from a raw byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x20 => Some(Self::ParamFormat2),
            0x21 => Some(Self::Language),
            0x61 => Some(Self::RowFormat2),
            0x65 => Some(Self::Msg),
            0x79 => Some(Self::ReturnStatus),
            0xA6 => Some(Self::OptionCommand),
            0xAD => Some(Self::LoginAck),
            0xAE => Some(Self::Control),
            0xD1 => Some(Self::Row),
            0xD7 => Some(Self::Params),
            0xE2 => Some(Self::Capability),
            0xE3 => Some(Self::EnvChange),
            0xE5 => Some(Self::Eed),
            0xE6 => Some(Self::DbRpc),
            0xEC => Some(Self::ParamFormat),
            0xEE => Some(Self::RowFormat),
            0xFD => Some(Self::Done),
            0xFE => Some(Self::DoneProc),
            0xFF => Some(Self::DoneInProc),
            _ => None,
        }
    }
}

/// Parsed TDS 5.0 token.
#[derive(Debug, Clone)]
pub enum Token {
    /// Capability negotiation result.
    Capability(Capability),
    /// Login acknowledgment.
    LoginAck(LoginAck),
    /// Completion of a plain request.
    Done(Done),
    /// Completion of a stored procedure.
    DoneProc(Done),
    /// Completion of a statement inside a procedure.
    DoneInProc(Done),
    /// Row data decoded against the current row format.
    Row(RawRow),
    /// Row format establishing a new format descriptor.
    RowFormat(FormatDescriptor),
    /// Parameter format establishing a new parameter descriptor.
    ParamFormat(FormatDescriptor),
    /// Parameter values decoded against the current parameter format.
    Params(RawRow),
    /// Stored procedure return status.
    ReturnStatus(i32),
    /// Extended error or informational data.
    Eed(Eed),
    /// Environment change notification.
    EnvChange(EnvChange),
    /// Negotiation message.
    Msg(Msg),
    /// Option command or option report.
    OptionCommand(OptionCommand),
    /// Control/format information. Carried for alignment, not interpreted.
    Control(Control),
    /// Language request (seen when decoding our own request streams).
    Language(Language),
    /// RPC request (seen when decoding our own request streams).
    DbRpc(DbRpc),
    /// A token this driver does not interpret, skipped via [`skip_rule`].
    Unknown {
        /// Raw token tag.
        tag: u8,
        /// Raw token body.
        body: Bytes,
    },
}

// =============================================================================
// Completion tokens
// =============================================================================

bitflags! {
    /// DONE status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DoneStatus: u16 {
        /// More results follow.
        const MORE = 0x0001;
        /// The request produced an error.
        const ERROR = 0x0002;
        /// A transaction is in progress.
        const INXACT = 0x0004;
        /// Completion of a procedure.
        const PROC = 0x0008;
        /// The row count field is valid.
        const COUNT = 0x0010;
        /// Acknowledges an attention (cancel) signal.
        const ATTN = 0x0020;
        /// Completion of an event.
        const EVENT = 0x0040;
    }
}

/// DONE / DONEPROC / DONEINPROC token.
#[derive(Debug, Clone, Copy)]
pub struct Done {
    /// Status flags.
    pub status: DoneStatus,
    /// Transaction state.
    pub transaction_state: u16,
    /// Affected-row count, valid when [`DoneStatus::COUNT`] is set.
    pub count: u32,
}

impl Done {
    /// Size of the token body in bytes (excluding the tag).
    pub const SIZE: usize = 8;

    /// Decode the token body.
    pub fn decode(src: &mut impl Buf, session: &Session) -> Result<Self, ProtocolError> {
        let order = session.byte_order;
        let bits = codec::get_u16(src, order)?;
        let transaction_state = codec::get_u16(src, order)?;
        let count = codec::get_u32(src, order)?;
        Ok(Self {
            status: DoneStatus::from_bits_truncate(bits),
            transaction_state,
            count,
        })
    }

    /// Encode the token including its tag.
    pub fn encode(&self, dst: &mut impl BufMut, session: &Session, token_type: TokenType) {
        let order = session.byte_order;
        dst.put_u8(token_type as u8);
        codec::put_u16(dst, order, self.status.bits());
        codec::put_u16(dst, order, self.transaction_state);
        codec::put_u32(dst, order, self.count);
    }

    /// Check if more results follow this completion.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.status.contains(DoneStatus::MORE)
    }

    /// Check if this completion acknowledges an attention signal.
    #[must_use]
    pub const fn is_attention_ack(&self) -> bool {
        self.status.contains(DoneStatus::ATTN)
    }
}

// =============================================================================
// Login acknowledgment
// =============================================================================

/// LOGINACK status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    /// Login accepted; the dialog is ready.
    Succeeded,
    /// Login rejected.
    Failed,
    /// The server demands a further negotiation round (e.g. encrypted
    /// password), described by a following MSG token.
    Negotiate,
}

impl LoginStatus {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            5 => Some(Self::Succeeded),
            6 => Some(Self::Failed),
            7 => Some(Self::Negotiate),
            _ => None,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Succeeded => 5,
            Self::Failed => 6,
            Self::Negotiate => 7,
        }
    }
}

/// LOGINACK token.
#[derive(Debug, Clone)]
pub struct LoginAck {
    /// Outcome of the login attempt.
    pub status: LoginStatus,
    /// Protocol version the server selected (major, minor, rev, sub).
    pub protocol_version: [u8; 4],
    /// Server product name.
    pub server_name: String,
    /// Server product version (major, minor, rev, sub).
    pub server_version: [u8; 4],
}

impl LoginAck {
    fn decode_body(src: &mut impl Buf, session: &Session) -> Result<Self, ProtocolError> {
        let raw_status = codec::get_u8(src)?;
        let status = LoginStatus::from_u8(raw_status)
            .ok_or(ProtocolError::InvalidBufferStatus(raw_status))?;
        let mut protocol_version = [0u8; 4];
        for slot in &mut protocol_version {
            *slot = codec::get_u8(src)?;
        }
        let server_name = codec::read_b_string(src, session)?;
        let mut server_version = [0u8; 4];
        for slot in &mut server_version {
            *slot = codec::get_u8(src)?;
        }
        Ok(Self {
            status,
            protocol_version,
            server_name,
            server_version,
        })
    }

    /// Encode the token including tag and length prefix.
    pub fn encode(&self, dst: &mut impl BufMut, session: &Session) {
        let mut body = BytesMut::new();
        body.put_u8(self.status.as_u8());
        body.put_slice(&self.protocol_version);
        codec::write_b_string(&mut body, session, &self.server_name);
        body.put_slice(&self.server_version);

        dst.put_u8(TokenType::LoginAck as u8);
        codec::put_u16(dst, session.byte_order, body.len() as u16);
        dst.put_slice(&body);
    }
}

// =============================================================================
// Extended error data
// =============================================================================

/// EED token: a server error or informational message.
///
/// Severity class 10 and below is informational; above 16 the statement was
/// aborted; class 19 and above the connection itself is no longer usable.
#[derive(Debug, Clone)]
pub struct Eed {
    /// Message number.
    pub number: i32,
    /// Message state.
    pub state: u8,
    /// Severity class.
    pub class: u8,
    /// Five-character SQLSTATE, when the server provides one.
    pub sql_state: Bytes,
    /// Whether followup EED parameter rows follow.
    pub has_followup: bool,
    /// Transaction state at the time of the message.
    pub transaction_state: u16,
    /// Message text.
    pub message: String,
    /// Server name.
    pub server: String,
    /// Procedure name, empty outside procedures.
    pub procedure: String,
    /// Line number within the batch or procedure.
    pub line: u16,
}

impl Eed {
    fn decode_body(src: &mut impl Buf, session: &Session) -> Result<Self, ProtocolError> {
        let order = session.byte_order;
        let number = codec::get_i32(src, order)?;
        let state = codec::get_u8(src)?;
        let class = codec::get_u8(src)?;
        let sql_state = codec::read_b_bytes(src)?;
        let has_followup = codec::get_u8(src)? != 0;
        let transaction_state = codec::get_u16(src, order)?;
        let message = codec::read_us_string(src, session)?;
        let server = codec::read_b_string(src, session)?;
        let procedure = codec::read_b_string(src, session)?;
        let line = codec::get_u16(src, order)?;
        Ok(Self {
            number,
            state,
            class,
            sql_state,
            has_followup,
            transaction_state,
            message,
            server,
            procedure,
            line,
        })
    }

    /// Encode the token including tag and length prefix.
    pub fn encode(&self, dst: &mut impl BufMut, session: &Session) {
        let order = session.byte_order;
        let mut body = BytesMut::new();
        codec::put_i32(&mut body, order, self.number);
        body.put_u8(self.state);
        body.put_u8(self.class);
        codec::write_b_bytes(&mut body, &self.sql_state);
        body.put_u8(u8::from(self.has_followup));
        codec::put_u16(&mut body, order, self.transaction_state);
        codec::write_us_string(&mut body, session, &self.message);
        codec::write_b_string(&mut body, session, &self.server);
        codec::write_b_string(&mut body, session, &self.procedure);
        codec::put_u16(&mut body, order, self.line);

        dst.put_u8(TokenType::Eed as u8);
        codec::put_u16(dst, order, body.len() as u16);
        dst.put_slice(&body);
    }

    /// Check if this message is informational (not an error).
    #[must_use]
    pub const fn is_informational(&self) -> bool {
        self.class <= 10
    }

    /// Check if the severity makes the connection unusable.
    #[must_use]
    pub const fn is_connection_fatal(&self) -> bool {
        self.class >= 19
    }
}

// =============================================================================
// Environment change
// =============================================================================

/// Kind of environment change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvKind {
    /// Current database changed.
    Database,
    /// Session language changed.
    Language,
    /// Session charset changed.
    Charset,
    /// Negotiated packet size changed.
    PacketSize,
    /// A kind this driver does not interpret.
    Other(u8),
}

impl EnvKind {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Database,
            2 => Self::Language,
            3 => Self::Charset,
            4 => Self::PacketSize,
            other => Self::Other(other),
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Database => 1,
            Self::Language => 2,
            Self::Charset => 3,
            Self::PacketSize => 4,
            Self::Other(v) => v,
        }
    }
}

/// One environment update: the new and previous values.
#[derive(Debug, Clone)]
pub struct EnvUpdate {
    /// What changed.
    pub kind: EnvKind,
    /// New value.
    pub new_value: String,
    /// Previous value.
    pub old_value: String,
}

/// ENVCHANGE token: one or more environment updates.
#[derive(Debug, Clone)]
pub struct EnvChange {
    /// Updates in server order.
    pub updates: Vec<EnvUpdate>,
}

impl EnvChange {
    fn decode_body(mut body: Bytes, session: &Session) -> Result<Self, ProtocolError> {
        let mut updates = Vec::new();
        while body.has_remaining() {
            let kind = EnvKind::from_u8(codec::get_u8(&mut body)?);
            let new_value = codec::read_b_string(&mut body, session)?;
            let old_value = codec::read_b_string(&mut body, session)?;
            updates.push(EnvUpdate {
                kind,
                new_value,
                old_value,
            });
        }
        Ok(Self { updates })
    }

    /// Encode the token including tag and length prefix.
    pub fn encode(&self, dst: &mut impl BufMut, session: &Session) {
        let mut body = BytesMut::new();
        for update in &self.updates {
            body.put_u8(update.kind.as_u8());
            codec::write_b_string(&mut body, session, &update.new_value);
            codec::write_b_string(&mut body, session, &update.old_value);
        }
        dst.put_u8(TokenType::EnvChange as u8);
        codec::put_u16(dst, session.byte_order, body.len() as u16);
        dst.put_slice(&body);
    }
}

// =============================================================================
// Negotiation message, option command, control
// =============================================================================

/// MSG token: a numbered protocol message, used for login negotiation
/// rounds among other things.
#[derive(Debug, Clone, Copy)]
pub struct Msg {
    /// Whether followup parameter tokens belong to this message.
    pub has_args: bool,
    /// Message identifier.
    pub msg_id: u16,
}

impl Msg {
    fn decode_body(src: &mut impl Buf, session: &Session) -> Result<Self, ProtocolError> {
        let status = codec::get_u8(src)?;
        let msg_id = codec::get_u16(src, session.byte_order)?;
        Ok(Self {
            has_args: status & 0x01 != 0,
            msg_id,
        })
    }

    /// Encode the token including tag and 1-byte length prefix.
    pub fn encode(&self, dst: &mut impl BufMut, session: &Session) {
        dst.put_u8(TokenType::Msg as u8);
        dst.put_u8(3);
        dst.put_u8(u8::from(self.has_args));
        codec::put_u16(dst, session.byte_order, self.msg_id);
    }
}

/// OPTIONCMD command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionCmd {
    /// Set an option to a value.
    Set,
    /// Reset an option to its default.
    Default,
    /// Request the current value.
    List,
    /// Server report of a current value.
    Info,
}

impl OptionCmd {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Set),
            2 => Some(Self::Default),
            3 => Some(Self::List),
            4 => Some(Self::Info),
            _ => None,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Set => 1,
            Self::Default => 2,
            Self::List => 3,
            Self::Info => 4,
        }
    }
}

/// Option number for the session text size limit.
pub const OPT_TEXTSIZE: u8 = 17;

/// OPTIONCMD token.
#[derive(Debug, Clone)]
pub struct OptionCommand {
    /// Command code.
    pub command: OptionCmd,
    /// Option number.
    pub option: u8,
    /// Option argument, layout depends on the option.
    pub argument: Bytes,
}

impl OptionCommand {
    /// Build a `set textsize` command with a 4-byte argument.
    #[must_use]
    pub fn set_text_size(size: u32, session: &Session) -> Self {
        let mut argument = BytesMut::with_capacity(4);
        codec::put_u32(&mut argument, session.byte_order, size);
        Self {
            command: OptionCmd::Set,
            option: OPT_TEXTSIZE,
            argument: argument.freeze(),
        }
    }

    fn decode_body(src: &mut impl Buf, _session: &Session) -> Result<Self, ProtocolError> {
        let raw = codec::get_u8(src)?;
        let command = OptionCmd::from_u8(raw).ok_or(ProtocolError::InvalidBufferStatus(raw))?;
        let option = codec::get_u8(src)?;
        let argument = codec::read_b_bytes(src)?;
        Ok(Self {
            command,
            option,
            argument,
        })
    }

    /// Encode the token including tag and length prefix.
    pub fn encode(&self, dst: &mut impl BufMut, session: &Session) {
        let mut body = BytesMut::new();
        body.put_u8(self.command.as_u8());
        body.put_u8(self.option);
        codec::write_b_bytes(&mut body, &self.argument);

        dst.put_u8(TokenType::OptionCommand as u8);
        codec::put_u16(dst, session.byte_order, body.len() as u16);
        dst.put_slice(&body);
    }
}

/// CONTROL token: per-column user format strings. The driver keeps them
/// only to stay aligned; nothing downstream interprets them.
#[derive(Debug, Clone)]
pub struct Control {
    /// One format string per column of the preceding row format.
    pub formats: Vec<String>,
}

impl Control {
    fn decode_body(mut body: Bytes, session: &Session) -> Result<Self, ProtocolError> {
        let mut formats = Vec::new();
        while body.has_remaining() {
            formats.push(codec::read_b_string(&mut body, session)?);
        }
        Ok(Self { formats })
    }
}

// =============================================================================
// Request tokens
// =============================================================================

/// LANGUAGE token: a SQL text request.
#[derive(Debug, Clone)]
pub struct Language {
    /// Whether a parameter format/value pair follows.
    pub has_params: bool,
    /// SQL text.
    pub text: String,
}

impl Language {
    /// Encode the token including tag and 4-byte length prefix.
    pub fn encode(&self, dst: &mut impl BufMut, session: &Session) {
        let text = session.encode_text(&self.text);
        dst.put_u8(TokenType::Language as u8);
        codec::put_u32(dst, session.byte_order, (text.len() + 1) as u32);
        dst.put_u8(u8::from(self.has_params));
        dst.put_slice(&text);
    }

    fn decode_body(mut body: Bytes, session: &Session) -> Result<Self, ProtocolError> {
        let status = codec::get_u8(&mut body)?;
        let text = session.decode_text(&body)?;
        Ok(Self {
            has_params: status & 0x01 != 0,
            text,
        })
    }
}

bitflags! {
    /// DBRPC option flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DbRpcOptions: u16 {
        /// Recompile the procedure before execution.
        const RECOMPILE = 0x0001;
        /// A parameter format/value pair follows.
        const HAS_PARAMS = 0x0002;
    }
}

/// DBRPC token: a stored procedure call by name.
#[derive(Debug, Clone)]
pub struct DbRpc {
    /// Procedure name.
    pub name: String,
    /// Option flags.
    pub options: DbRpcOptions,
}

impl DbRpc {
    /// Encode the token including tag and length prefix.
    pub fn encode(&self, dst: &mut impl BufMut, session: &Session) {
        let mut body = BytesMut::new();
        codec::write_b_string(&mut body, session, &self.name);
        codec::put_u16(&mut body, session.byte_order, self.options.bits());

        dst.put_u8(TokenType::DbRpc as u8);
        codec::put_u16(dst, session.byte_order, body.len() as u16);
        dst.put_slice(&body);
    }

    fn decode_body(src: &mut impl Buf, session: &Session) -> Result<Self, ProtocolError> {
        let name = codec::read_b_string(src, session)?;
        let bits = codec::get_u16(src, session.byte_order)?;
        Ok(Self {
            name,
            options: DbRpcOptions::from_bits_truncate(bits),
        })
    }
}

// =============================================================================
// Format descriptors
// =============================================================================

/// One column or parameter definition within a format descriptor.
#[derive(Debug, Clone)]
pub struct FormatColumn {
    /// Column or parameter name.
    pub name: String,
    /// Display label (wide formats only, otherwise equals `name`).
    pub label: String,
    /// Status flags.
    pub status: FormatStatus,
    /// Server user type. Decoded and kept, not interpreted.
    pub user_type: i32,
    /// Wire data type.
    pub wire_type: WireType,
    /// Raw type tag as received.
    pub raw_type: u8,
    /// Maximum length for variable types.
    pub length: Option<u32>,
    /// Precision for numeric/decimal.
    pub precision: Option<u8>,
    /// Scale for numeric/decimal.
    pub scale: Option<u8>,
    /// Locale string, usually empty.
    pub locale: String,
}

impl FormatColumn {
    /// Create a minimal column of a given type, for parameter blocks and
    /// tests.
    #[must_use]
    pub fn new(name: impl Into<String>, wire_type: WireType) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            status: FormatStatus::empty(),
            user_type: 0,
            wire_type,
            raw_type: wire_type as u8,
            length: None,
            precision: None,
            scale: None,
            locale: String::new(),
        }
    }

    /// Whether a zero-length value decodes to SQL NULL for this column.
    #[must_use]
    pub fn null_allowed(&self) -> bool {
        self.status.contains(FormatStatus::NULLALLOWED)
    }

    /// Mark the column nullable.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.status |= FormatStatus::NULLALLOWED;
        self
    }

    /// Set maximum length.
    #[must_use]
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Set precision and scale.
    #[must_use]
    pub fn with_precision_scale(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }
}

/// An ordered list of column or parameter definitions, established by a
/// ROWFMT/PARAMFMT token and governing every subsequent ROW/PARAMS token
/// until superseded.
#[derive(Debug, Clone, Default)]
pub struct FormatDescriptor {
    /// Column definitions in wire order.
    pub columns: Vec<FormatColumn>,
}

impl FormatDescriptor {
    /// Create a descriptor from columns.
    #[must_use]
    pub fn new(columns: Vec<FormatColumn>) -> Self {
        Self { columns }
    }

    /// Number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Look up a column index by name.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    fn decode_body(
        mut body: Bytes,
        session: &Session,
        wide: bool,
        is_param: bool,
    ) -> Result<Self, ProtocolError> {
        let order = session.byte_order;
        let count = codec::get_u16(&mut body, order)? as usize;
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            columns.push(Self::decode_column(&mut body, session, wide, is_param)?);
        }
        Ok(Self { columns })
    }

    fn decode_column(
        src: &mut impl Buf,
        session: &Session,
        wide: bool,
        is_param: bool,
    ) -> Result<FormatColumn, ProtocolError> {
        let order = session.byte_order;

        let (label, name, status) = if wide {
            let label = codec::read_b_string(src, session)?;
            // Catalog, schema and table names are consumed for alignment
            // only.
            let _catalog = codec::read_b_string(src, session)?;
            let _schema = codec::read_b_string(src, session)?;
            let _table = codec::read_b_string(src, session)?;
            let name = codec::read_b_string(src, session)?;
            let status = codec::get_u32(src, order)?;
            (label, name, status)
        } else {
            let name = codec::read_b_string(src, session)?;
            let status = u32::from(codec::get_u8(src)?);
            (name.clone(), name, status)
        };

        let user_type = codec::get_i32(src, order)?;
        let raw_type = codec::get_u8(src)?;
        let wire_type = match WireType::from_u8(raw_type) {
            Ok(t) => t,
            // Legacy servers report some parameters with a combined
            // Integer|Numeric code; resolved as FLT8, nothing wider.
            Err(e) => {
                if is_param {
                    resolve_param_fallback(raw_type).ok_or(e)?
                } else {
                    return Err(e);
                }
            }
        };

        let mut length = None;
        let mut precision = None;
        let mut scale = None;
        match wire_type.length_class() {
            LengthClass::Fixed(_) => {}
            LengthClass::ByteLen => {
                length = Some(u32::from(codec::get_u8(src)?));
                if wire_type.has_precision_scale() {
                    precision = Some(codec::get_u8(src)?);
                    scale = Some(codec::get_u8(src)?);
                }
            }
            LengthClass::LongLen => {
                length = Some(codec::get_u32(src, order)?);
            }
            LengthClass::TextPtr => {
                length = Some(codec::get_u32(src, order)?);
                // Source object name, alignment only.
                let _object = codec::read_us_string(src, session)?;
            }
        }

        let locale = codec::read_b_string(src, session)?;

        Ok(FormatColumn {
            name,
            label,
            status: FormatStatus::from_bits_truncate(status),
            user_type,
            wire_type,
            raw_type,
            length,
            precision,
            scale,
            locale,
        })
    }

    fn encode_column(
        &self,
        col: &FormatColumn,
        dst: &mut BytesMut,
        session: &Session,
        wide: bool,
    ) -> Result<(), ProtocolError> {
        let order = session.byte_order;

        if wide {
            codec::write_b_string(dst, session, &col.label);
            codec::write_b_string(dst, session, "");
            codec::write_b_string(dst, session, "");
            codec::write_b_string(dst, session, "");
            codec::write_b_string(dst, session, &col.name);
            codec::put_u32(dst, order, col.status.bits());
        } else {
            codec::write_b_string(dst, session, &col.name);
            dst.put_u8(col.status.bits() as u8);
        }

        codec::put_i32(dst, order, col.user_type);
        dst.put_u8(col.raw_type);

        match col.wire_type.length_class() {
            LengthClass::Fixed(_) => {}
            LengthClass::ByteLen => {
                let length = col.length.unwrap_or(255);
                if length > 255 {
                    return Err(ProtocolError::ValueTooLong {
                        tag: col.raw_type,
                        max: 255,
                        actual: length as usize,
                    });
                }
                dst.put_u8(length as u8);
                if col.wire_type.has_precision_scale() {
                    dst.put_u8(col.precision.unwrap_or(18));
                    dst.put_u8(col.scale.unwrap_or(0));
                }
            }
            LengthClass::LongLen => {
                codec::put_u32(dst, order, col.length.unwrap_or(0x7FFF_FFFF));
            }
            LengthClass::TextPtr => {
                codec::put_u32(dst, order, col.length.unwrap_or(0x7FFF_FFFF));
                codec::write_us_string(dst, session, "");
            }
        }

        codec::write_b_string(dst, session, &col.locale);
        Ok(())
    }

    /// Encode as a format token.
    ///
    /// `token_type` selects ROWFMT / ROWFMT2 / PARAMFMT / PARAMFMT2; the
    /// wide variants carry a 4-byte total length and 4-byte column status.
    /// Fails when a one-byte-length column declares a length over 255.
    pub fn encode(
        &self,
        dst: &mut impl BufMut,
        session: &Session,
        token_type: TokenType,
    ) -> Result<(), ProtocolError> {
        let order = session.byte_order;
        let wide = matches!(token_type, TokenType::RowFormat2 | TokenType::ParamFormat2);

        let mut body = BytesMut::new();
        codec::put_u16(&mut body, order, self.columns.len() as u16);
        for col in &self.columns {
            self.encode_column(col, &mut body, session, wide)?;
        }

        dst.put_u8(token_type as u8);
        if wide {
            codec::put_u32(dst, order, body.len() as u32);
        } else {
            codec::put_u16(dst, order, body.len() as u16);
        }
        dst.put_slice(&body);
        Ok(())
    }
}

/// Combined Integer|Numeric type code some legacy servers report for
/// parameters resolved from metadata.
pub const PARAM_INT_NUMERIC: u8 = WireType::Int4 as u8 | WireType::Numeric as u8;

/// Compatibility rule: the combined Integer|Numeric parameter code resolves
/// to FLT8. Deliberately narrow; no other unknown code is mapped.
#[must_use]
pub fn resolve_param_fallback(raw_type: u8) -> Option<WireType> {
    (raw_type == PARAM_INT_NUMERIC).then_some(WireType::Flt8)
}

// =============================================================================
// Row and parameter values
// =============================================================================

/// A decoded ROW or PARAMS token: one raw value per format column.
///
/// `None` is the wire-level null indicator (zero length for variable types,
/// a zero text pointer for TEXT/IMAGE). Whether it means SQL NULL or an
/// empty value is decided against the column's NULLALLOWED flag by the
/// value marshaling layer.
#[derive(Debug, Clone)]
pub struct RawRow {
    /// Raw values aligned to the governing format descriptor.
    pub values: Vec<Option<Bytes>>,
}

impl RawRow {
    /// Decode a row against `format`, consuming exactly one value per
    /// column in declared order.
    pub fn decode(
        src: &mut impl Buf,
        session: &Session,
        format: &FormatDescriptor,
    ) -> Result<Self, ProtocolError> {
        let mut values = Vec::with_capacity(format.columns.len());
        for col in &format.columns {
            values.push(Self::decode_value(src, session, col)?);
        }
        Ok(Self { values })
    }

    /// Decode a single value according to the column's length class.
    fn decode_value(
        src: &mut impl Buf,
        session: &Session,
        col: &FormatColumn,
    ) -> Result<Option<Bytes>, ProtocolError> {
        let order = session.byte_order;
        match col.wire_type.length_class() {
            LengthClass::Fixed(0) => Ok(None),
            LengthClass::Fixed(n) => Ok(Some(codec::get_bytes(src, n)?)),
            LengthClass::ByteLen => {
                let len = codec::get_u8(src)? as usize;
                if len == 0 {
                    Ok(None)
                } else {
                    Ok(Some(codec::get_bytes(src, len)?))
                }
            }
            LengthClass::LongLen => {
                let len = codec::get_u32(src, order)? as usize;
                if len == 0 {
                    Ok(None)
                } else {
                    Ok(Some(codec::get_bytes(src, len)?))
                }
            }
            LengthClass::TextPtr => {
                let ptr_len = codec::get_u8(src)? as usize;
                if ptr_len == 0 {
                    return Ok(None);
                }
                codec::skip(src, ptr_len)?; // text pointer
                codec::skip(src, 8)?; // timestamp
                let data_len = codec::get_u32(src, order)? as usize;
                Ok(Some(codec::get_bytes(src, data_len)?))
            }
        }
    }

    /// Encode as a ROW or PARAMS token against `format`.
    pub fn encode(
        &self,
        dst: &mut impl BufMut,
        session: &Session,
        format: &FormatDescriptor,
        token_type: TokenType,
    ) -> Result<(), ProtocolError> {
        if self.values.len() != format.columns.len() {
            return Err(ProtocolError::ColumnCountMismatch {
                expected: format.columns.len(),
                actual: self.values.len(),
            });
        }

        dst.put_u8(token_type as u8);
        for (col, value) in format.columns.iter().zip(&self.values) {
            Self::encode_value(dst, session, col, value.as_deref())?;
        }
        Ok(())
    }

    fn encode_value(
        dst: &mut impl BufMut,
        session: &Session,
        col: &FormatColumn,
        value: Option<&[u8]>,
    ) -> Result<(), ProtocolError> {
        let order = session.byte_order;
        match (col.wire_type.length_class(), value) {
            (LengthClass::Fixed(0), _) => {}
            (LengthClass::Fixed(n), Some(bytes)) => {
                if bytes.len() != n {
                    return Err(ProtocolError::LengthMismatch {
                        token: col.raw_type,
                        declared: n,
                        consumed: bytes.len(),
                    });
                }
                dst.put_slice(bytes);
            }
            (LengthClass::Fixed(n), None) => {
                // Fixed types cannot express NULL; the caller must use the
                // nullable variant type instead.
                return Err(ProtocolError::LengthMismatch {
                    token: col.raw_type,
                    declared: n,
                    consumed: 0,
                });
            }
            (LengthClass::ByteLen, None) => dst.put_u8(0),
            (LengthClass::ByteLen, Some(bytes)) => {
                if bytes.len() > 255 {
                    return Err(ProtocolError::ValueTooLong {
                        tag: col.raw_type,
                        max: 255,
                        actual: bytes.len(),
                    });
                }
                dst.put_u8(bytes.len() as u8);
                dst.put_slice(bytes);
            }
            (LengthClass::LongLen, None) => codec::put_u32(dst, order, 0),
            (LengthClass::LongLen, Some(bytes)) => {
                codec::put_u32(dst, order, bytes.len() as u32);
                dst.put_slice(bytes);
            }
            (LengthClass::TextPtr, None) => dst.put_u8(0),
            (LengthClass::TextPtr, Some(bytes)) => {
                dst.put_u8(16);
                dst.put_bytes(0, 16); // text pointer
                dst.put_bytes(0, 8); // timestamp
                codec::put_u32(dst, order, bytes.len() as u32);
                dst.put_slice(bytes);
            }
        }
        Ok(())
    }
}

// =============================================================================
// Skip rule for unrecognized tokens
// =============================================================================

/// How to derive the payload length of a token with no dedicated decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipRule {
    /// Fixed payload of this many bytes.
    Fixed(usize),
    /// Length prefix of this many bytes follows the tag.
    Prefixed(usize),
}

/// Derive the skip rule for a token tag from its bit pattern.
///
/// TDS 5.0 ranges token values so that a reader can skip tokens it does not
/// understand without desynchronizing. The two high bits select the family
/// and specific low bits refine it:
///
/// | pattern                  | payload length                               |
/// |--------------------------|----------------------------------------------|
/// | `0b000x_xxxx`            | none (zero-length marker)                    |
/// | `0b001x_xxxx`            | 4-byte length prefix (wide-format family)    |
/// | `0b01xx_0x00`            | 4-byte length prefix                         |
/// | `0b01xx_0x1x`            | 1-byte length prefix                         |
/// | `0b01xx_1xxx`            | fixed, width from bits 5-4: 0 / 1 / 2 / 4    |
/// | `0b10xx_xxxx`            | 2-byte length prefix                         |
/// | `0b1111_1xxx`            | fixed 8 (completion family)                  |
/// | `0b11x1_xxxx` (not done) | 8-byte length prefix (long carriers)         |
/// | other `0b11xx_xxxx`      | 2-byte length prefix                         |
///
/// The catalogue tokens that can reach this fallback agree with their real
/// encodings (LANGUAGE 0x21 and ROWFMT2 0x61 four-byte, MSG 0x65 one-byte,
/// RETURNSTATUS 0x79 fixed four, LOGINACK 0xAD and the 0xE* family
/// two-byte, DONE family fixed eight).
#[must_use]
pub fn skip_rule(tag: u8) -> SkipRule {
    match tag >> 6 {
        0b00 => {
            if tag & 0x20 == 0 {
                SkipRule::Fixed(0)
            } else {
                SkipRule::Prefixed(4)
            }
        }
        0b01 => {
            if tag & 0x08 != 0 {
                SkipRule::Fixed(match tag & 0x30 {
                    0x00 => 0,
                    0x10 => 1,
                    0x20 => 2,
                    _ => 4,
                })
            } else if tag & 0x04 != 0 {
                SkipRule::Prefixed(1)
            } else {
                SkipRule::Prefixed(4)
            }
        }
        0b10 => SkipRule::Prefixed(2),
        _ => {
            if tag >= 0xF8 {
                SkipRule::Fixed(8)
            } else if tag & 0x10 != 0 {
                SkipRule::Prefixed(8)
            } else {
                SkipRule::Prefixed(2)
            }
        }
    }
}

// =============================================================================
// Token reader
// =============================================================================

/// Reads tokens sequentially from an assembled response payload.
///
/// The current row and parameter format descriptors are owned by the dialog
/// session and passed in per call; the reader never caches them.
#[derive(Debug)]
pub struct TokenReader {
    buf: Bytes,
    session: Session,
}

impl TokenReader {
    /// Create a reader over a complete message payload.
    #[must_use]
    pub fn new(buf: Bytes, session: Session) -> Self {
        Self { buf, session }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Read the next token, or `None` at end of payload.
    pub fn next_token(
        &mut self,
        row_format: Option<&FormatDescriptor>,
        param_format: Option<&FormatDescriptor>,
    ) -> Result<Option<Token>, ProtocolError> {
        if !self.buf.has_remaining() {
            return Ok(None);
        }

        let tag = codec::get_u8(&mut self.buf)?;
        let session = self.session;
        let order = session.byte_order;

        let Some(token_type) = TokenType::from_u8(tag) else {
            return self.skip_unknown(tag).map(Some);
        };

        let token = match token_type {
            TokenType::Done => Token::Done(Done::decode(&mut self.buf, &session)?),
            TokenType::DoneProc => Token::DoneProc(Done::decode(&mut self.buf, &session)?),
            TokenType::DoneInProc => Token::DoneInProc(Done::decode(&mut self.buf, &session)?),
            TokenType::ReturnStatus => {
                Token::ReturnStatus(codec::get_i32(&mut self.buf, order)?)
            }
            TokenType::Row => {
                let format = row_format.ok_or(ProtocolError::MissingFormat(tag))?;
                Token::Row(RawRow::decode(&mut self.buf, &session, format)?)
            }
            TokenType::Params => {
                let format = param_format.ok_or(ProtocolError::MissingFormat(tag))?;
                Token::Params(RawRow::decode(&mut self.buf, &session, format)?)
            }
            TokenType::Capability => {
                Token::Capability(Capability::decode_body(&mut self.buf, order)?)
            }
            TokenType::LoginAck => {
                let mut body = self.read_len_body(2)?;
                Token::LoginAck(LoginAck::decode_body(&mut body, &session)?)
            }
            TokenType::Eed => {
                let mut body = self.read_len_body(2)?;
                Token::Eed(Eed::decode_body(&mut body, &session)?)
            }
            TokenType::EnvChange => {
                let body = self.read_len_body(2)?;
                Token::EnvChange(EnvChange::decode_body(body, &session)?)
            }
            TokenType::Msg => {
                let mut body = self.read_len_body(1)?;
                Token::Msg(Msg::decode_body(&mut body, &session)?)
            }
            TokenType::OptionCommand => {
                let mut body = self.read_len_body(2)?;
                Token::OptionCommand(OptionCommand::decode_body(&mut body, &session)?)
            }
            TokenType::Control => {
                let body = self.read_len_body(2)?;
                Token::Control(Control::decode_body(body, &session)?)
            }
            TokenType::RowFormat => {
                let body = self.read_len_body(2)?;
                Token::RowFormat(FormatDescriptor::decode_body(body, &session, false, false)?)
            }
            TokenType::RowFormat2 => {
                let body = self.read_len_body(4)?;
                Token::RowFormat(FormatDescriptor::decode_body(body, &session, true, false)?)
            }
            TokenType::ParamFormat => {
                let body = self.read_len_body(2)?;
                Token::ParamFormat(FormatDescriptor::decode_body(body, &session, false, true)?)
            }
            TokenType::ParamFormat2 => {
                let body = self.read_len_body(4)?;
                Token::ParamFormat(FormatDescriptor::decode_body(body, &session, true, true)?)
            }
            TokenType::Language => {
                let body = self.read_len_body(4)?;
                Token::Language(Language::decode_body(body, &session)?)
            }
            TokenType::DbRpc => {
                let mut body = self.read_len_body(2)?;
                Token::DbRpc(DbRpc::decode_body(&mut body, &session)?)
            }
        };

        Ok(Some(token))
    }

    /// Replace the session settings after an environment change.
    pub fn set_session(&mut self, session: Session) {
        self.session = session;
    }

    /// Read a length-delimited token body. Sub-fields the decoder does not
    /// interpret stay inside the returned buffer and are dropped with it,
    /// keeping the reader aligned for the next token.
    fn read_len_body(&mut self, len_width: usize) -> Result<Bytes, ProtocolError> {
        let order = self.session.byte_order;
        let len = match len_width {
            1 => codec::get_u8(&mut self.buf)? as usize,
            2 => codec::get_u16(&mut self.buf, order)? as usize,
            _ => codec::get_u32(&mut self.buf, order)? as usize,
        };
        codec::get_bytes(&mut self.buf, len)
    }

    fn skip_unknown(&mut self, tag: u8) -> Result<Token, ProtocolError> {
        let body = match skip_rule(tag) {
            SkipRule::Fixed(n) => codec::get_bytes(&mut self.buf, n)?,
            SkipRule::Prefixed(w) => self.read_len_body(w)?,
        };
        Ok(Token::Unknown { tag, body })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::codec::ByteOrder;

    fn session() -> Session {
        Session::default()
    }

    fn reader(bytes: BytesMut) -> TokenReader {
        TokenReader::new(bytes.freeze(), session())
    }

    #[test]
    fn done_roundtrip() {
        let done = Done {
            status: DoneStatus::MORE | DoneStatus::COUNT,
            transaction_state: 1,
            count: 42,
        };
        let mut buf = BytesMut::new();
        done.encode(&mut buf, &session(), TokenType::Done);

        let mut rdr = reader(buf);
        let token = rdr.next_token(None, None).unwrap().unwrap();
        match token {
            Token::Done(d) => {
                assert!(d.has_more());
                assert!(d.status.contains(DoneStatus::COUNT));
                assert_eq!(d.count, 42);
            }
            other => panic!("unexpected token: {other:?}"),
        }
        assert_eq!(rdr.remaining(), 0);
    }

    #[test]
    fn eed_roundtrip() {
        let eed = Eed {
            number: 2601,
            state: 2,
            class: 14,
            sql_state: Bytes::from_static(b"23000"),
            has_followup: false,
            transaction_state: 0,
            message: "Attempt to insert duplicate key row".into(),
            server: "ASE1".into(),
            procedure: String::new(),
            line: 1,
        };
        let mut buf = BytesMut::new();
        eed.encode(&mut buf, &session());

        let mut rdr = reader(buf);
        match rdr.next_token(None, None).unwrap().unwrap() {
            Token::Eed(decoded) => {
                assert_eq!(decoded.number, 2601);
                assert_eq!(decoded.class, 14);
                assert!(!decoded.is_informational());
                assert!(!decoded.is_connection_fatal());
                assert_eq!(decoded.message, eed.message);
                assert_eq!(&decoded.sql_state[..], b"23000");
            }
            other => panic!("unexpected token: {other:?}"),
        }
    }

    #[test]
    fn env_change_roundtrip() {
        let env = EnvChange {
            updates: vec![
                EnvUpdate {
                    kind: EnvKind::Database,
                    new_value: "pubs2".into(),
                    old_value: "master".into(),
                },
                EnvUpdate {
                    kind: EnvKind::PacketSize,
                    new_value: "2048".into(),
                    old_value: "512".into(),
                },
            ],
        };
        let mut buf = BytesMut::new();
        env.encode(&mut buf, &session());

        let mut rdr = reader(buf);
        match rdr.next_token(None, None).unwrap().unwrap() {
            Token::EnvChange(decoded) => {
                assert_eq!(decoded.updates.len(), 2);
                assert_eq!(decoded.updates[0].kind, EnvKind::Database);
                assert_eq!(decoded.updates[0].new_value, "pubs2");
                assert_eq!(decoded.updates[1].kind, EnvKind::PacketSize);
                assert_eq!(decoded.updates[1].new_value, "2048");
            }
            other => panic!("unexpected token: {other:?}"),
        }
    }

    #[test]
    fn login_ack_roundtrip() {
        let ack = LoginAck {
            status: LoginStatus::Succeeded,
            protocol_version: [5, 0, 0, 0],
            server_name: "Adaptive Server Enterprise".into(),
            server_version: [16, 0, 3, 0],
        };
        let mut buf = BytesMut::new();
        ack.encode(&mut buf, &session());

        let mut rdr = reader(buf);
        match rdr.next_token(None, None).unwrap().unwrap() {
            Token::LoginAck(decoded) => {
                assert_eq!(decoded.status, LoginStatus::Succeeded);
                assert_eq!(decoded.protocol_version, [5, 0, 0, 0]);
                assert_eq!(decoded.server_name, ack.server_name);
            }
            other => panic!("unexpected token: {other:?}"),
        }
    }

    #[test]
    fn row_decodes_one_value_per_column() {
        let format = FormatDescriptor::new(vec![
            FormatColumn::new("id", WireType::Int4),
            FormatColumn::new("name", WireType::VarChar).nullable().with_length(30),
        ]);

        let row = RawRow {
            values: vec![
                Some(Bytes::from_static(&[1, 0, 0, 0])),
                Some(Bytes::from_static(b"a")),
            ],
        };
        let mut buf = BytesMut::new();
        row.encode(&mut buf, &session(), &format, TokenType::Row).unwrap();

        let mut rdr = reader(buf);
        match rdr.next_token(Some(&format), None).unwrap().unwrap() {
            Token::Row(decoded) => {
                assert_eq!(decoded.values.len(), 2);
                assert_eq!(decoded.values[0].as_deref(), Some(&[1u8, 0, 0, 0][..]));
                assert_eq!(decoded.values[1].as_deref(), Some(&b"a"[..]));
            }
            other => panic!("unexpected token: {other:?}"),
        }
        assert_eq!(rdr.remaining(), 0);
    }

    #[test]
    fn row_without_format_is_a_framing_error() {
        let mut buf = BytesMut::new();
        buf.put_u8(TokenType::Row as u8);
        buf.put_slice(&[1, 0, 0, 0]);

        let mut rdr = reader(buf);
        let err = rdr.next_token(None, None).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingFormat(0xD1)));
    }

    #[test]
    fn row_value_count_must_match_format() {
        let format = FormatDescriptor::new(vec![FormatColumn::new("id", WireType::Int4)]);
        let row = RawRow {
            values: vec![
                Some(Bytes::from_static(&[1, 0, 0, 0])),
                Some(Bytes::from_static(&[2, 0, 0, 0])),
            ],
        };
        let mut buf = BytesMut::new();
        let err = row
            .encode(&mut buf, &session(), &format, TokenType::Row)
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ColumnCountMismatch {
                expected: 1,
                actual: 2
            }
        ));
    }

    #[test]
    fn bytelen_value_over_255_is_rejected() {
        let format = FormatDescriptor::new(vec![
            FormatColumn::new("v", WireType::VarChar).nullable().with_length(255),
        ]);
        let row = RawRow {
            values: vec![Some(Bytes::from(vec![b'x'; 280]))],
        };

        let mut buf = BytesMut::new();
        let err = row
            .encode(&mut buf, &session(), &format, TokenType::Params)
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ValueTooLong {
                max: 255,
                actual: 280,
                ..
            }
        ));
    }

    #[test]
    fn bytelen_format_length_over_255_is_rejected() {
        let format = FormatDescriptor::new(vec![
            FormatColumn::new("v", WireType::VarChar).nullable().with_length(280),
        ]);

        let mut buf = BytesMut::new();
        let err = format
            .encode(&mut buf, &session(), TokenType::ParamFormat)
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ValueTooLong {
                max: 255,
                actual: 280,
                ..
            }
        ));
    }

    #[test]
    fn truncated_row_is_a_framing_error() {
        let format = FormatDescriptor::new(vec![FormatColumn::new("id", WireType::Int4)]);
        let mut buf = BytesMut::new();
        buf.put_u8(TokenType::Row as u8);
        buf.put_slice(&[1, 0]); // two of four bytes

        let mut rdr = reader(buf);
        let err = rdr.next_token(Some(&format), None).unwrap_err();
        assert!(matches!(err, ProtocolError::TruncatedStream { .. }));
    }

    #[test]
    fn null_value_is_zero_length() {
        let format = FormatDescriptor::new(vec![
            FormatColumn::new("v", WireType::VarChar).nullable().with_length(10),
        ]);
        let row = RawRow { values: vec![None] };
        let mut buf = BytesMut::new();
        row.encode(&mut buf, &session(), &format, TokenType::Row).unwrap();

        // Tag plus a single zero length byte.
        assert_eq!(&buf[..], &[TokenType::Row as u8, 0x00]);

        let mut rdr = reader(buf);
        match rdr.next_token(Some(&format), None).unwrap().unwrap() {
            Token::Row(decoded) => assert!(decoded.values[0].is_none()),
            other => panic!("unexpected token: {other:?}"),
        }
    }

    #[test]
    fn text_value_roundtrips_through_textptr() {
        let format = FormatDescriptor::new(vec![
            FormatColumn::new("t", WireType::Text).nullable().with_length(0x7FFF_FFFF),
        ]);
        let row = RawRow {
            values: vec![Some(Bytes::from_static(b"hello, world"))],
        };
        let mut buf = BytesMut::new();
        row.encode(&mut buf, &session(), &format, TokenType::Row).unwrap();

        let mut rdr = reader(buf);
        match rdr.next_token(Some(&format), None).unwrap().unwrap() {
            Token::Row(decoded) => {
                assert_eq!(decoded.values[0].as_deref(), Some(&b"hello, world"[..]));
            }
            other => panic!("unexpected token: {other:?}"),
        }
        assert_eq!(rdr.remaining(), 0);
    }

    #[test]
    fn row_format_roundtrip_narrow_and_wide() {
        let format = FormatDescriptor::new(vec![
            FormatColumn::new("id", WireType::Int4),
            FormatColumn::new("price", WireType::Numeric)
                .nullable()
                .with_length(17)
                .with_precision_scale(18, 4),
            FormatColumn::new("blob", WireType::LongBinary).nullable().with_length(1024),
        ]);

        for token_type in [TokenType::RowFormat, TokenType::RowFormat2] {
            let mut buf = BytesMut::new();
            format.encode(&mut buf, &session(), token_type).unwrap();

            let mut rdr = reader(buf);
            match rdr.next_token(None, None).unwrap().unwrap() {
                Token::RowFormat(decoded) => {
                    assert_eq!(decoded.column_count(), 3);
                    assert_eq!(decoded.columns[0].wire_type, WireType::Int4);
                    assert_eq!(decoded.columns[1].precision, Some(18));
                    assert_eq!(decoded.columns[1].scale, Some(4));
                    assert!(decoded.columns[1].null_allowed());
                    assert_eq!(decoded.columns[2].length, Some(1024));
                    assert_eq!(decoded.column_index("price"), Some(1));
                }
                other => panic!("unexpected token: {other:?}"),
            }
            assert_eq!(rdr.remaining(), 0);
        }
    }

    #[test]
    fn param_format_applies_int_numeric_fallback() {
        // Hand-build a PARAMFMT with the combined Integer|Numeric code.
        // The resolved FLT8 is fixed width, so no length byte follows the
        // type tag.
        let s = session();
        let mut body = BytesMut::new();
        codec::put_u16(&mut body, ByteOrder::LittleEndian, 1);
        codec::write_b_string(&mut body, &s, "@out");
        body.put_u8(ParamStatus::RETURN_VALUE.bits());
        codec::put_i32(&mut body, ByteOrder::LittleEndian, 0);
        body.put_u8(PARAM_INT_NUMERIC);
        codec::write_b_string(&mut body, &s, "");

        let mut buf = BytesMut::new();
        buf.put_u8(TokenType::ParamFormat as u8);
        codec::put_u16(&mut buf, ByteOrder::LittleEndian, body.len() as u16);
        buf.put_slice(&body);

        let mut rdr = reader(buf);
        match rdr.next_token(None, None).unwrap().unwrap() {
            Token::ParamFormat(decoded) => {
                assert_eq!(decoded.columns[0].wire_type, WireType::Flt8);
                assert_eq!(decoded.columns[0].raw_type, PARAM_INT_NUMERIC);
            }
            other => panic!("unexpected token: {other:?}"),
        }
    }

    #[test]
    fn row_format_rejects_unknown_type() {
        let s = session();
        let mut body = BytesMut::new();
        codec::put_u16(&mut body, ByteOrder::LittleEndian, 1);
        codec::write_b_string(&mut body, &s, "c");
        body.put_u8(0);
        codec::put_i32(&mut body, ByteOrder::LittleEndian, 0);
        body.put_u8(PARAM_INT_NUMERIC); // fallback applies to params only

        let mut buf = BytesMut::new();
        buf.put_u8(TokenType::RowFormat as u8);
        codec::put_u16(&mut buf, ByteOrder::LittleEndian, (body.len() + 2) as u16);
        buf.put_slice(&body);
        buf.put_slice(&[0, 0]); // would-be locale

        let mut rdr = reader(buf);
        let err = rdr.next_token(None, None).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidTypeTag(t) if t == PARAM_INT_NUMERIC));
    }

    #[test]
    fn language_roundtrip() {
        let lang = Language {
            has_params: false,
            text: "select 1".into(),
        };
        let mut buf = BytesMut::new();
        lang.encode(&mut buf, &session());

        let mut rdr = reader(buf);
        match rdr.next_token(None, None).unwrap().unwrap() {
            Token::Language(decoded) => {
                assert!(!decoded.has_params);
                assert_eq!(decoded.text, "select 1");
            }
            other => panic!("unexpected token: {other:?}"),
        }
    }

    #[test]
    fn dbrpc_roundtrip() {
        let rpc = DbRpc {
            name: "sp_who".into(),
            options: DbRpcOptions::HAS_PARAMS,
        };
        let mut buf = BytesMut::new();
        rpc.encode(&mut buf, &session());

        let mut rdr = reader(buf);
        match rdr.next_token(None, None).unwrap().unwrap() {
            Token::DbRpc(decoded) => {
                assert_eq!(decoded.name, "sp_who");
                assert!(decoded.options.contains(DbRpcOptions::HAS_PARAMS));
            }
            other => panic!("unexpected token: {other:?}"),
        }
    }

    #[test]
    fn option_command_roundtrip() {
        let cmd = OptionCommand::set_text_size(65536, &session());
        let mut buf = BytesMut::new();
        cmd.encode(&mut buf, &session());

        let mut rdr = reader(buf);
        match rdr.next_token(None, None).unwrap().unwrap() {
            Token::OptionCommand(decoded) => {
                assert_eq!(decoded.command, OptionCmd::Set);
                assert_eq!(decoded.option, OPT_TEXTSIZE);
                assert_eq!(&decoded.argument[..], &65536u32.to_le_bytes());
            }
            other => panic!("unexpected token: {other:?}"),
        }
    }

    // One test per skip rule at a boundary tag value.

    #[test]
    fn skip_rule_zero_length_markers() {
        assert_eq!(skip_rule(0x00), SkipRule::Fixed(0));
        assert_eq!(skip_rule(0x1F), SkipRule::Fixed(0));
    }

    #[test]
    fn skip_rule_wide_format_family() {
        assert_eq!(skip_rule(0x20), SkipRule::Prefixed(4));
        assert_eq!(skip_rule(0x3F), SkipRule::Prefixed(4));
        // LANGUAGE 0x21 really carries a 4-byte length.
        assert_eq!(skip_rule(TokenType::Language as u8), SkipRule::Prefixed(4));
    }

    #[test]
    fn skip_rule_mid_range_prefixes() {
        // ROWFMT2 0x61: 4-byte length.
        assert_eq!(skip_rule(0x61), SkipRule::Prefixed(4));
        // MSG 0x65: 1-byte length.
        assert_eq!(skip_rule(0x65), SkipRule::Prefixed(1));
    }

    #[test]
    fn skip_rule_mid_range_fixed_widths() {
        assert_eq!(skip_rule(0x48), SkipRule::Fixed(0));
        assert_eq!(skip_rule(0x58), SkipRule::Fixed(1));
        assert_eq!(skip_rule(0x68), SkipRule::Fixed(2));
        // RETURNSTATUS 0x79 is a fixed 4-byte value.
        assert_eq!(skip_rule(0x79), SkipRule::Fixed(4));
    }

    #[test]
    fn skip_rule_classic_two_byte_family() {
        assert_eq!(skip_rule(0x80), SkipRule::Prefixed(2));
        // LOGINACK 0xAD and OPTIONCMD 0xA6 carry 2-byte lengths.
        assert_eq!(skip_rule(0xAD), SkipRule::Prefixed(2));
        assert_eq!(skip_rule(0xBF), SkipRule::Prefixed(2));
    }

    #[test]
    fn skip_rule_high_family() {
        // EED 0xE5 and CAPABILITY 0xE2 carry 2-byte lengths.
        assert_eq!(skip_rule(0xE5), SkipRule::Prefixed(2));
        assert_eq!(skip_rule(0xC0), SkipRule::Prefixed(2));
        // Long carriers get an 8-byte length prefix.
        assert_eq!(skip_rule(0xD0), SkipRule::Prefixed(8));
        assert_eq!(skip_rule(0xF0), SkipRule::Prefixed(8));
        // Completion family is fixed eight bytes.
        assert_eq!(skip_rule(0xF8), SkipRule::Fixed(8));
        assert_eq!(skip_rule(0xFD), SkipRule::Fixed(8));
    }

    #[test]
    fn unknown_token_is_skipped_and_stream_stays_aligned() {
        let mut buf = BytesMut::new();
        // Unknown tag 0xA0 (2-byte length) with a 3-byte body.
        buf.put_u8(0xA0);
        buf.put_u16_le(3);
        buf.put_slice(&[1, 2, 3]);
        // Followed by a DONE token that must still decode.
        Done {
            status: DoneStatus::empty(),
            transaction_state: 0,
            count: 0,
        }
        .encode(&mut buf, &session(), TokenType::Done);

        let mut rdr = reader(buf);
        match rdr.next_token(None, None).unwrap().unwrap() {
            Token::Unknown { tag, body } => {
                assert_eq!(tag, 0xA0);
                assert_eq!(&body[..], &[1, 2, 3]);
            }
            other => panic!("unexpected token: {other:?}"),
        }
        assert!(matches!(
            rdr.next_token(None, None).unwrap().unwrap(),
            Token::Done(_)
        ));
        assert_eq!(rdr.remaining(), 0);
    }
}
