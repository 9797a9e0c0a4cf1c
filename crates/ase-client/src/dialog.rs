//! The TDS 5.0 dialog state machine.
//!
//! A dialog owns one connection and drives it through login, requests and
//! responses. TDS 5.0 is strictly half duplex: after sending a request the
//! client reads tokens until a completion without the MORE flag, applying
//! environment changes as they stream past. Format descriptors announced by
//! the server govern every following ROW/PARAMS token, so the dialog keeps
//! the current row and parameter formats between messages of one response.

use std::sync::Arc;

use ase_codec::{AttentionHandle, Connection};
use ase_types::{decode_value, encode_value, format_column_for, AseValue};
use bytes::BytesMut;
use tds5_protocol::codec::Session;
use tds5_protocol::packet::BufferType;
use tds5_protocol::token::{
    DbRpc, DbRpcOptions, DoneStatus, Eed, EnvChange, EnvKind, FormatDescriptor, Language,
    LoginStatus, OptionCommand, RawRow, Token, TokenReader, TokenType,
};
use tds5_protocol::{Capability, LoginRecord, MAX_PACKET_SIZE, PACKET_HEADER_SIZE};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::{ConnectionConfig, TimeoutConfig};
use crate::error::{Error, Result};
use crate::result::{CommandResult, ResultSet, ServerMessage};
use crate::row::{Column, Row};

/// An authenticated TDS 5.0 dialog over a transport.
pub struct Dialog<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    conn: Connection<T>,
    session: Session,
    /// Capability set the server granted at login.
    capability: Capability,
    server_name: String,
    server_version: [u8; 4],
    database: String,
    language: String,
    charset_name: String,
    packet_size: usize,
    named_parameters: bool,
    honor_server_packet_size: bool,
    timeouts: TimeoutConfig,
    usable: bool,
}

impl Dialog<TcpStream> {
    /// Connect to the configured server and log in.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let address = config.address();
        tracing::debug!(address = %address, "connecting");

        let stream = tokio::time::timeout(
            config.timeouts.connect_timeout,
            TcpStream::connect(&address),
        )
        .await
        .map_err(|_| Error::ConnectionTimeout)?
        .map_err(|e| Error::Connection(format!("failed to connect to {address}: {e}")))?;
        stream.set_nodelay(true).map_err(Error::Io)?;

        Self::login(stream, config).await
    }
}

impl<T> Dialog<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Log in over an established transport.
    ///
    /// Sends the login record with the client capability token appended,
    /// then reads the acknowledgment, the server capability set and any
    /// environment changes. A NEGOTIATE acknowledgment (encrypted login)
    /// is reported as an error rather than answered.
    pub async fn login(transport: T, config: &ConnectionConfig) -> Result<Self> {
        let charset = Session::charset_for_name(&config.charset)
            .ok_or_else(|| Error::Config(format!("unknown charset: {}", config.charset)))?;
        let session = Session {
            byte_order: config.byte_order,
            charset,
        };

        let mut conn = Connection::new(transport);
        conn.set_session(session);

        let record = LoginRecord {
            hostname: config.client_host.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            host_process: std::process::id().to_string(),
            app_name: config.app_name.clone(),
            server_name: config.server_name.clone(),
            language: config.language.clone(),
            charset: config.charset.clone(),
            packet_size: config.packet_size,
            byte_order: config.byte_order,
            capability: Capability::client_default(),
        };
        let mut payload = BytesMut::new();
        record.encode(&mut payload, &session)?;

        let mut dialog = Self {
            conn,
            session,
            capability: Capability::default(),
            server_name: String::new(),
            server_version: [0; 4],
            database: String::new(),
            language: config.language.clone(),
            charset_name: config.charset.clone(),
            packet_size: usize::from(config.packet_size),
            named_parameters: config.named_parameters,
            honor_server_packet_size: config.server_packet_size,
            timeouts: config.timeouts.clone(),
            usable: false,
        };

        dialog
            .conn
            .send_message(BufferType::Login, payload.freeze(), dialog.packet_size)
            .await?;
        dialog.conn.flush().await?;

        tokio::time::timeout(dialog.timeouts.login_timeout, dialog.read_login_response())
            .await
            .map_err(|_| Error::ConnectionTimeout)??;
        dialog.conn.end_request();

        tracing::debug!(
            server = %dialog.server_name,
            version = ?dialog.server_version,
            packet_size = dialog.packet_size,
            "login complete"
        );

        if !config.database.is_empty() && dialog.database != config.database {
            dialog
                .execute(&format!("use {}", config.database))
                .await
                .map_err(|e| Error::Login(format!("cannot use database: {e}")))?;
        }
        if let Some(size) = config.text_size {
            dialog.set_text_size(size).await?;
        }

        Ok(dialog)
    }

    async fn read_login_response(&mut self) -> Result<()> {
        let mut status = None;
        let mut failure: Option<Eed> = None;

        'outer: loop {
            let Some(message) = self.conn.read_message().await? else {
                return Err(Error::ConnectionClosed);
            };
            let mut reader = TokenReader::new(message.payload, self.session);

            while let Some(token) = reader.next_token(None, None)? {
                match token {
                    Token::LoginAck(ack) => {
                        self.server_name = ack.server_name;
                        self.server_version = ack.server_version;
                        status = Some(ack.status);
                    }
                    Token::Capability(cap) => {
                        self.capability = cap;
                    }
                    Token::EnvChange(env) => {
                        self.apply_env(&env);
                        reader.set_session(self.session);
                    }
                    Token::Eed(eed) => {
                        if eed.is_informational() {
                            tracing::debug!(number = eed.number, message = %eed.message, "server message");
                        } else if failure.is_none() {
                            failure = Some(eed);
                        }
                    }
                    Token::Done(done) | Token::DoneProc(done) | Token::DoneInProc(done) => {
                        if !done.has_more() {
                            break 'outer;
                        }
                    }
                    other => {
                        tracing::trace!(token = ?other, "ignoring token during login");
                    }
                }
            }
        }

        match status {
            Some(LoginStatus::Succeeded) => {
                self.usable = true;
                Ok(())
            }
            Some(LoginStatus::Negotiate) => Err(Error::Login(
                "server requires login negotiation, which is not supported".to_string(),
            )),
            Some(LoginStatus::Failed) => Err(Error::Login(
                failure.map_or_else(|| "login rejected".to_string(), |eed| eed.message),
            )),
            None => Err(match failure {
                Some(eed) => server_error(&eed),
                None => Error::Login("no login acknowledgment received".to_string()),
            }),
        }
    }

    /// Execute a SQL batch without parameters.
    pub async fn execute(&mut self, sql: &str) -> Result<CommandResult> {
        self.execute_with_params(sql, &[]).await
    }

    /// Execute a SQL batch with positional parameters.
    ///
    /// Parameters travel as a PARAMFMT/PARAMS pair following the LANGUAGE
    /// token and are referenced as `@p1`, `@p2`, ... in the SQL text.
    pub async fn execute_with_params(
        &mut self,
        sql: &str,
        params: &[AseValue],
    ) -> Result<CommandResult> {
        self.ensure_usable()?;
        tracing::debug!(sql = %sql, params = params.len(), "executing language request");

        let mut payload = BytesMut::new();
        Language {
            has_params: !params.is_empty(),
            text: sql.to_string(),
        }
        .encode(&mut payload, &self.session);
        if !params.is_empty() {
            self.encode_params(&mut payload, params)?;
        }

        self.send_request(payload).await?;
        self.read_response().await
    }

    /// Call a stored procedure by name.
    ///
    /// The result carries the return status and any output parameter
    /// values alongside the procedure's result sets.
    pub async fn call_procedure(
        &mut self,
        name: &str,
        params: &[AseValue],
    ) -> Result<CommandResult> {
        self.ensure_usable()?;
        tracing::debug!(procedure = %name, params = params.len(), "executing rpc request");

        let options = if params.is_empty() {
            DbRpcOptions::empty()
        } else {
            DbRpcOptions::HAS_PARAMS
        };
        let mut payload = BytesMut::new();
        DbRpc {
            name: name.to_string(),
            options,
        }
        .encode(&mut payload, &self.session);
        if !params.is_empty() {
            self.encode_params(&mut payload, params)?;
        }

        self.send_request(payload).await?;
        self.read_response().await
    }

    /// Set the session text/image size limit.
    pub async fn set_text_size(&mut self, size: u32) -> Result<CommandResult> {
        self.ensure_usable()?;

        let mut payload = BytesMut::new();
        OptionCommand::set_text_size(size, &self.session).encode(&mut payload, &self.session);

        self.send_request(payload).await?;
        self.read_response().await
    }

    fn encode_params(&self, dst: &mut BytesMut, params: &[AseValue]) -> Result<()> {
        let columns = params
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let name = if self.named_parameters {
                    format!("@p{}", i + 1)
                } else {
                    String::new()
                };
                format_column_for(&name, value, &self.session)
            })
            .collect();
        let format = FormatDescriptor::new(columns);
        format.encode(dst, &self.session, TokenType::ParamFormat)?;

        let values = params
            .iter()
            .map(|value| encode_value(value, &self.session))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        RawRow { values }.encode(dst, &self.session, &format, TokenType::Params)?;
        Ok(())
    }

    async fn send_request(&mut self, payload: BytesMut) -> Result<()> {
        self.conn
            .send_message(BufferType::Normal, payload.freeze(), self.packet_size)
            .await?;
        self.conn.flush().await?;
        Ok(())
    }

    /// Read a complete response, enforcing the command timeout.
    ///
    /// On timeout an attention buffer is sent and the response is drained
    /// before reporting [`Error::CommandTimeout`], leaving the dialog
    /// usable for the next request.
    async fn read_response(&mut self) -> Result<CommandResult> {
        let result = match self.timeouts.command_timeout {
            Some(limit) => {
                let attention = self.conn.attention_handle();
                match tokio::time::timeout(limit, self.collect_response()).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!("command timed out, cancelling");
                        attention.cancel().await?;
                        while self.conn.read_message().await?.is_some() {}
                        Err(Error::CommandTimeout)
                    }
                }
            }
            None => self.collect_response().await,
        };

        // The response is consumed either way; a cancel arriving now must
        // not drain the next request's response.
        self.conn.end_request();

        if let Err(ref e) = result {
            if e.is_fatal() {
                self.usable = false;
            }
        }
        result
    }

    async fn collect_response(&mut self) -> Result<CommandResult> {
        let mut result = CommandResult::new();
        let mut row_format: Option<FormatDescriptor> = None;
        let mut param_format: Option<FormatDescriptor> = None;
        let mut columns: Option<Arc<Vec<Column>>> = None;
        let mut first_error: Option<Eed> = None;
        let mut saw_error_status = false;

        'outer: loop {
            let was_cancelling = self.conn.is_cancelling();
            let Some(message) = self.conn.read_message().await? else {
                if was_cancelling {
                    return Err(Error::Cancelled);
                }
                return Err(Error::ConnectionClosed);
            };
            let mut reader = TokenReader::new(message.payload, self.session);

            while let Some(token) = reader.next_token(row_format.as_ref(), param_format.as_ref())? {
                match token {
                    Token::RowFormat(fmt) => {
                        let cols: Vec<Column> = fmt
                            .columns
                            .iter()
                            .enumerate()
                            .map(|(i, c)| Column::from_format(c, i))
                            .collect();
                        let cols = Arc::new(cols);
                        result.result_sets.push(ResultSet::new(Arc::clone(&cols)));
                        columns = Some(cols);
                        row_format = Some(fmt);
                    }
                    Token::Row(raw) => {
                        if let (Some(fmt), Some(cols)) = (row_format.as_ref(), columns.as_ref()) {
                            let mut values = Vec::with_capacity(fmt.columns.len());
                            for (col, raw_value) in fmt.columns.iter().zip(&raw.values) {
                                values.push(decode_value(col, raw_value.as_ref(), &self.session)?);
                            }
                            if let Some(rs) = result.result_sets.last_mut() {
                                rs.rows.push(Row::new(Arc::clone(cols), values));
                            }
                        }
                    }
                    Token::ParamFormat(fmt) => param_format = Some(fmt),
                    Token::Params(raw) => {
                        if let Some(fmt) = param_format.as_ref() {
                            for (col, raw_value) in fmt.columns.iter().zip(&raw.values) {
                                result
                                    .output_params
                                    .push(decode_value(col, raw_value.as_ref(), &self.session)?);
                            }
                        }
                    }
                    Token::ReturnStatus(status) => result.return_status = Some(status),
                    Token::Eed(eed) => {
                        if eed.is_informational() {
                            tracing::debug!(number = eed.number, message = %eed.message, "server message");
                        } else {
                            if eed.is_connection_fatal() {
                                self.usable = false;
                            }
                            if first_error.is_none() {
                                first_error = Some(eed.clone());
                            }
                        }
                        result.messages.push(ServerMessage::from_eed(&eed));
                    }
                    Token::EnvChange(env) => {
                        self.apply_env(&env);
                        reader.set_session(self.session);
                    }
                    Token::Done(done) | Token::DoneProc(done) | Token::DoneInProc(done) => {
                        if done.status.contains(DoneStatus::COUNT) {
                            result.rows_affected += u64::from(done.count);
                        }
                        if done.status.contains(DoneStatus::ERROR) {
                            saw_error_status = true;
                        }
                        if done.is_attention_ack() {
                            return Err(Error::Cancelled);
                        }
                        if !done.has_more() {
                            break 'outer;
                        }
                    }
                    Token::Capability(cap) => self.capability = cap,
                    other => {
                        tracing::trace!(token = ?other, "ignoring response token");
                    }
                }
            }
        }

        if let Some(eed) = first_error {
            return Err(server_error(&eed));
        }
        if saw_error_status {
            return Err(Error::Query(
                "request completed with error status".to_string(),
            ));
        }
        Ok(result)
    }

    /// Apply environment changes announced by the server.
    fn apply_env(&mut self, env: &EnvChange) {
        for update in &env.updates {
            match update.kind {
                EnvKind::Database => {
                    tracing::debug!(from = %update.old_value, to = %update.new_value, "database changed");
                    self.database = update.new_value.clone();
                }
                EnvKind::Language => {
                    self.language = update.new_value.clone();
                }
                EnvKind::Charset => {
                    match Session::charset_for_name(&update.new_value) {
                        Some(charset) => {
                            tracing::debug!(charset = %update.new_value, "charset changed");
                            self.session.charset = charset;
                            self.charset_name = update.new_value.clone();
                            self.conn.set_session(self.session);
                        }
                        None => {
                            tracing::warn!(
                                charset = %update.new_value,
                                "server announced unknown charset, keeping current"
                            );
                        }
                    }
                }
                EnvKind::PacketSize => {
                    if !self.honor_server_packet_size {
                        tracing::trace!(
                            size = %update.new_value,
                            "server packet size change disabled by configuration"
                        );
                        continue;
                    }
                    if let Ok(size) = update.new_value.parse::<usize>() {
                        if size > PACKET_HEADER_SIZE && size <= MAX_PACKET_SIZE {
                            tracing::debug!(size, "packet size changed");
                            self.packet_size = size;
                            self.conn.read_codec_mut().set_max_packet_size(size);
                        }
                    }
                }
                EnvKind::Other(kind) => {
                    tracing::trace!(kind, "ignoring environment change");
                }
            }
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.usable {
            Ok(())
        } else {
            Err(Error::Connection("connection is not usable".to_string()))
        }
    }

    /// Get a handle for cancelling the current request from another task.
    #[must_use]
    pub fn attention_handle(&self) -> AttentionHandle<T> {
        self.conn.attention_handle()
    }

    /// Whether the dialog can accept further requests.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.usable
    }

    /// Server product name from the login acknowledgment.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Server product version from the login acknowledgment.
    #[must_use]
    pub fn server_version(&self) -> [u8; 4] {
        self.server_version
    }

    /// Capability set the server granted at login.
    #[must_use]
    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// Current database.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Current session language.
    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Current session charset name.
    #[must_use]
    pub fn charset(&self) -> &str {
        &self.charset_name
    }

    /// Negotiated packet size.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Wire session settings (byte order and charset).
    #[must_use]
    pub fn session(&self) -> Session {
        self.session
    }
}

impl<T> std::fmt::Debug for Dialog<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialog")
            .field("server_name", &self.server_name)
            .field("database", &self.database)
            .field("packet_size", &self.packet_size)
            .field("usable", &self.usable)
            .finish_non_exhaustive()
    }
}

fn server_error(eed: &Eed) -> Error {
    Error::Server {
        number: eed.number,
        class: eed.class,
        state: eed.state,
        message: eed.message.clone(),
        server: (!eed.server.is_empty()).then(|| eed.server.clone()),
        procedure: (!eed.procedure.is_empty()).then(|| eed.procedure.clone()),
        line: u32::from(eed.line),
    }
}
