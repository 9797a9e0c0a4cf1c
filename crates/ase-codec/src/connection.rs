//! Split I/O connection with message reassembly and cancellation.
//!
//! The transport is split into separate read and write halves so an
//! attention (cancel) buffer can be sent while blocked on reading a large
//! result set. The read side reassembles packets into complete messages:
//! a logical TDS message spans packets until one carries the
//! `END_OF_MESSAGE` status flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tds5_protocol::codec::Session;
use tds5_protocol::packet::{
    BufferStatus, BufferType, PacketHeader, PACKET_HEADER_SIZE,
};
use tds5_protocol::token::{Token, TokenReader};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, Notify};

use crate::error::CodecError;
use crate::framed::{PacketReader, PacketWriter};
use crate::packet_codec::{Packet, Tds5Codec};

/// How long to wait for the server's attention acknowledgment while
/// draining a cancelled response.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A complete TDS message reassembled from one or more packets.
#[derive(Debug, Clone)]
pub struct Message {
    /// The buffer type of this message.
    pub buffer_type: BufferType,
    /// The complete message payload (all packets combined).
    pub payload: Bytes,
}

impl Message {
    /// Get the message payload length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the message is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// A TDS 5.0 connection with split I/O for cancellation safety.
///
/// # Cancellation
///
/// ASE cancels a running request when it receives a buffer of type 0x06
/// (attention). Without split I/O the driver would be unable to send one
/// while awaiting a read. After sending, the read side drains response
/// messages until a DONE-family token carrying the ATTN status flag
/// arrives. An attention requested while no request is in flight is a
/// no-op: the server would never acknowledge it.
///
/// # Example
///
/// ```rust,ignore
/// use ase_codec::Connection;
/// use tokio::net::TcpStream;
///
/// let stream = TcpStream::connect("localhost:5000").await?;
/// let conn = Connection::new(stream);
///
/// // Can cancel from another task while reading
/// let attention = conn.attention_handle();
/// tokio::spawn(async move {
///     attention.cancel().await?;
/// });
/// ```
pub struct Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Read half wrapped in a packet reader.
    reader: PacketReader<ReadHalf<T>>,
    /// Write half protected by mutex for concurrent cancel access.
    writer: Arc<Mutex<PacketWriter<WriteHalf<T>>>>,
    /// Payload of the message being reassembled.
    partial: BytesMut,
    /// Buffer type of the message being reassembled.
    partial_type: Option<BufferType>,
    /// Wire session settings, needed to parse the token stream while
    /// draining a cancelled response.
    session: Session,
    /// Bound on waiting for the attention acknowledgment.
    drain_timeout: Duration,
    /// Notification for cancellation completion.
    cancel_notify: Arc<Notify>,
    /// Flag indicating cancellation is in progress.
    cancelling: Arc<AtomicBool>,
    /// Flag indicating a request awaits its response.
    in_flight: Arc<AtomicBool>,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Create a new connection from a transport.
    ///
    /// The transport is immediately split into read and write halves.
    pub fn new(transport: T) -> Self {
        Self::with_codecs(transport, Tds5Codec::new(), Tds5Codec::new())
    }

    /// Create a new connection with custom codecs.
    pub fn with_codecs(transport: T, read_codec: Tds5Codec, write_codec: Tds5Codec) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);

        Self {
            reader: PacketReader::with_codec(read_half, read_codec),
            writer: Arc::new(Mutex::new(PacketWriter::with_codec(
                write_half,
                write_codec,
            ))),
            partial: BytesMut::new(),
            partial_type: None,
            session: Session::default(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            cancel_notify: Arc::new(Notify::new()),
            cancelling: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set the wire session (byte order and charset) negotiated for token
    /// contents.
    pub fn set_session(&mut self, session: Session) {
        self.session = session;
    }

    /// Set the bound on waiting for an attention acknowledgment.
    pub fn set_drain_timeout(&mut self, timeout: Duration) {
        self.drain_timeout = timeout;
    }

    /// Get a handle for cancelling requests on this connection.
    ///
    /// The handle can be cloned and sent to other tasks.
    #[must_use]
    pub fn attention_handle(&self) -> AttentionHandle<T> {
        AttentionHandle {
            writer: Arc::clone(&self.writer),
            notify: Arc::clone(&self.cancel_notify),
            cancelling: Arc::clone(&self.cancelling),
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Check if a cancellation is currently in progress.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.cancelling.load(Ordering::Acquire)
    }

    /// Mark the current request's response as fully consumed.
    ///
    /// Clears the request-in-flight flag so a later attention is a no-op,
    /// and abandons any cancellation still pending against the completed
    /// response.
    pub fn end_request(&self) {
        self.in_flight.store(false, Ordering::Release);
        if self.cancelling.swap(false, Ordering::AcqRel) {
            self.cancel_notify.notify_waiters();
        }
    }

    /// Read the next complete message from the connection.
    ///
    /// Multi-packet messages are reassembled automatically. When a
    /// cancellation is pending, the in-flight response is drained up to the
    /// attention acknowledgment instead and `None` is returned.
    pub async fn read_message(&mut self) -> Result<Option<Message>, CodecError> {
        if self.is_cancelling() {
            return self.drain_after_cancel().await;
        }
        self.next_message().await
    }

    async fn next_message(&mut self) -> Result<Option<Message>, CodecError> {
        loop {
            match self.reader.next().await {
                Some(Ok(packet)) => {
                    if let Some(message) = self.push_packet(packet)? {
                        return Ok(Some(message));
                    }
                    // Continue reading packets until message complete
                }
                Some(Err(e)) => return Err(e),
                None => {
                    // Connection closed
                    if self.partial_type.is_some() {
                        return Err(CodecError::ConnectionClosed);
                    }
                    return Ok(None);
                }
            }
        }
    }

    /// Fold one packet into the message under assembly.
    ///
    /// All packets of one message must carry the same buffer type; a switch
    /// mid-message means the stream is no longer framing-aligned.
    fn push_packet(&mut self, packet: Packet) -> Result<Option<Message>, CodecError> {
        let buffer_type = packet.header.buffer_type;
        match self.partial_type {
            None => self.partial_type = Some(buffer_type),
            Some(started) if started != buffer_type => {
                return Err(CodecError::BufferTypeChanged {
                    started,
                    got: buffer_type,
                });
            }
            Some(_) => {}
        }
        self.partial.extend_from_slice(&packet.payload);

        if packet.header.status.contains(BufferStatus::END_OF_MESSAGE) {
            let message = Message {
                buffer_type: self.partial_type.take().unwrap_or(buffer_type),
                payload: self.partial.split().freeze(),
            };
            tracing::trace!(
                buffer_type = ?message.buffer_type,
                len = message.len(),
                "message assembled"
            );
            Ok(Some(message))
        } else {
            Ok(None)
        }
    }

    /// Send a complete message, splitting into multiple packets if needed.
    ///
    /// Packet numbers restart at zero for every message.
    pub async fn send_message(
        &mut self,
        buffer_type: BufferType,
        payload: Bytes,
        max_packet_size: usize,
    ) -> Result<(), CodecError> {
        if buffer_type != BufferType::Cancel {
            self.in_flight.store(true, Ordering::Release);
        }

        let max_payload = max_packet_size - PACKET_HEADER_SIZE;
        let chunks: Vec<_> = if payload.is_empty() {
            vec![&payload[..]]
        } else {
            payload.chunks(max_payload).collect()
        };
        let total_chunks = chunks.len();

        let mut writer = self.writer.lock().await;
        writer.codec_mut().reset_packet_number();

        for (i, chunk) in chunks.into_iter().enumerate() {
            let is_last = i == total_chunks - 1;

            let status = if is_last {
                BufferStatus::END_OF_MESSAGE
            } else {
                BufferStatus::NORMAL
            };

            let header = PacketHeader::new(buffer_type, status, 0);
            let packet = Packet::new(header, BytesMut::from(chunk));

            writer.send(packet).await?;
        }

        Ok(())
    }

    /// Flush the write buffer.
    pub async fn flush(&mut self) -> Result<(), CodecError> {
        let mut writer = self.writer.lock().await;
        writer.flush().await
    }

    /// Drain response messages after cancellation until the attention
    /// acknowledgment is received.
    ///
    /// The wait is bounded: the acknowledgment never comes when the
    /// attention raced a response that had already completed, and an
    /// unbounded drain would swallow the next request's response.
    async fn drain_after_cancel(&mut self) -> Result<Option<Message>, CodecError> {
        tracing::debug!("draining response after cancellation");

        // Abandon any partially assembled message.
        self.partial.clear();
        self.partial_type = None;

        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        loop {
            let message = match tokio::time::timeout_at(deadline, self.next_message()).await {
                Ok(Ok(Some(message))) => message,
                Ok(Ok(None)) => {
                    self.finish_cancel();
                    return Ok(None);
                }
                Ok(Err(e)) => {
                    self.finish_cancel();
                    return Err(e);
                }
                Err(_) => {
                    tracing::warn!(
                        timeout = ?self.drain_timeout,
                        "no attention acknowledgment before the drain deadline"
                    );
                    self.finish_cancel();
                    return Ok(None);
                }
            };

            match self.acknowledges_attention(&message) {
                Ok(true) => {
                    tracing::debug!("attention acknowledged, cancellation complete");
                    self.finish_cancel();
                    return Ok(None);
                }
                Ok(false) => {}
                Err(e) => {
                    self.finish_cancel();
                    return Err(e);
                }
            }
        }
    }

    fn finish_cancel(&self) {
        self.cancelling.store(false, Ordering::Release);
        self.in_flight.store(false, Ordering::Release);
        self.cancel_notify.notify_waiters();
    }

    /// Check whether a drained message ends in a DONE-family token carrying
    /// the ATTN status flag.
    ///
    /// The message is parsed with the token reader rather than scanned for
    /// DONE-like bytes: row data may contain 0xFD-0xFF values that would
    /// otherwise end the drain early and leave the stream misaligned.
    fn acknowledges_attention(&self, message: &Message) -> Result<bool, CodecError> {
        if message.buffer_type != BufferType::Response {
            return Ok(false);
        }

        let mut reader = TokenReader::new(message.payload.clone(), self.session);
        let mut row_format = None;
        let mut param_format = None;
        while let Some(token) = reader.next_token(row_format.as_ref(), param_format.as_ref())? {
            match token {
                Token::RowFormat(fmt) => row_format = Some(fmt),
                Token::ParamFormat(fmt) => param_format = Some(fmt),
                Token::Done(done) | Token::DoneProc(done) | Token::DoneInProc(done) => {
                    if done.is_attention_ack() {
                        return Ok(true);
                    }
                }
                _ => {}
            }
        }
        Ok(false)
    }

    /// Get a mutable reference to the read codec.
    pub fn read_codec_mut(&mut self) -> &mut Tds5Codec {
        self.reader.codec_mut()
    }
}

impl<T> std::fmt::Debug for Connection<T>
where
    T: AsyncRead + AsyncWrite + std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("cancelling", &self.is_cancelling())
            .field("has_partial_message", &self.partial_type.is_some())
            .finish_non_exhaustive()
    }
}

/// Handle for cancelling requests on a connection.
///
/// This can be cloned and sent to other tasks to enable cancellation
/// from a different async context.
pub struct AttentionHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    writer: Arc<Mutex<PacketWriter<WriteHalf<T>>>>,
    notify: Arc<Notify>,
    cancelling: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
}

impl<T> AttentionHandle<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Send an attention buffer to cancel the current request.
    ///
    /// This can be called from a different task while the main task is
    /// blocked reading results. When no request is in flight, nothing is
    /// sent: the server only acknowledges attentions against a running
    /// request, and the response the attention meant to cut short has
    /// already completed.
    pub async fn cancel(&self) -> Result<(), CodecError> {
        if !self.in_flight.load(Ordering::Acquire) {
            tracing::debug!("attention requested with no request in flight, ignoring");
            return Ok(());
        }

        self.cancelling.store(true, Ordering::Release);

        tracing::debug!("sending attention buffer for request cancellation");

        let mut writer = self.writer.lock().await;

        let header = PacketHeader::new(
            BufferType::Cancel,
            BufferStatus::END_OF_MESSAGE | BufferStatus::ATTENTION,
            PACKET_HEADER_SIZE as u16,
        );
        let packet = Packet::new(header, BytesMut::new());

        writer.send(packet).await?;
        writer.flush().await?;

        Ok(())
    }

    /// Wait for the cancellation to complete.
    ///
    /// This waits until the server acknowledges the cancellation with a
    /// DONE token carrying the ATTN flag, or the drain gives up waiting
    /// for one.
    pub async fn wait_cancelled(&self) {
        if self.cancelling.load(Ordering::Acquire) {
            self.notify.notified().await;
        }
    }

    /// Check if a cancellation is currently in progress.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.cancelling.load(Ordering::Acquire)
    }
}

impl<T> Clone for AttentionHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            notify: Arc::clone(&self.notify),
            cancelling: Arc::clone(&self.cancelling),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<T> std::fmt::Debug for AttentionHandle<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttentionHandle")
            .field("cancelling", &self.is_cancelling())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds5_protocol::token::{Done, DoneStatus, TokenType};
    use tokio::io::AsyncReadExt;

    fn done_payload(status: DoneStatus) -> Bytes {
        let mut payload = BytesMut::new();
        Done {
            status,
            transaction_state: 0,
            count: 0,
        }
        .encode(&mut payload, &Session::default(), TokenType::Done);
        payload.freeze()
    }

    #[test]
    fn attention_packet_header() {
        let header = PacketHeader::new(
            BufferType::Cancel,
            BufferStatus::END_OF_MESSAGE | BufferStatus::ATTENTION,
            PACKET_HEADER_SIZE as u16,
        );

        assert_eq!(header.buffer_type, BufferType::Cancel);
        assert!(header.status.contains(BufferStatus::END_OF_MESSAGE));
        assert_eq!(header.length, PACKET_HEADER_SIZE as u16);
    }

    #[tokio::test]
    async fn message_splits_at_packet_size() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut conn = Connection::new(client);

        // 600 payload bytes with 512-byte packets: two packets.
        let payload = Bytes::from(vec![0xABu8; 600]);
        conn.send_message(BufferType::Normal, payload, 512).await.unwrap();
        conn.flush().await.unwrap();
        drop(conn);

        let mut wire = Vec::new();
        server.read_to_end(&mut wire).await.unwrap();

        // First packet full, not EOM, number 0.
        assert_eq!(wire[0], BufferType::Normal as u8);
        assert_eq!(wire[1], BufferStatus::NORMAL.bits());
        assert_eq!(u16::from_be_bytes([wire[2], wire[3]]), 512);
        assert_eq!(wire[6], 0);

        // Second packet EOM, number 1.
        let second = &wire[512..];
        assert_eq!(second[1], BufferStatus::END_OF_MESSAGE.bits());
        assert_eq!(
            u16::from_be_bytes([second[2], second[3]]) as usize,
            PACKET_HEADER_SIZE + 600 - 504
        );
        assert_eq!(second[6], 1);
    }

    #[tokio::test]
    async fn multi_packet_message_is_reassembled() {
        let (client, server) = tokio::io::duplex(4096);
        let mut sender = Connection::new(client);
        let mut receiver = Connection::new(server);

        let payload = Bytes::from(vec![0x5Au8; 1200]);
        sender
            .send_message(BufferType::Response, payload.clone(), 512)
            .await
            .unwrap();
        sender.flush().await.unwrap();

        let message = receiver.read_message().await.unwrap().unwrap();
        assert_eq!(message.buffer_type, BufferType::Response);
        assert_eq!(message.payload, payload);
    }

    #[tokio::test]
    async fn roundtrip_message_over_duplex() {
        let (client, server) = tokio::io::duplex(4096);
        let mut sender = Connection::new(client);
        let mut receiver = Connection::new(server);

        let payload = Bytes::from_static(b"token stream bytes");
        sender
            .send_message(BufferType::Response, payload.clone(), 512)
            .await
            .unwrap();
        sender.flush().await.unwrap();

        let message = receiver.read_message().await.unwrap().unwrap();
        assert_eq!(message.buffer_type, BufferType::Response);
        assert_eq!(message.payload, payload);
    }

    #[tokio::test]
    async fn buffer_type_change_mid_message_is_rejected() {
        let (client, server) = tokio::io::duplex(4096);
        let (_read_half, write_half) = tokio::io::split(client);
        let mut writer = PacketWriter::with_codec(write_half, Tds5Codec::new());

        // First packet of a Normal message, then a Response packet before
        // the message ended.
        let first = PacketHeader::new(BufferType::Normal, BufferStatus::NORMAL, 0);
        writer.send(Packet::new(first, BytesMut::from(&b"abc"[..]))).await.unwrap();
        let second = PacketHeader::new(BufferType::Response, BufferStatus::END_OF_MESSAGE, 1);
        writer.send(Packet::new(second, BytesMut::from(&b"def"[..]))).await.unwrap();
        writer.flush().await.unwrap();

        let mut receiver = Connection::new(server);
        let err = receiver.read_message().await.unwrap_err();
        assert!(matches!(err, CodecError::BufferTypeChanged { .. }));
    }

    #[tokio::test]
    async fn cancel_without_request_in_flight_is_a_noop() {
        let (client, server) = tokio::io::duplex(4096);
        let mut conn = Connection::new(client);
        let mut server = Connection::new(server);

        let attention = conn.attention_handle();
        attention.cancel().await.unwrap();
        assert!(!attention.is_cancelling());

        // The next response is delivered, not swallowed by a drain.
        server
            .send_message(BufferType::Response, done_payload(DoneStatus::empty()), 512)
            .await
            .unwrap();
        server.flush().await.unwrap();

        let message = tokio::time::timeout(Duration::from_millis(500), conn.read_message())
            .await
            .expect("read must not hang draining for an acknowledgment")
            .unwrap()
            .unwrap();
        assert_eq!(message.buffer_type, BufferType::Response);
    }

    #[tokio::test]
    async fn drain_parses_tokens_instead_of_scanning_bytes() {
        let (client, server) = tokio::io::duplex(8192);
        let mut conn = Connection::new(client);
        let mut server = Connection::new(server);

        conn.send_message(BufferType::Normal, Bytes::from_static(b"\x21"), 512)
            .await
            .unwrap();
        conn.flush().await.unwrap();
        conn.attention_handle().cancel().await.unwrap();

        // A row whose binary value contains DONE-like bytes with 0x20 in
        // the status position, followed by a completion that still has MORE
        // set: the drain must not stop here.
        use tds5_protocol::token::{FormatColumn, FormatDescriptor, RawRow};
        use tds5_protocol::WireType;

        let session = Session::default();
        let format = FormatDescriptor::new(vec![
            FormatColumn::new("b", WireType::VarBinary).with_length(16),
        ]);
        let mut payload = BytesMut::new();
        format.encode(&mut payload, &session, TokenType::RowFormat).unwrap();
        RawRow {
            values: vec![Some(Bytes::from_static(&[0xFD, 0x20, 0x00, 0xFF]))],
        }
        .encode(&mut payload, &session, &format, TokenType::Row)
        .unwrap();
        Done {
            status: DoneStatus::MORE,
            transaction_state: 0,
            count: 0,
        }
        .encode(&mut payload, &session, TokenType::Done);
        server
            .send_message(BufferType::Response, payload.freeze(), 512)
            .await
            .unwrap();

        // The genuine acknowledgment arrives in a second message.
        server
            .send_message(BufferType::Response, done_payload(DoneStatus::ATTN), 512)
            .await
            .unwrap();
        server.flush().await.unwrap();

        let drained = tokio::time::timeout(Duration::from_millis(500), conn.read_message())
            .await
            .expect("drain must find the acknowledgment")
            .unwrap();
        assert!(drained.is_none());
        assert!(!conn.is_cancelling());

        // The stream stays aligned for the next exchange.
        server
            .send_message(BufferType::Response, done_payload(DoneStatus::empty()), 512)
            .await
            .unwrap();
        server.flush().await.unwrap();
        conn.send_message(BufferType::Normal, Bytes::from_static(b"\x21"), 512)
            .await
            .unwrap();
        let message = conn.read_message().await.unwrap().unwrap();
        assert_eq!(message.buffer_type, BufferType::Response);
    }

    #[tokio::test]
    async fn drain_gives_up_when_no_acknowledgment_arrives() {
        let (client, server) = tokio::io::duplex(4096);
        let mut conn = Connection::new(client);
        conn.set_drain_timeout(Duration::from_millis(100));
        let mut server = Connection::new(server);

        conn.send_message(BufferType::Normal, Bytes::from_static(b"\x21"), 512)
            .await
            .unwrap();
        conn.flush().await.unwrap();
        conn.attention_handle().cancel().await.unwrap();

        // A completion without ATTN, then silence.
        server
            .send_message(BufferType::Response, done_payload(DoneStatus::empty()), 512)
            .await
            .unwrap();
        server.flush().await.unwrap();

        let drained = tokio::time::timeout(Duration::from_millis(500), conn.read_message())
            .await
            .expect("drain must be bounded")
            .unwrap();
        assert!(drained.is_none());
        assert!(!conn.is_cancelling());
    }
}
