//! Dialog tests against a scripted in-memory server.
//!
//! Each test pairs a [`Dialog`] with a mock server task on the other end of
//! a duplex pipe. The server speaks real TDS 5.0: login acknowledgment,
//! capability token, environment changes, row formats and completions are
//! all produced with the protocol encoders.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use ase_client::{AseValue, ConnectionConfig, Dialog, Error};
use ase_codec::Connection;
use bytes::{BufMut, Bytes, BytesMut};
use tds5_protocol::codec::{self, Session};
use tds5_protocol::packet::BufferType;
use tds5_protocol::token::{
    Done, DoneStatus, Eed, EnvChange, EnvKind, EnvUpdate, FormatColumn, FormatDescriptor, RawRow,
    TokenType,
};
use tds5_protocol::{Capability, LoginAck, LoginStatus, WireType};
use tokio::io::DuplexStream;

fn session() -> Session {
    Session::default()
}

fn test_config() -> ConnectionConfig {
    ConnectionConfig::new("mock").username("sa").password("secret")
}

async fn respond(server: &mut Connection<DuplexStream>, payload: BytesMut) {
    server
        .send_message(BufferType::Response, payload.freeze(), 512)
        .await
        .unwrap();
    server.flush().await.unwrap();
}

/// Consume the login message and acknowledge it, announcing the database
/// and a larger packet size.
async fn serve_login(server: &mut Connection<DuplexStream>) {
    let login = server.read_message().await.unwrap().unwrap();
    assert_eq!(login.buffer_type, BufferType::Login);

    let s = session();
    let mut payload = BytesMut::new();
    LoginAck {
        status: LoginStatus::Succeeded,
        protocol_version: [5, 0, 0, 0],
        server_name: "ASE1".into(),
        server_version: [16, 0, 3, 0],
    }
    .encode(&mut payload, &s);
    payload.put_u8(TokenType::Capability as u8);
    Capability::client_default().encode_body(&mut payload, s.byte_order);
    EnvChange {
        updates: vec![
            EnvUpdate {
                kind: EnvKind::Database,
                new_value: "master".into(),
                old_value: String::new(),
            },
            EnvUpdate {
                kind: EnvKind::PacketSize,
                new_value: "2048".into(),
                old_value: "512".into(),
            },
        ],
    }
    .encode(&mut payload, &s);
    done(DoneStatus::empty(), 0).encode(&mut payload, &s, TokenType::Done);

    respond(server, payload).await;
}

fn done(status: DoneStatus, count: u32) -> Done {
    Done {
        status,
        transaction_state: 0,
        count,
    }
}

fn int4(v: i32) -> Option<Bytes> {
    Some(Bytes::copy_from_slice(&v.to_le_bytes()))
}

#[tokio::test]
async fn login_negotiates_environment() {
    let (client, server) = tokio::io::duplex(16384);
    let mut server = Connection::new(server);

    let server_task = tokio::spawn(async move {
        serve_login(&mut server).await;
    });

    let dialog = Dialog::login(client, &test_config()).await.unwrap();
    server_task.await.unwrap();

    assert!(dialog.is_usable());
    assert_eq!(dialog.server_name(), "ASE1");
    assert_eq!(dialog.server_version(), [16, 0, 3, 0]);
    assert_eq!(dialog.database(), "master");
    assert_eq!(dialog.packet_size(), 2048);
}

#[tokio::test]
async fn login_failure_reports_server_message() {
    let (client, server) = tokio::io::duplex(16384);
    let mut server = Connection::new(server);

    let server_task = tokio::spawn(async move {
        let _login = server.read_message().await.unwrap().unwrap();

        let s = session();
        let mut payload = BytesMut::new();
        LoginAck {
            status: LoginStatus::Failed,
            protocol_version: [5, 0, 0, 0],
            server_name: "ASE1".into(),
            server_version: [16, 0, 3, 0],
        }
        .encode(&mut payload, &s);
        Eed {
            number: 4002,
            state: 1,
            class: 14,
            sql_state: Bytes::new(),
            has_followup: false,
            transaction_state: 0,
            message: "Login failed.".into(),
            server: "ASE1".into(),
            procedure: String::new(),
            line: 0,
        }
        .encode(&mut payload, &s);
        done(DoneStatus::ERROR, 0).encode(&mut payload, &s, TokenType::Done);
        respond(&mut server, payload).await;
    });

    let err = Dialog::login(client, &test_config()).await.unwrap_err();
    server_task.await.unwrap();

    match err {
        Error::Login(message) => assert_eq!(message, "Login failed."),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn query_collects_multiple_result_sets() {
    let (client, server) = tokio::io::duplex(16384);
    let mut server = Connection::new(server);

    let server_task = tokio::spawn(async move {
        serve_login(&mut server).await;

        let request = server.read_message().await.unwrap().unwrap();
        assert_eq!(request.buffer_type, BufferType::Normal);
        assert_eq!(request.payload[0], TokenType::Language as u8);

        let s = session();
        let mut payload = BytesMut::new();

        let first = FormatDescriptor::new(vec![
            FormatColumn::new("id", WireType::Int4),
            FormatColumn::new("name", WireType::VarChar)
                .nullable()
                .with_length(30),
        ]);
        first.encode(&mut payload, &s, TokenType::RowFormat).unwrap();
        for (id, name) in [(1, "a"), (2, "b")] {
            RawRow {
                values: vec![int4(id), Some(Bytes::copy_from_slice(name.as_bytes()))],
            }
            .encode(&mut payload, &s, &first, TokenType::Row)
            .unwrap();
        }
        done(DoneStatus::MORE | DoneStatus::COUNT, 2).encode(&mut payload, &s, TokenType::Done);

        let second = FormatDescriptor::new(vec![FormatColumn::new("v", WireType::Int4)]);
        second.encode(&mut payload, &s, TokenType::RowFormat).unwrap();
        RawRow {
            values: vec![int4(3)],
        }
        .encode(&mut payload, &s, &second, TokenType::Row)
        .unwrap();
        done(DoneStatus::COUNT, 1).encode(&mut payload, &s, TokenType::Done);

        respond(&mut server, payload).await;
    });

    let mut dialog = Dialog::login(client, &test_config()).await.unwrap();
    let result = dialog
        .execute("select id, name from t select v from u")
        .await
        .unwrap();
    server_task.await.unwrap();

    assert_eq!(result.result_sets.len(), 2);
    assert_eq!(result.rows_affected, 3);

    let rows = &result.result_sets[0].rows;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get(0), Some(&AseValue::Int(1)));
    assert_eq!(rows[0].get_named("name"), Some(&AseValue::String("a".into())));
    assert_eq!(rows[1].get(0), Some(&AseValue::Int(2)));

    let second = &result.result_sets[1].rows;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].get(0), Some(&AseValue::Int(3)));
}

#[tokio::test]
async fn null_and_empty_values_decode_against_column_flags() {
    let (client, server) = tokio::io::duplex(16384);
    let mut server = Connection::new(server);

    let server_task = tokio::spawn(async move {
        serve_login(&mut server).await;
        let _request = server.read_message().await.unwrap().unwrap();

        let s = session();
        let mut payload = BytesMut::new();
        let format = FormatDescriptor::new(vec![
            FormatColumn::new("nullable", WireType::VarChar)
                .nullable()
                .with_length(10),
            FormatColumn::new("not_null", WireType::VarChar).with_length(10),
        ]);
        format.encode(&mut payload, &s, TokenType::RowFormat).unwrap();
        // Both values are zero length on the wire.
        RawRow {
            values: vec![None, None],
        }
        .encode(&mut payload, &s, &format, TokenType::Row)
        .unwrap();
        done(DoneStatus::COUNT, 1).encode(&mut payload, &s, TokenType::Done);

        respond(&mut server, payload).await;
    });

    let mut dialog = Dialog::login(client, &test_config()).await.unwrap();
    let result = dialog.execute("select * from t").await.unwrap();
    server_task.await.unwrap();

    let row = &result.rows()[0];
    assert_eq!(row.get(0), Some(&AseValue::Null));
    assert_eq!(row.get(1), Some(&AseValue::String(String::new())));
}

#[tokio::test]
async fn server_error_surfaces_and_dialog_stays_usable() {
    let (client, server) = tokio::io::duplex(16384);
    let mut server = Connection::new(server);

    let server_task = tokio::spawn(async move {
        serve_login(&mut server).await;

        let _request = server.read_message().await.unwrap().unwrap();
        let s = session();
        let mut payload = BytesMut::new();
        Eed {
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
        }
        .encode(&mut payload, &s);
        done(DoneStatus::ERROR, 0).encode(&mut payload, &s, TokenType::Done);
        respond(&mut server, payload).await;

        // A followup request succeeds.
        let _request = server.read_message().await.unwrap().unwrap();
        let mut payload = BytesMut::new();
        done(DoneStatus::COUNT, 1).encode(&mut payload, &s, TokenType::Done);
        respond(&mut server, payload).await;
    });

    let mut dialog = Dialog::login(client, &test_config()).await.unwrap();

    let err = dialog.execute("insert t values (1)").await.unwrap_err();
    assert!(err.is_server_error(2601));
    assert_eq!(err.class(), Some(14));
    assert!(!err.is_transient());

    assert!(dialog.is_usable());
    let result = dialog.execute("insert t values (2)").await.unwrap();
    assert_eq!(result.rows_affected, 1);

    server_task.await.unwrap();
}

#[tokio::test]
async fn informational_messages_do_not_fail_the_request() {
    let (client, server) = tokio::io::duplex(16384);
    let mut server = Connection::new(server);

    let server_task = tokio::spawn(async move {
        serve_login(&mut server).await;
        let _request = server.read_message().await.unwrap().unwrap();

        let s = session();
        let mut payload = BytesMut::new();
        Eed {
            number: 5701,
            state: 2,
            class: 10,
            sql_state: Bytes::from_static(b"01000"),
            has_followup: false,
            transaction_state: 0,
            message: "Changed database context to 'pubs2'.".into(),
            server: "ASE1".into(),
            procedure: String::new(),
            line: 1,
        }
        .encode(&mut payload, &s);
        done(DoneStatus::empty(), 0).encode(&mut payload, &s, TokenType::Done);
        respond(&mut server, payload).await;
    });

    let mut dialog = Dialog::login(client, &test_config()).await.unwrap();
    let result = dialog.execute("use pubs2").await.unwrap();
    server_task.await.unwrap();

    assert_eq!(result.messages.len(), 1);
    assert_eq!(result.messages[0].number, 5701);
    assert!(result.messages[0].is_informational());
}

#[tokio::test]
async fn procedure_call_returns_status_and_output_params() {
    let (client, server) = tokio::io::duplex(16384);
    let mut server = Connection::new(server);

    let server_task = tokio::spawn(async move {
        serve_login(&mut server).await;

        let request = server.read_message().await.unwrap().unwrap();
        assert_eq!(request.payload[0], TokenType::DbRpc as u8);

        let s = session();
        let mut payload = BytesMut::new();

        payload.put_u8(TokenType::ReturnStatus as u8);
        codec::put_u32(&mut payload, s.byte_order, 0);

        let params = FormatDescriptor::new(vec![
            FormatColumn::new("@count", WireType::IntN).nullable().with_length(4),
        ]);
        params.encode(&mut payload, &s, TokenType::ParamFormat).unwrap();
        RawRow {
            values: vec![int4(7)],
        }
        .encode(&mut payload, &s, &params, TokenType::Params)
        .unwrap();

        done(DoneStatus::PROC, 0).encode(&mut payload, &s, TokenType::DoneProc);
        respond(&mut server, payload).await;
    });

    let mut dialog = Dialog::login(client, &test_config()).await.unwrap();
    let result = dialog
        .call_procedure("sp_countrows", &[AseValue::String("t".into())])
        .await
        .unwrap();
    server_task.await.unwrap();

    assert_eq!(result.return_status, Some(0));
    assert_eq!(result.output_params, vec![AseValue::Int(7)]);
}

#[tokio::test]
async fn cancel_from_another_task_interrupts_execution() {
    let (client, server) = tokio::io::duplex(16384);
    let mut server = Connection::new(server);
    let (started_tx, started_rx) = tokio::sync::oneshot::channel();

    let server_task = tokio::spawn(async move {
        serve_login(&mut server).await;
        let _request = server.read_message().await.unwrap().unwrap();

        // First chunk of a long result, MORE still set.
        let s = session();
        let mut payload = BytesMut::new();
        let format = FormatDescriptor::new(vec![FormatColumn::new("id", WireType::Int4)]);
        format.encode(&mut payload, &s, TokenType::RowFormat).unwrap();
        RawRow {
            values: vec![int4(1)],
        }
        .encode(&mut payload, &s, &format, TokenType::Row)
        .unwrap();
        done(DoneStatus::MORE | DoneStatus::COUNT, 1).encode(&mut payload, &s, TokenType::Done);
        respond(&mut server, payload).await;
        started_tx.send(()).unwrap();

        let cancel = server.read_message().await.unwrap().unwrap();
        assert_eq!(cancel.buffer_type, BufferType::Cancel);

        let mut payload = BytesMut::new();
        done(DoneStatus::ATTN, 0).encode(&mut payload, &s, TokenType::Done);
        respond(&mut server, payload).await;
    });

    let mut dialog = Dialog::login(client, &test_config()).await.unwrap();
    let attention = dialog.attention_handle();
    tokio::spawn(async move {
        started_rx.await.unwrap();
        attention.cancel().await.unwrap();
    });

    let err = dialog.execute("select id from big_table").await.unwrap_err();
    server_task.await.unwrap();

    assert!(matches!(err, Error::Cancelled));
    assert!(dialog.is_usable());
}

#[tokio::test]
async fn cancel_after_completion_is_a_noop() {
    let (client, server) = tokio::io::duplex(16384);
    let mut server = Connection::new(server);

    let server_task = tokio::spawn(async move {
        serve_login(&mut server).await;

        let _request = server.read_message().await.unwrap().unwrap();
        let s = session();
        let mut payload = BytesMut::new();
        done(DoneStatus::COUNT, 1).encode(&mut payload, &s, TokenType::Done);
        respond(&mut server, payload).await;

        // The next message must be the second request; an attention after
        // the response completed is never put on the wire.
        let request = server.read_message().await.unwrap().unwrap();
        assert_eq!(request.buffer_type, BufferType::Normal);
        let mut payload = BytesMut::new();
        done(DoneStatus::COUNT, 1).encode(&mut payload, &s, TokenType::Done);
        respond(&mut server, payload).await;
    });

    let mut dialog = Dialog::login(client, &test_config()).await.unwrap();

    let result = dialog.execute("delete from t where id = 1").await.unwrap();
    assert_eq!(result.rows_affected, 1);

    dialog.attention_handle().cancel().await.unwrap();

    let result = tokio::time::timeout(
        std::time::Duration::from_millis(500),
        dialog.execute("delete from t where id = 2"),
    )
    .await
    .expect("late cancel must not swallow the next response")
    .unwrap();
    assert_eq!(result.rows_affected, 1);

    server_task.await.unwrap();
}

#[tokio::test]
async fn command_timeout_cancels_the_request() {
    let (client, server) = tokio::io::duplex(16384);
    let mut server = Connection::new(server);

    let mut config = test_config();
    config.timeouts.command_timeout = Some(std::time::Duration::from_millis(100));

    let server_task = tokio::spawn(async move {
        serve_login(&mut server).await;

        let _request = server.read_message().await.unwrap().unwrap();
        // Say nothing until the attention buffer arrives.
        let cancel = server.read_message().await.unwrap().unwrap();
        assert_eq!(cancel.buffer_type, BufferType::Cancel);

        let s = session();
        let mut payload = BytesMut::new();
        done(DoneStatus::ATTN, 0).encode(&mut payload, &s, TokenType::Done);
        respond(&mut server, payload).await;
    });

    let mut dialog = Dialog::login(client, &config).await.unwrap();
    let err = dialog.execute("waitfor delay '00:10:00'").await.unwrap_err();
    server_task.await.unwrap();

    assert!(matches!(err, Error::CommandTimeout));
    assert!(err.is_transient());
    assert!(dialog.is_usable());
}
