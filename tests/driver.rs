//! Connection driver tests against a scripted in-process backend.
mod common;

use bytes::{BufMut, BytesMut};
use common::{MockServer, take_cstr};
use postlink::{
    BackendKeyData, Column, Connection, Error, Event, ExecuteResult, PgFormat, QueryEvent,
    Statement, Value,
};

fn int4_statement(name: &str, column: &'static str) -> Statement {
    Statement {
        name: name.into(),
        param_types: vec![23],
        columns: vec![Column { name: column.into(), type_oid: 23, format: PgFormat::Text }],
    }
}

#[tokio::test]
async fn connect_runs_the_startup_handshake() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        let params = conn.handshake().await;
        assert!(params.contains(&("user".into(), "alice".into())));
        assert!(params.contains(&("database".into(), "blog".into())));
        // keep the socket open until the test is done with the connection
        conn
    });

    let conn = Connection::connect(&config).await.unwrap();
    assert_eq!(conn.backend_key(), BackendKeyData { process_id: 7777, secret_key: 1234 });
    assert_eq!(
        conn.get_parameter("server_version").await.unwrap().as_deref(),
        Some("16.3")
    );
    assert_eq!(conn.get_parameter("application_name").await.unwrap(), None);
    mock.await.unwrap();
}

#[tokio::test]
async fn cleartext_password_auth() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.read_startup().await;
        conn.auth(3, &[]).await;
        let body = conn.expect(b'p').await;
        assert_eq!(&body[..], b"hunter2\0");
        conn.auth(0, &[]).await;
        conn.parameter_status("integer_datetimes", "on").await;
        conn.backend_key(1, 2).await;
        conn.ready(b'I').await;
    });

    Connection::connect(&config).await.unwrap();
    mock.await.unwrap();
}

#[tokio::test]
async fn md5_password_auth() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.read_startup().await;
        conn.auth(5, b"abcd").await;

        let body = conn.expect(b'p').await;
        let first = md5::compute(b"hunter2alice");
        let mut salted = format!("{first:x}").into_bytes();
        salted.extend_from_slice(b"abcd");
        let expect = format!("md5{:x}", md5::compute(salted));
        assert_eq!(&body[..], [expect.as_bytes(), b"\0"].concat());

        conn.auth(0, &[]).await;
        conn.parameter_status("integer_datetimes", "on").await;
        conn.backend_key(1, 2).await;
        conn.ready(b'I').await;
    });

    Connection::connect(&config).await.unwrap();
    mock.await.unwrap();
}

#[tokio::test]
async fn unsupported_auth_method() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.read_startup().await;
        conn.auth(7, &[]).await;
    });

    let err = Connection::connect(&config).await.unwrap_err();
    assert!(matches!(err, Error::UnsupportedAuth(name) if name == "gss"));
    mock.await.unwrap();
}

#[tokio::test]
async fn bad_credentials() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.read_startup().await;
        conn.error("28P01", "password authentication failed for user \"alice\"").await;
    });

    let err = Connection::connect(&config).await.unwrap_err();
    assert!(matches!(err, Error::InvalidPassword));
    mock.await.unwrap();
}

#[tokio::test]
async fn squery_single_statement() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.handshake().await;

        let body = conn.expect(b'Q').await;
        assert_eq!(&body[..], b"SELECT 1\0");
        conn.row_description(&[("?column?", 23)]).await;
        conn.data_row(&[Some(b"1")]).await;
        conn.command_complete("SELECT 1").await;
        conn.ready(b'I').await;
    });

    let conn = Connection::connect(&config).await.unwrap();
    let batch = conn.squery("SELECT 1").await.unwrap();
    assert_eq!(batch.len(), 1);

    let result = batch[0].as_ref().unwrap();
    assert_eq!(result.rows_affected, Some(1));
    assert_eq!(result.columns.len(), 1);
    assert_eq!(result.columns[0].name, "?column?");
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].values(), &[Value::Int4(1)]);
    mock.await.unwrap();
}

#[tokio::test]
async fn squery_batches_per_statement_results() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.handshake().await;

        let body = conn.expect(b'Q').await;
        assert_eq!(&body[..], b"SELECT 1; SELECT 2\0");
        conn.row_description(&[("?column?", 23)]).await;
        conn.data_row(&[Some(b"1")]).await;
        conn.command_complete("SELECT 1").await;
        conn.row_description(&[("?column?", 23)]).await;
        conn.data_row(&[Some(b"2")]).await;
        conn.command_complete("SELECT 1").await;
        conn.ready(b'I').await;
    });

    let conn = Connection::connect(&config).await.unwrap();
    let batch = conn.squery("SELECT 1; SELECT 2").await.unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].as_ref().unwrap().rows[0].values(), &[Value::Int4(1)]);
    assert_eq!(batch[1].as_ref().unwrap().rows[0].values(), &[Value::Int4(2)]);
    mock.await.unwrap();
}

#[tokio::test]
async fn squery_attaches_mid_batch_errors() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.handshake().await;

        conn.expect(b'Q').await;
        conn.row_description(&[("?column?", 23)]).await;
        conn.data_row(&[Some(b"1")]).await;
        conn.command_complete("SELECT 1").await;
        conn.error("22012", "division by zero").await;
        conn.ready(b'I').await;
    });

    let conn = Connection::connect(&config).await.unwrap();
    let batch = conn.squery("SELECT 1; SELECT 1/0").await.unwrap();
    assert_eq!(batch.len(), 2);
    assert!(batch[0].is_ok());
    assert_eq!(batch[1].as_ref().unwrap_err().code, "22012");
    mock.await.unwrap();
}

#[tokio::test]
async fn empty_query_reports_an_empty_result() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.handshake().await;
        conn.expect(b'Q').await;
        conn.empty_query().await;
        conn.ready(b'I').await;
    });

    let conn = Connection::connect(&config).await.unwrap();
    let batch = conn.squery("").await.unwrap();
    assert_eq!(batch.len(), 1);
    let result = batch[0].as_ref().unwrap();
    assert_eq!(result.rows_affected, None);
    assert!(result.columns.is_empty());
    assert!(result.rows.is_empty());
    mock.await.unwrap();
}

#[tokio::test]
async fn pipelined_replies_resolve_in_submission_order() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.handshake().await;

        for name in ["s1", "s2", "s3"] {
            let mut body = conn.expect(b'P').await;
            assert_eq!(take_cstr(&mut body), name);
            conn.expect(b'D').await;
            conn.expect(b'H').await;
        }
        for column in ["c1", "c2", "c3"] {
            conn.parse_complete().await;
            conn.parameter_description(&[]).await;
            conn.row_description(&[(column, 23)]).await;
        }
    });

    let conn = Connection::connect(&config).await.unwrap();
    let (s1, s2, s3) = tokio::join!(
        conn.parse("s1", "SELECT 1 AS c1", &[]),
        conn.parse("s2", "SELECT 2 AS c2", &[]),
        conn.parse("s3", "SELECT 3 AS c3", &[]),
    );

    assert_eq!(s1.unwrap().columns[0].name, "c1");
    assert_eq!(s2.unwrap().columns[0].name, "c2");
    assert_eq!(s3.unwrap().columns[0].name, "c3");
    mock.await.unwrap();
}

#[tokio::test]
async fn parse_describes_the_statement() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.handshake().await;

        let body = conn.expect(b'P').await;
        assert_eq!(&body[..], b"s1\0SELECT $1::int + 1\0\x00\x01\x00\x00\x00\x17");
        let body = conn.expect(b'D').await;
        assert_eq!(&body[..], b"Ss1\0");
        conn.expect(b'H').await;

        conn.parse_complete().await;
        conn.parameter_description(&[23]).await;
        conn.row_description(&[("sum", 23)]).await;
    });

    let conn = Connection::connect(&config).await.unwrap();
    let stmt = conn.parse("s1", "SELECT $1::int + 1", &[23]).await.unwrap();
    assert_eq!(stmt.name, "s1");
    assert_eq!(stmt.param_types, vec![23]);
    assert_eq!(stmt.columns.len(), 1);
    assert_eq!(stmt.columns[0].name, "sum");
    // well-known result types are requested in binary
    assert_eq!(stmt.columns[0].format, PgFormat::Binary);
    mock.await.unwrap();
}

#[tokio::test]
async fn equery_runs_the_full_extended_cycle() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.handshake().await;

        // anonymous prepare + describe
        let body = conn.expect(b'P').await;
        assert_eq!(&body[..], b"\0SELECT $1::int + 1\0\x00\x00");
        let body = conn.expect(b'D').await;
        assert_eq!(&body[..], b"S\0");
        conn.expect(b'H').await;
        conn.parse_complete().await;
        conn.parameter_description(&[23]).await;
        conn.row_description(&[("sum", 23)]).await;

        // bind / execute / close statement / sync
        let body = conn.expect(b'B').await;
        let mut expect = BytesMut::new();
        expect.put_u8(0); // unnamed portal
        expect.put_u8(0); // unnamed statement
        expect.put_u16(1); // one param format code
        expect.put_u16(1); // binary
        expect.put_u16(1); // one param
        expect.put_i32(4);
        expect.put_i32(41);
        expect.put_u16(1); // one result format code
        expect.put_u16(1); // binary
        assert_eq!(&body[..], &expect[..]);

        let body = conn.expect(b'E').await;
        assert_eq!(&body[..], b"\0\x00\x00\x00\x00");
        let body = conn.expect(b'C').await;
        assert_eq!(&body[..], b"S\0");
        conn.expect(b'S').await;

        conn.bind_complete().await;
        conn.data_row(&[Some(&42i32.to_be_bytes())]).await;
        conn.command_complete("SELECT 1").await;
        conn.close_complete().await;
        conn.ready(b'I').await;
    });

    let conn = Connection::connect(&config).await.unwrap();
    let result = conn.equery("SELECT $1::int + 1", vec![Value::Int4(41)]).await.unwrap();
    assert_eq!(result.rows_affected, Some(1));
    assert_eq!(result.columns[0].name, "sum");
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].values(), &[Value::Int4(42)]);
    mock.await.unwrap();
}

#[tokio::test]
async fn execute_accumulates_rows_and_suspends_at_the_limit() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.handshake().await;

        conn.expect(b'B').await;
        conn.expect(b'H').await;
        conn.bind_complete().await;

        let mut body = conn.expect(b'E').await;
        assert_eq!(take_cstr(&mut body), "c1");
        assert_eq!(&body[..], &2i32.to_be_bytes()[..]);
        conn.expect(b'H').await;
        conn.data_row(&[Some(b"1")]).await;
        conn.data_row(&[Some(b"2")]).await;
        conn.portal_suspended().await;

        conn.expect(b'E').await;
        conn.expect(b'H').await;
        conn.data_row(&[Some(b"3")]).await;
        conn.command_complete("SELECT 1").await;
    });

    let conn = Connection::connect(&config).await.unwrap();
    let stmt = int4_statement("s1", "n");
    conn.bind(&stmt, "c1", vec![Value::Int4(3)]).await.unwrap();

    match conn.execute(&stmt, "c1", 2).await.unwrap() {
        ExecuteResult::Suspended { rows } => {
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0].values(), &[Value::Int4(1)]);
            assert_eq!(rows[1].values(), &[Value::Int4(2)]);
        }
        other => panic!("expected suspension, got {other:?}"),
    }

    match conn.execute(&stmt, "c1", 2).await.unwrap() {
        ExecuteResult::Complete { rows_affected, rows } => {
            assert_eq!(rows_affected, Some(1));
            assert_eq!(rows[0].values(), &[Value::Int4(3)]);
        }
        other => panic!("expected completion, got {other:?}"),
    }
    mock.await.unwrap();
}

#[tokio::test]
async fn describe_portal_returns_its_columns() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.handshake().await;

        let body = conn.expect(b'D').await;
        assert_eq!(&body[..], b"Pc1\0");
        conn.expect(b'H').await;
        conn.row_description(&[("name", 25)]).await;

        let body = conn.expect(b'D').await;
        assert_eq!(&body[..], b"Pc2\0");
        conn.expect(b'H').await;
        conn.no_data().await;
    });

    let conn = Connection::connect(&config).await.unwrap();
    let columns = conn.describe_portal("c1").await.unwrap();
    assert_eq!(columns.len(), 1);
    assert_eq!(columns[0].name, "name");

    let columns = conn.describe_portal("c2").await.unwrap();
    assert!(columns.is_empty());
    mock.await.unwrap();
}

#[tokio::test]
async fn extended_query_error_requires_sync() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.handshake().await;

        conn.expect(b'P').await;
        conn.expect(b'D').await;
        conn.expect(b'H').await;
        conn.error("42601", "syntax error at or near \"SELEC\"").await;

        // the rejected bind never reaches the wire, the next frame is Sync
        conn.expect(b'S').await;
        conn.ready(b'I').await;

        conn.expect(b'P').await;
        conn.expect(b'D').await;
        conn.expect(b'H').await;
        conn.parse_complete().await;
        conn.parameter_description(&[]).await;
        conn.no_data().await;
    });

    let conn = Connection::connect(&config).await.unwrap();
    let err = conn.parse("bad", "SELEC 1", &[]).await.unwrap_err();
    assert!(matches!(err, Error::Server(e) if e.code == "42601"));

    let stmt = int4_statement("bad", "n");
    let err = conn.bind(&stmt, "", vec![Value::Int4(1)]).await.unwrap_err();
    assert!(matches!(err, Error::SyncRequired));

    conn.sync().await.unwrap();

    let stmt = conn.parse("good", "SET search_path TO public", &[]).await.unwrap();
    assert!(stmt.columns.is_empty());
    mock.await.unwrap();
}

#[tokio::test]
async fn pipelined_commands_cascade_until_the_queued_sync() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.handshake().await;

        for name in ["bad", "p2", "p3", "p4"] {
            let mut body = conn.expect(b'P').await;
            assert_eq!(take_cstr(&mut body), name);
            conn.expect(b'D').await;
            conn.expect(b'H').await;
        }
        conn.expect(b'S').await;

        conn.error("42601", "syntax error").await;
        conn.ready(b'I').await;
    });

    let conn = Connection::connect(&config).await.unwrap();
    let (bad, p2, p3, p4, sync) = tokio::join!(
        conn.parse("bad", "SELEC 1", &[]),
        conn.parse("p2", "SELECT 2", &[]),
        conn.parse("p3", "SELECT 3", &[]),
        conn.parse("p4", "SELECT 4", &[]),
        conn.sync(),
    );

    assert!(matches!(bad.unwrap_err(), Error::Server(e) if e.code == "42601"));
    assert!(matches!(p2.unwrap_err(), Error::SyncRequired));
    assert!(matches!(p3.unwrap_err(), Error::SyncRequired));
    assert!(matches!(p4.unwrap_err(), Error::SyncRequired));
    sync.unwrap();
    mock.await.unwrap();
}

#[tokio::test]
async fn notifications_bypass_in_flight_queries() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.handshake().await;

        conn.expect(b'Q').await;
        conn.command_complete("LISTEN").await;
        conn.ready(b'I').await;

        conn.expect(b'Q').await;
        conn.row_description(&[("?column?", 23)]).await;
        conn.notice("01000", "this connection is being watched").await;
        conn.notification(4242, "jobs", "job-17").await;
        conn.data_row(&[Some(b"1")]).await;
        conn.command_complete("SELECT 1").await;
        conn.ready(b'I').await;
    });

    let (conn, mut events) = Connection::connect_with_events(&config).await.unwrap();
    conn.squery("LISTEN jobs").await.unwrap();

    let batch = conn.squery("SELECT 1").await.unwrap();
    assert_eq!(batch[0].as_ref().unwrap().rows[0].values(), &[Value::Int4(1)]);

    match events.next().await.unwrap() {
        Event::Notice(notice) => assert_eq!(notice.code, "01000"),
        other => panic!("expected a notice, got {other:?}"),
    }
    match events.next().await.unwrap() {
        Event::Notification(n) => {
            assert_eq!(n.process_id, 4242);
            assert_eq!(n.channel, "jobs");
            assert_eq!(n.payload, "job-17");
        }
        other => panic!("expected a notification, got {other:?}"),
    }

    // nothing else was raised
    conn.close().await;
    assert!(events.next().await.is_none());
    mock.await.unwrap();
}

#[tokio::test]
async fn parameter_status_updates_are_visible_without_a_round_trip() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.handshake().await;

        conn.expect(b'Q').await;
        conn.parameter_status("client_encoding", "latin1").await;
        conn.command_complete("SET").await;
        conn.ready(b'I').await;
        // keep the socket open until the test is done with the connection
        conn
    });

    let conn = Connection::connect(&config).await.unwrap();
    assert_eq!(
        conn.get_parameter("client_encoding").await.unwrap().as_deref(),
        Some("UTF8")
    );

    conn.squery("SET client_encoding TO 'latin1'").await.unwrap();
    assert_eq!(
        conn.get_parameter("client_encoding").await.unwrap().as_deref(),
        Some("latin1")
    );
    mock.await.unwrap();
}

#[tokio::test]
async fn with_transaction_rolls_back_on_failure() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.handshake().await;

        let body = conn.expect(b'Q').await;
        assert_eq!(&body[..], b"BEGIN\0");
        conn.command_complete("BEGIN").await;
        conn.ready(b'T').await;

        let body = conn.expect(b'Q').await;
        assert_eq!(&body[..], b"SELECT 1/0\0");
        conn.error("22012", "division by zero").await;
        conn.ready(b'E').await;

        let body = conn.expect(b'Q').await;
        assert_eq!(&body[..], b"ROLLBACK\0");
        conn.command_complete("ROLLBACK").await;
        conn.ready(b'I').await;
    });

    let conn = Connection::connect(&config).await.unwrap();
    let result = conn
        .with_transaction(async |tx| {
            let mut batch = tx.squery("SELECT 1/0").await?;
            let result = batch.remove(0)?;
            Ok(result)
        })
        .await;

    match result.unwrap_err() {
        Error::Rollback(cause) => {
            assert!(matches!(*cause, Error::Server(e) if e.code == "22012"))
        }
        other => panic!("expected rollback, got {other:?}"),
    }
    mock.await.unwrap();
}

#[tokio::test]
async fn with_transaction_commits_on_success() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.handshake().await;

        for (sql, tag, status) in [
            (&b"BEGIN\0"[..], "BEGIN", b'T'),
            (&b"SELECT 1\0"[..], "SELECT 1", b'T'),
            (&b"COMMIT\0"[..], "COMMIT", b'I'),
        ] {
            let body = conn.expect(b'Q').await;
            assert_eq!(&body[..], sql);
            if tag == "SELECT 1" {
                conn.row_description(&[("?column?", 23)]).await;
                conn.data_row(&[Some(b"1")]).await;
            }
            conn.command_complete(tag).await;
            conn.ready(status).await;
        }
    });

    let conn = Connection::connect(&config).await.unwrap();
    let rows = conn
        .with_transaction(async |tx| {
            let mut batch = tx.squery("SELECT 1").await?;
            Ok(batch.remove(0)?.rows)
        })
        .await
        .unwrap();
    assert_eq!(rows[0].values(), &[Value::Int4(1)]);
    mock.await.unwrap();
}

#[tokio::test]
async fn cancel_uses_a_side_channel_and_sync_recovers() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.handshake().await;

        // the cancel request arrives on its own connection
        let mut side = server.accept().await;
        assert_eq!(side.read_cancel().await, (7777, 1234));

        // the running request observes a backend error on the main socket
        conn.expect(b'P').await;
        conn.expect(b'D').await;
        conn.expect(b'H').await;
        conn.error("57014", "canceling statement due to user request").await;

        conn.expect(b'S').await;
        conn.ready(b'I').await;

        conn.expect(b'Q').await;
        conn.command_complete("SET").await;
        conn.ready(b'I').await;
    });

    let conn = Connection::connect(&config).await.unwrap();
    conn.cancel().await.unwrap();

    let err = conn.parse("s1", "SELECT pg_sleep(60)", &[]).await.unwrap_err();
    assert!(matches!(err, Error::Server(e) if e.code == "57014"));

    conn.sync().await.unwrap();
    assert!(conn.squery("SET search_path TO public").await.unwrap()[0].is_ok());
    mock.await.unwrap();
}

#[tokio::test]
async fn streaming_equery_emits_incremental_events() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.handshake().await;

        conn.expect(b'P').await;
        conn.expect(b'D').await;
        conn.expect(b'H').await;
        conn.parse_complete().await;
        conn.parameter_description(&[]).await;
        conn.row_description(&[("n", 23)]).await;

        conn.expect(b'B').await;
        conn.expect(b'E').await;
        conn.expect(b'C').await;
        conn.expect(b'S').await;
        conn.bind_complete().await;
        conn.data_row(&[Some(&1i32.to_be_bytes())]).await;
        conn.data_row(&[Some(&2i32.to_be_bytes())]).await;
        conn.command_complete("SELECT 2").await;
        conn.close_complete().await;
        conn.ready(b'I').await;
    });

    let conn = Connection::connect(&config).await.unwrap();
    let mut events = conn.equery_stream("SELECT n FROM t", vec![]).await.unwrap();

    assert!(matches!(events.next().await, Some(QueryEvent::Row(row)) if row[0] == Value::Int4(1)));
    assert!(matches!(events.next().await, Some(QueryEvent::Row(row)) if row[0] == Value::Int4(2)));
    assert!(matches!(
        events.next().await,
        Some(QueryEvent::Complete { rows_affected: Some(2) })
    ));
    assert!(matches!(events.next().await, Some(QueryEvent::Done)));
    assert!(events.next().await.is_none());
    mock.await.unwrap();
}

#[tokio::test]
async fn server_disconnect_fails_pending_requests() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.handshake().await;
        conn.expect(b'Q').await;
        // dropping the socket without a reply
    });

    let conn = Connection::connect(&config).await.unwrap();
    let err = conn.squery("SELECT 1").await.unwrap_err();
    assert!(matches!(err, Error::SockClosed));

    // the actor is gone, later commands fail locally
    let err = conn.squery("SELECT 1").await.unwrap_err();
    assert!(matches!(err, Error::Closed));
    mock.await.unwrap();
}

#[tokio::test]
async fn close_terminates_and_is_idempotent() {
    let (server, config) = MockServer::start().await;
    let mock = tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.handshake().await;
        conn.expect(b'X').await;
    });

    let conn = Connection::connect(&config).await.unwrap();
    conn.close().await;
    conn.close().await;

    let err = conn.squery("SELECT 1").await.unwrap_err();
    assert!(matches!(err, Error::Closed));
    mock.await.unwrap();
}

#[tokio::test]
async fn connect_times_out_against_a_silent_server() {
    let (server, mut config) = MockServer::start().await;
    config.connect_timeout = std::time::Duration::from_millis(200);

    let err = Connection::connect(&config).await.unwrap_err();
    assert!(matches!(err, Error::Timeout));
    drop(server);
}
