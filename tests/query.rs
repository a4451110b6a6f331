mod common;

use std::io::Cursor;
use std::time::Duration;

use common::*;
use pretty_assertions::assert_eq;
use zero_mysql_protocol::constant::{ColumnFlags, ColumnType, ServerStatusFlags};
use zero_mysql_protocol::error::{Error, ErrorScope, Result};
use zero_mysql_protocol::sync::{
    Conn, LocalInfileHandler, PreparedStatement, StatementResult, StreamedResult,
};
use zero_mysql_protocol::value::{BindValue, I64Factory, SqlType, StreamSource, StringFactory};
use zero_mysql_protocol::{Opts, StreamingPolicy};

const MORE_RESULTS: u16 = 0x0008;
const IN_TRANS: u16 = 0x0001;
const CURSOR_EXISTS: u16 = 0x0040;
const LAST_ROW_SENT: u16 = 0x0080;

fn id_name_columns() -> Vec<Vec<u8>> {
    vec![
        column_count(2),
        column("id", ColumnType::MYSQL_TYPE_LONGLONG, ColumnFlags::BINARY_FLAG),
        column("name", ColumnType::MYSQL_TYPE_VAR_STRING, ColumnFlags::empty()),
    ]
}

/// Text result of `SELECT id, name` with the given rows
fn text_result(rows: &[(&str, Option<&str>)]) -> Vec<Vec<u8>> {
    let mut packets = id_name_columns();
    for (id, name) in rows {
        packets.push(text_row(&[Some(*id), *name]));
    }
    packets.push(end_of_rows(AUTOCOMMIT));
    packets
}

#[test]
fn text_query_collects_rows() {
    let (mut conn, transport) = connect();
    transport.push(&reply(1, &text_result(&[("1", Some("ann")), ("2", None)])));

    let results = conn.query("SELECT id, name FROM people").unwrap();
    assert_eq!(results.len(), 1);
    let rows = results[0].rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get(0, &I64Factory).unwrap(), 1);
    assert_eq!(rows[0].get(1, &StringFactory).unwrap(), "ann");
    assert_eq!(rows[1].get_by_name("id", &I64Factory).unwrap(), 2);
    assert!(rows[1].is_null(1).unwrap());

    assert_eq!(
        transport.sent_packets(),
        vec![(0, b"\x03SELECT id, name FROM people".to_vec())]
    );
    assert_eq!(transport.unread(), 0);
}

#[test]
fn multi_statement_results_arrive_in_order() {
    let (mut conn, transport) = connect();
    let mut packets = vec![ok_with(3, 10, AUTOCOMMIT | MORE_RESULTS)];
    packets.extend(text_result(&[("10", Some("x"))]));
    transport.push(&reply(1, &packets));

    let results = conn.query("INSERT ...; SELECT ...").unwrap();
    assert_eq!(results.len(), 2);
    assert!(matches!(&results[0], StatementResult::Update(ok) if ok.last_insert_id == 10));
    assert_eq!(results[0].affected_rows(), 3);
    assert!(matches!(&results[1], StatementResult::Rows(set) if set.rows.len() == 1));
    assert!(!conn.session().more_results_exist());
}

#[test]
fn server_error_keeps_the_connection() {
    let (mut conn, transport) = connect();
    transport.push(&reply(1, &[err(1146, "42S02", "Table 'test.nope' doesn't exist")]));
    transport.push(&reply(1, &[ok()]));

    let e = conn.query("SELECT * FROM nope").unwrap_err();
    assert_eq!(e.error_code(), Some(1146));
    assert_eq!(e.scope(), ErrorScope::Command);
    assert!(!conn.is_closed());
    conn.ping().unwrap();
}

#[test]
fn protocol_violation_closes_the_connection() {
    let (mut conn, transport) = connect();
    transport.push(&frame(5, &ok()));

    let e = conn.ping().unwrap_err();
    assert!(matches!(e, Error::PacketSequence { expected: 1, actual: 5, .. }));
    assert!(conn.is_closed());
    assert!(transport.is_shut_down());
    assert!(matches!(conn.query("SELECT 1"), Err(Error::ConnectionClosed)));
}

#[test]
fn streaming_refuses_other_commands_until_drained() {
    let (mut conn, transport) = connect();
    transport.push(&reply(1, &text_result(&[("1", Some("a")), ("2", Some("b"))])));
    transport.push(&reply(1, &[ok()]));

    let StreamedResult::Rows(columns) = conn.query_streaming("SELECT id, name").unwrap() else {
        panic!("expected rows");
    };
    assert_eq!(columns.len(), 2);
    let first = conn.next_row().unwrap().unwrap();
    assert_eq!(first.get(1, &StringFactory).unwrap(), "a");

    assert!(matches!(conn.ping(), Err(Error::StreamingDataOutstanding)));
    assert!(conn.has_pending_stream());
    assert!(!conn.is_closed());

    assert!(conn.next_row().unwrap().is_some());
    assert!(conn.next_row().unwrap().is_none());
    assert!(!conn.has_pending_stream());
    conn.ping().unwrap();
}

#[test]
fn streaming_close_policy_drains_before_the_next_command() {
    let opts = Opts {
        streaming_policy: StreamingPolicy::Close,
        ..test_opts()
    };
    let (mut conn, transport) = connect_with(opts);
    transport.push(&reply(1, &text_result(&[("1", None), ("2", None), ("3", None)])));
    transport.push(&reply(1, &[ok()]));

    conn.query_streaming("SELECT id, name").unwrap();
    conn.next_row().unwrap();
    conn.ping().unwrap();
    assert!(!conn.has_pending_stream());
    assert_eq!(transport.unread(), 0);
}

#[test]
fn next_result_walks_a_streamed_multi_statement() {
    let (mut conn, transport) = connect();
    let mut packets = id_name_columns();
    packets.push(text_row(&[Some("1"), Some("a")]));
    packets.push(end_of_rows(AUTOCOMMIT | MORE_RESULTS));
    packets.push(ok_with(4, 0, AUTOCOMMIT));
    transport.push(&reply(1, &packets));

    assert!(matches!(
        conn.query_streaming("SELECT ...; UPDATE ...").unwrap(),
        StreamedResult::Rows(_)
    ));
    match conn.next_result().unwrap() {
        Some(StreamedResult::Update(ok)) => assert_eq!(ok.affected_rows, 4),
        other => panic!("unexpected {other:?}"),
    }
    assert!(conn.next_result().unwrap().is_none());
    assert!(!conn.has_pending_stream());
}

fn prepare_ok(statement_id: u32, columns: u16, params: u16) -> Vec<u8> {
    let mut out = vec![0x00];
    out.extend_from_slice(&statement_id.to_le_bytes());
    out.extend_from_slice(&columns.to_le_bytes());
    out.extend_from_slice(&params.to_le_bytes());
    out.extend_from_slice(&[0, 0, 0]);
    out
}

/// Prepare `SELECT id, name FROM people WHERE id = ?` as statement 1
fn prepare_people(conn: &mut Conn<MockTransport>, transport: &MockTransport) -> PreparedStatement {
    let mut packets = vec![
        prepare_ok(1, 2, 1),
        column("?", ColumnType::MYSQL_TYPE_LONGLONG, ColumnFlags::BINARY_FLAG),
    ];
    packets.extend(id_name_columns().into_iter().skip(1));
    transport.push(&reply(1, &packets));
    let statement = conn.prepare("SELECT id, name FROM people WHERE id = ?").unwrap();
    transport.clear_written();
    statement
}

fn binary_row(id: i64, name: &str) -> Vec<u8> {
    // header, then a one-byte null bitmap for two columns
    let mut out = vec![0x00, 0x00];
    out.extend_from_slice(&id.to_le_bytes());
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
    out
}

#[test]
fn prepared_statement_round_trip() {
    let (mut conn, transport) = connect();
    let statement = prepare_people(&mut conn, &transport);
    assert_eq!(statement.id(), 1);
    assert_eq!(statement.param_count(), 1);
    assert_eq!(statement.columns().map(|c| c.len()), Some(2));

    let mut packets = id_name_columns();
    packets.push(binary_row(42, "zoe"));
    packets.push(end_of_rows(AUTOCOMMIT));
    transport.push(&reply(1, &packets));

    let results = conn.execute(&statement, &[BindValue::new(42i64)]).unwrap();
    let row = &results[0].rows()[0];
    assert_eq!(row.get(0, &I64Factory).unwrap(), 42);
    assert_eq!(row.get(1, &StringFactory).unwrap(), "zoe");

    let mut expected = vec![0x17, 1, 0, 0, 0, 0x00, 1, 0, 0, 0];
    expected.extend_from_slice(&[0x00, 0x01, ColumnType::MYSQL_TYPE_LONGLONG as u8, 0x00]);
    expected.extend_from_slice(&42i64.to_le_bytes());
    assert_eq!(transport.sent_packets(), vec![(0, expected)]);
}

#[test]
fn wrong_parameter_count_is_a_usage_error() {
    let (mut conn, transport) = connect();
    let statement = prepare_people(&mut conn, &transport);

    let e = conn.execute(&statement, &[]).unwrap_err();
    assert!(matches!(e, Error::BadUsageError(_)));
    assert!(!conn.is_closed());
    assert!(transport.written().is_empty());
}

#[test]
fn stream_parameters_travel_as_long_data() {
    let (mut conn, transport) = connect();
    let statement = prepare_people(&mut conn, &transport);
    transport.push(&reply(1, &[ok_with(1, 0, AUTOCOMMIT)]));

    let stream = StreamSource::new(Cursor::new(b"blob-bytes".to_vec()));
    let results = conn
        .execute(&statement, &[BindValue::byte_stream(stream)])
        .unwrap();
    assert_eq!(results[0].affected_rows(), 1);

    let sent = transport.sent_packets();
    assert_eq!(sent.len(), 2);
    let (seq, long_data) = &sent[0];
    assert_eq!(*seq, 0);
    assert_eq!(&long_data[..7], &[0x18, 1, 0, 0, 0, 0, 0]);
    assert_eq!(&long_data[7..], b"blob-bytes");
    let (seq, execute) = &sent[1];
    assert_eq!(*seq, 0);
    assert_eq!(execute[0], 0x17);
    // stream values are not repeated in the execute body
    assert_eq!(&execute[10..], &[0x00, 0x01, ColumnType::MYSQL_TYPE_BLOB as u8, 0x00]);
}

#[test]
fn stream_bound_to_a_number_is_refused_before_sending() {
    let (mut conn, transport) = connect();
    let statement = prepare_people(&mut conn, &transport);
    let sent_before = transport.written().len();

    let stream = StreamSource::new(Cursor::new(b"abc".to_vec()));
    let e = conn
        .execute(
            &statement,
            &[BindValue::byte_stream(stream).with_target(SqlType::Int)],
        )
        .unwrap_err();
    assert!(matches!(e, Error::TypeMismatch { target: SqlType::Int, .. }), "{e:?}");
    assert_eq!(e.scope(), ErrorScope::Value);
    assert_eq!(transport.written().len(), sent_before);
    assert!(!conn.is_closed());
}

#[test]
fn cursor_fetches_until_the_last_row() {
    let opts = Opts {
        fetch_size: 1,
        ..test_opts()
    };
    let (mut conn, transport) = connect_with(opts);
    let statement = prepare_people(&mut conn, &transport);

    let mut opened = id_name_columns();
    opened.push(end_of_rows(AUTOCOMMIT | CURSOR_EXISTS));
    transport.push(&reply(1, &opened));
    transport.push(&reply(
        1,
        &[binary_row(1, "a"), end_of_rows(AUTOCOMMIT | CURSOR_EXISTS)],
    ));
    transport.push(&reply(
        1,
        &[binary_row(2, "b"), end_of_rows(AUTOCOMMIT | CURSOR_EXISTS | LAST_ROW_SENT)],
    ));

    let result = conn
        .execute_with_cursor(&statement, &[BindValue::new(0i64)])
        .unwrap();
    let ids: Vec<i64> = result
        .rows()
        .iter()
        .map(|row| row.get(0, &I64Factory).unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2]);

    let sent = transport.sent_packets();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].1[5], 0x01);
    assert_eq!(sent[1], (0, vec![0x1C, 1, 0, 0, 0, 1, 0, 0, 0]));
    assert!(conn
        .session()
        .status()
        .contains(ServerStatusFlags::SERVER_STATUS_LAST_ROW_SENT));
}

#[test]
fn close_statement_expects_no_reply() {
    let (mut conn, transport) = connect();
    let statement = prepare_people(&mut conn, &transport);
    conn.close_statement(statement).unwrap();
    assert_eq!(transport.sent_packets(), vec![(0, vec![0x19, 1, 0, 0, 0])]);
}

struct FixedFile(&'static [u8]);

impl LocalInfileHandler for FixedFile {
    fn open(&mut self, _file_name: &str) -> Result<Box<dyn std::io::Read + Send>> {
        Ok(Box::new(Cursor::new(self.0)))
    }
}

fn infile_request(name: &str) -> Vec<u8> {
    let mut out = vec![0xFB];
    out.extend_from_slice(name.as_bytes());
    out
}

#[test]
fn local_infile_streams_the_file() {
    let opts = Opts {
        allow_load_local_infile: true,
        ..test_opts()
    };
    let (mut conn, transport) = connect_with(opts);
    conn.set_local_infile_handler(FixedFile(b"1,ann\n2,bob\n"));
    transport.push(&frame(1, &infile_request("people.csv")));
    transport.push(&frame(4, &ok_with(2, 0, AUTOCOMMIT)));

    let results = conn
        .query("LOAD DATA LOCAL INFILE 'people.csv' INTO TABLE people")
        .unwrap();
    assert_eq!(results[0].affected_rows(), 2);

    let sent = transport.sent_packets();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[1], (2, b"1,ann\n2,bob\n".to_vec()));
    assert_eq!(sent[2], (3, Vec::new()));
}

#[test]
fn local_infile_disabled_sends_an_empty_file() {
    let (mut conn, transport) = connect();
    conn.set_local_infile_handler(FixedFile(b"secret"));
    transport.push(&frame(1, &infile_request("/etc/passwd")));
    transport.push(&frame(3, &ok()));
    transport.push(&reply(1, &[ok()]));

    let e = conn.query("LOAD DATA LOCAL INFILE '/etc/passwd' INTO TABLE t").unwrap_err();
    assert!(matches!(e, Error::LocalInfileDisabled(ref name) if name == "/etc/passwd"));
    assert_eq!(transport.sent_packets()[1], (2, Vec::new()));
    assert!(!conn.is_closed());
    conn.ping().unwrap();
}

#[test]
fn timeout_is_restored_after_the_closure() {
    let (mut conn, transport) = connect();
    transport.push(&reply(1, &[ok()]));

    conn.with_timeout(Duration::from_secs(5), |conn| conn.ping()).unwrap();
    assert_eq!(
        transport.timeouts_set(),
        vec![None, Some(Duration::from_secs(5)), None]
    );
    assert!(matches!(
        conn.with_timeout(Duration::ZERO, |conn| conn.ping()),
        Err(Error::BadUsageError(_))
    ));
}

#[test]
fn init_db_updates_the_schema() {
    let (mut conn, transport) = connect();
    transport.push(&reply(1, &[ok()]));
    conn.init_db("shop").unwrap();
    assert_eq!(conn.session().schema(), Some("shop"));
    assert_eq!(transport.sent_packets(), vec![(0, b"\x02shop".to_vec())]);
}

#[test]
fn transaction_commits_on_success() {
    let (mut conn, transport) = connect();
    transport.push(&reply(1, &[ok_with(0, 0, AUTOCOMMIT | IN_TRANS)]));
    transport.push(&reply(1, &[ok_with(1, 5, AUTOCOMMIT | IN_TRANS)]));
    transport.push(&reply(1, &[ok()]));

    let id = conn
        .run_transaction(|conn| {
            conn.query_drop("INSERT INTO people VALUES (5, 'eve')")?;
            Ok(conn.session().last_insert_id())
        })
        .unwrap();
    assert_eq!(id, 5);

    let commands: Vec<Vec<u8>> = transport.sent_packets().into_iter().map(|(_, p)| p).collect();
    assert_eq!(commands[0], b"\x03BEGIN".to_vec());
    assert_eq!(commands[2], b"\x03COMMIT".to_vec());
}

#[test]
fn transaction_rolls_back_and_keeps_the_error() {
    let (mut conn, transport) = connect();
    transport.push(&reply(1, &[ok_with(0, 0, AUTOCOMMIT | IN_TRANS)]));
    transport.push(&reply(1, &[ok()]));

    let e = conn
        .run_transaction(|_| -> Result<()> { Err(Error::BadUsageError("abort".to_string())) })
        .unwrap_err();
    assert!(matches!(e, Error::BadUsageError(ref m) if m == "abort"));

    let commands: Vec<Vec<u8>> = transport.sent_packets().into_iter().map(|(_, p)| p).collect();
    assert_eq!(commands, vec![b"\x03BEGIN".to_vec(), b"\x03ROLLBACK".to_vec()]);
    assert!(!conn.session().in_transaction());
}

#[test]
fn quit_sends_com_quit_and_shuts_down() {
    let (conn, transport) = connect();
    conn.quit().unwrap();
    assert_eq!(transport.sent_packets(), vec![(0, vec![0x01])]);
    assert!(transport.is_shut_down());
}
