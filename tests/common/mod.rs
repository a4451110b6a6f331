//! Scripted in-memory server for driving `Conn` without a live MySQL.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use zero_mysql_protocol::Opts;
use zero_mysql_protocol::constant::{
    CAPABILITIES_ALWAYS_ENABLED, CAPABILITIES_CONFIGURABLE, CapabilityFlags, ColumnFlags,
    ColumnType,
};
use zero_mysql_protocol::error::Result;
use zero_mysql_protocol::protocol::packet::write_packet_header;
use zero_mysql_protocol::protocol::primitive::{write_bytes_lenenc, write_int_lenenc};
use zero_mysql_protocol::sync::{Conn, Transport};

pub const SEED: &[u8; 20] = b"0123456789abcdefghij";
pub const CONNECTION_ID: u32 = 7;
pub const AUTOCOMMIT: u16 = 0x0002;

#[derive(Debug, Default)]
pub struct MockState {
    incoming: VecDeque<u8>,
    written: Vec<u8>,
    secure: bool,
    tls_upgrades: usize,
    read_timeout: Option<Duration>,
    timeouts_set: Vec<Option<Duration>>,
    shut_down: bool,
}

/// Replays server bytes and records what the client wrote.
///
/// Clones share state, so a test keeps one handle while `Conn` owns another.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Behave like a local socket
    pub fn secure(self) -> Self {
        self.state().secure = true;
        self
    }

    pub fn push(&self, bytes: &[u8]) {
        self.state().incoming.extend(bytes);
    }

    pub fn written(&self) -> Vec<u8> {
        self.state().written.clone()
    }

    pub fn clear_written(&self) {
        self.state().written.clear();
    }

    /// Client packets as (sequence id, payload), assuming plain framing
    pub fn sent_packets(&self) -> Vec<(u8, Vec<u8>)> {
        let written = self.written();
        let mut wire = written.as_slice();
        let mut packets = Vec::new();
        while wire.len() >= 4 {
            let len = usize::from(wire[0]) | usize::from(wire[1]) << 8 | usize::from(wire[2]) << 16;
            packets.push((wire[3], wire[4..4 + len].to_vec()));
            wire = &wire[4 + len..];
        }
        packets
    }

    pub fn unread(&self) -> usize {
        self.state().incoming.len()
    }

    pub fn tls_upgrades(&self) -> usize {
        self.state().tls_upgrades
    }

    pub fn timeouts_set(&self) -> Vec<Option<Duration>> {
        self.state().timeouts_set.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state().shut_down
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.state();
        if state.shut_down {
            return Err(std::io::ErrorKind::NotConnected.into());
        }
        let n = buf.len().min(state.incoming.len());
        for (slot, byte) in buf.iter_mut().zip(state.incoming.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.state();
        if state.shut_down {
            return Err(std::io::ErrorKind::BrokenPipe.into());
        }
        state.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Transport for MockTransport {
    fn is_secure(&self) -> bool {
        self.state().secure
    }

    fn upgrade_to_tls(&mut self) -> Result<()> {
        let mut state = self.state();
        state.tls_upgrades += 1;
        state.secure = true;
        Ok(())
    }

    fn read_timeout(&self) -> std::io::Result<Option<Duration>> {
        Ok(self.state().read_timeout)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        let mut state = self.state();
        state.read_timeout = timeout;
        state.timeouts_set.push(timeout);
        Ok(())
    }

    fn shutdown(&mut self) -> std::io::Result<()> {
        self.state().shut_down = true;
        Ok(())
    }
}

pub fn frame(sequence_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    write_packet_header(&mut out, sequence_id, payload.len());
    out.extend_from_slice(payload);
    out
}

/// Frame the reply to one command; sequence ids start at `first`
pub fn reply(first: u8, payloads: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for (seq, payload) in (first..).zip(payloads) {
        out.extend(frame(seq, payload));
    }
    out
}

pub fn server_caps() -> CapabilityFlags {
    (CAPABILITIES_ALWAYS_ENABLED | CAPABILITIES_CONFIGURABLE) - CapabilityFlags::CLIENT_SSL
}

pub fn greeting(caps: CapabilityFlags, plugin: &str) -> Vec<u8> {
    let bits = caps.bits();
    let mut out = vec![10];
    out.extend_from_slice(b"8.0.36\0");
    out.extend_from_slice(&CONNECTION_ID.to_le_bytes());
    out.extend_from_slice(&SEED[..8]);
    out.push(0);
    out.extend_from_slice(&(bits as u16).to_le_bytes());
    out.push(255);
    out.extend_from_slice(&AUTOCOMMIT.to_le_bytes());
    out.extend_from_slice(&((bits >> 16) as u16).to_le_bytes());
    out.push(21);
    out.extend_from_slice(&[0; 10]);
    out.extend_from_slice(&SEED[8..]);
    out.push(0);
    out.extend_from_slice(plugin.as_bytes());
    out.push(0);
    out
}

pub fn ok_with(affected_rows: u64, last_insert_id: u64, status: u16) -> Vec<u8> {
    let mut out = vec![0x00];
    write_int_lenenc(&mut out, affected_rows);
    write_int_lenenc(&mut out, last_insert_id);
    out.extend_from_slice(&status.to_le_bytes());
    out.extend_from_slice(&[0, 0]);
    out
}

pub fn ok() -> Vec<u8> {
    ok_with(0, 0, AUTOCOMMIT)
}

/// End of rows when `CLIENT_DEPRECATE_EOF` is negotiated
pub fn end_of_rows(status: u16) -> Vec<u8> {
    let mut out = vec![0xFE, 0x00, 0x00];
    out.extend_from_slice(&status.to_le_bytes());
    out.extend_from_slice(&[0, 0]);
    out
}

pub fn err(code: u16, sql_state: &str, message: &str) -> Vec<u8> {
    let mut out = vec![0xFF];
    out.extend_from_slice(&code.to_le_bytes());
    out.push(b'#');
    out.extend_from_slice(sql_state.as_bytes());
    out.extend_from_slice(message.as_bytes());
    out
}

pub fn column_count(count: u64) -> Vec<u8> {
    let mut out = Vec::new();
    write_int_lenenc(&mut out, count);
    out
}

pub fn column(name: &str, column_type: ColumnType, flags: ColumnFlags) -> Vec<u8> {
    let mut out = Vec::new();
    for part in ["def", "test", "t", "t", name, name] {
        write_bytes_lenenc(&mut out, part.as_bytes());
    }
    write_int_lenenc(&mut out, 0x0c);
    let collation: u16 = if flags.contains(ColumnFlags::BINARY_FLAG) { 63 } else { 255 };
    out.extend_from_slice(&collation.to_le_bytes());
    out.extend_from_slice(&255u32.to_le_bytes());
    out.push(column_type as u8);
    out.extend_from_slice(&flags.bits().to_le_bytes());
    out.push(0);
    out.extend_from_slice(&[0, 0]);
    out
}

pub fn text_row(values: &[Option<&str>]) -> Vec<u8> {
    let mut out = Vec::new();
    for value in values {
        match value {
            Some(v) => write_bytes_lenenc(&mut out, v.as_bytes()),
            None => out.push(0xFB),
        }
    }
    out
}

pub fn test_opts() -> Opts {
    Opts {
        user: "root".to_string(),
        password: Some("secret".to_string()),
        ..Opts::default()
    }
}

/// Route library logs to the test output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

/// Transport primed with a greeting and an OK for a native-password login
pub fn authenticated_transport() -> MockTransport {
    init_tracing();
    let transport = MockTransport::default();
    transport.push(&frame(0, &greeting(server_caps(), "mysql_native_password")));
    transport.push(&frame(2, &ok()));
    transport
}

/// Connection past the handshake, with the written bytes cleared
pub fn connect_with(opts: Opts) -> (Conn<MockTransport>, MockTransport) {
    let transport = authenticated_transport();
    let conn = Conn::with_transport(transport.clone(), opts).unwrap();
    transport.clear_written();
    (conn, transport)
}

pub fn connect() -> (Conn<MockTransport>, MockTransport) {
    connect_with(test_opts())
}
