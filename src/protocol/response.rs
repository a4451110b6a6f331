use crate::constant::{CapabilityFlags, MAX_PACKET_SIZE, ServerStatusFlags};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use zerocopy::byteorder::little_endian::U16 as U16LE;
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// Packet type detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Ok,
    Err,
    Eof,
    LocalInfile,
    ResultSet,
}

/// Classify a command response by its first byte
pub fn detect_packet_type(payload: &[u8]) -> Result<PacketType> {
    match payload.first() {
        None => Err(Error::InvalidPacket),
        Some(0xFF) => Ok(PacketType::Err),
        Some(0x00) => Ok(PacketType::Ok),
        Some(0xFB) => Ok(PacketType::LocalInfile),
        Some(0xFE) if is_end_of_rows(payload) => Ok(PacketType::Eof),
        Some(_) => Ok(PacketType::ResultSet),
    }
}

/// A 0xFE packet shorter than a full packet terminates rows.
///
/// A text row can also start with 0xFE (an 8-byte length prefix) but such a
/// row is at least 2^24 bytes long.
pub fn is_end_of_rows(payload: &[u8]) -> bool {
    payload.first() == Some(&0xFE) && payload.len() < MAX_PACKET_SIZE
}

/// Session state change carried by an OK packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStateChange {
    SystemVariable { name: String, value: String },
    Schema(String),
    StateChanged(bool),
    Other { kind: u8, data: Vec<u8> },
}

/// OK packet response
#[derive(Debug, Clone, Default)]
pub struct OkPayload {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: ServerStatusFlags,
    pub warnings: u16,
    pub info: String,
    pub session_state_changes: Vec<SessionStateChange>,
}

impl OkPayload {
    /// Parse an OK packet; `0xFE` is accepted since it also ends row streams
    /// when EOF packets are deprecated.
    pub fn parse(payload: &[u8], capabilities: CapabilityFlags) -> Result<Self> {
        let (header, data) = read_int_1(payload)?;
        if header != 0x00 && header != 0xFE {
            return Err(Error::InvalidPacket);
        }

        let (affected_rows, rest) = read_int_lenenc(data)?;
        let (last_insert_id, rest) = read_int_lenenc(rest)?;
        let (status_flags, rest) = read_int_2(rest)?;
        let (warnings, rest) = read_int_2(rest)?;
        let status_flags = ServerStatusFlags::from_bits_retain(status_flags);

        let mut ok = OkPayload {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            ..Default::default()
        };

        if capabilities.contains(CapabilityFlags::CLIENT_SESSION_TRACK) {
            if rest.is_empty() {
                return Ok(ok);
            }
            let (info, rest) = read_string_lenenc(rest)?;
            ok.info = String::from_utf8_lossy(info).into_owned();
            if status_flags.contains(ServerStatusFlags::SERVER_SESSION_STATE_CHANGED)
                && !rest.is_empty()
            {
                let (state, _rest) = read_string_lenenc(rest)?;
                ok.session_state_changes = parse_session_state(state)?;
            }
        } else {
            ok.info = String::from_utf8_lossy(rest).into_owned();
        }
        Ok(ok)
    }
}

fn parse_session_state(mut data: &[u8]) -> Result<Vec<SessionStateChange>> {
    let mut changes = Vec::new();
    while !data.is_empty() {
        let (kind, rest) = read_int_1(data)?;
        let (entry, rest) = read_string_lenenc(rest)?;
        data = rest;
        let change = match kind {
            0x00 => {
                let (name, entry) = read_string_lenenc(entry)?;
                let (value, _) = read_string_lenenc(entry)?;
                SessionStateChange::SystemVariable {
                    name: String::from_utf8_lossy(name).into_owned(),
                    value: String::from_utf8_lossy(value).into_owned(),
                }
            }
            0x01 => {
                let (schema, _) = read_string_lenenc(entry)?;
                SessionStateChange::Schema(String::from_utf8_lossy(schema).into_owned())
            }
            0x02 => {
                let (flag, _) = read_string_lenenc(entry)?;
                SessionStateChange::StateChanged(flag == b"1")
            }
            kind => SessionStateChange::Other {
                kind,
                data: entry.to_vec(),
            },
        };
        changes.push(change);
    }
    Ok(changes)
}

#[derive(Debug, Clone, Copy)]
pub struct ErrPayloadBytes<'a>(pub &'a [u8]);

/// How a server error affects the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    PasswordExpired,
    MustChangePassword,
    ClientInteractionTimeout,
    Truncation,
    Other,
}

pub const ER_MUST_CHANGE_PASSWORD_LOGIN: u16 = 1862;
pub const ER_MUST_CHANGE_PASSWORD: u16 = 1820;
pub const ER_CLIENT_INTERACTION_TIMEOUT: u16 = 4031;

/// ERR packet response
#[derive(Debug, Clone, thiserror::Error)]
#[error("ERROR {} ({}): {}", self.error_code, self.sql_state, self.message)]
pub struct ErrPayload {
    pub error_code: u16,
    pub sql_state: String,
    pub message: String,
}

impl ErrPayload {
    pub fn kind(&self) -> ServerErrorKind {
        match self.error_code {
            ER_MUST_CHANGE_PASSWORD_LOGIN => ServerErrorKind::PasswordExpired,
            ER_MUST_CHANGE_PASSWORD => ServerErrorKind::MustChangePassword,
            ER_CLIENT_INTERACTION_TIMEOUT => ServerErrorKind::ClientInteractionTimeout,
            _ if matches!(self.sql_state.as_str(), "22001" | "01004") => {
                ServerErrorKind::Truncation
            }
            _ => ServerErrorKind::Other,
        }
    }
}

impl TryFrom<ErrPayloadBytes<'_>> for ErrPayload {
    type Error = Error;

    fn try_from(bytes: ErrPayloadBytes<'_>) -> Result<Self> {
        let payload = bytes.0;
        let (header, mut data) = read_int_1(payload)?;
        if header != 0xFF {
            return Err(Error::InvalidPacket);
        }

        let (error_code, rest) = read_int_2(data)?;
        data = rest;

        // Check for SQL state marker '#'
        let (sql_state, rest) = if data.first() == Some(&b'#') {
            let (state_bytes, rest) = read_string_fix(&data[1..], 5)?;
            (String::from_utf8_lossy(state_bytes).into_owned(), rest)
        } else {
            (String::from("HY000"), data)
        };

        let message = String::from_utf8_lossy(rest).into_owned();

        Ok(ErrPayload {
            error_code,
            sql_state,
            message,
        })
    }
}

/// EOF packet response (zero-copy)
///
/// Layout after the 0xFE header byte:
/// - warnings: 2 bytes (little-endian)
/// - status_flags: 2 bytes (little-endian)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct EofPacket {
    pub warnings: U16LE,
    pub status_flags: U16LE,
}

impl EofPacket {
    pub fn status_flags(&self) -> ServerStatusFlags {
        ServerStatusFlags::from_bits_retain(self.status_flags.get())
    }

    pub fn warnings(&self) -> u16 {
        self.warnings.get()
    }
}

/// Read EOF packet (header byte 0xFE, length < 9) - zero-copy
pub fn read_eof_packet(payload: &[u8]) -> Result<&EofPacket> {
    let (header, data) = read_int_1(payload)?;
    if header != 0xFE {
        return Err(Error::InvalidPacket);
    }

    if data.len() < 4 {
        return Err(Error::UnexpectedEof);
    }

    EofPacket::ref_from_bytes(&data[..4]).map_err(|_| Error::InvalidPacket)
}

/// Parse the end-of-rows marker into an OK summary.
///
/// With `CLIENT_DEPRECATE_EOF` the marker is an OK packet with a 0xFE header,
/// otherwise it is a classic EOF packet.
pub fn read_end_of_rows(payload: &[u8], capabilities: CapabilityFlags) -> Result<OkPayload> {
    if capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF) {
        OkPayload::parse(payload, capabilities)
    } else {
        let eof = read_eof_packet(payload)?;
        Ok(OkPayload {
            status_flags: eof.status_flags(),
            warnings: eof.warnings(),
            ..Default::default()
        })
    }
}

/// Parse a response that must be OK, turning ERR into an error
pub fn read_ok_or_err(payload: &[u8], capabilities: CapabilityFlags) -> Result<OkPayload> {
    match payload.first() {
        Some(0x00) => OkPayload::parse(payload, capabilities),
        Some(0xFF) => Err(ErrPayloadBytes(payload).into()),
        _ => Err(Error::InvalidPacket),
    }
}
