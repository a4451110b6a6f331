use std::collections::HashMap;

use crate::charset::Charset;
use crate::constant::{CapabilityFlags, ServerStatusFlags};
use crate::protocol::response::{OkPayload, SessionStateChange};

/// `major.minor.patch` prefix of the server version string
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ServerVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl ServerVersion {
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse strings like `8.0.36`, `5.7.44-log` or `8.4.0-commercial`.
    ///
    /// Missing components are 0; anything after the last digit of a
    /// component is ignored.
    pub fn parse(version: &str) -> Option<Self> {
        let mut parts = version.splitn(3, '.').map(|part| {
            let digits = part.bytes().take_while(u8::is_ascii_digit).count();
            part[..digits].parse::<u16>().ok()
        });
        let major = parts.next().flatten()?;
        let minor = parts.next().flatten().unwrap_or(0);
        let patch = parts.next().flatten().unwrap_or(0);
        Some(Self::new(major, minor, patch))
    }

    pub fn meets_minimum(&self, major: u16, minor: u16, patch: u16) -> bool {
        *self >= Self::new(major, minor, patch)
    }
}

impl std::fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// What the client knows about the server side of one connection.
///
/// Updated from every OK/EOF packet. Capabilities are fixed once the
/// handshake completes.
#[derive(Debug, Clone, Default)]
pub struct ServerSession {
    capabilities: CapabilityFlags,
    status: ServerStatusFlags,
    previous_status: ServerStatusFlags,
    warning_count: u16,
    affected_rows: u64,
    last_insert_id: u64,
    server_version: Option<ServerVersion>,
    server_version_string: String,
    connection_id: u32,
    charset: Charset,
    schema: Option<String>,
    variables: HashMap<String, String>,
}

impl ServerSession {
    pub fn new(
        capabilities: CapabilityFlags,
        server_version: &str,
        connection_id: u32,
        charset: Charset,
    ) -> Self {
        Self {
            capabilities,
            server_version: ServerVersion::parse(server_version),
            server_version_string: server_version.to_string(),
            connection_id,
            charset,
            ..Default::default()
        }
    }

    pub fn capabilities(&self) -> CapabilityFlags {
        self.capabilities
    }

    pub fn has_capability(&self, flag: CapabilityFlags) -> bool {
        self.capabilities.contains(flag)
    }

    pub fn status(&self) -> ServerStatusFlags {
        self.status
    }

    pub fn previous_status(&self) -> ServerStatusFlags {
        self.previous_status
    }

    pub fn warning_count(&self) -> u16 {
        self.warning_count
    }

    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    pub fn server_version(&self) -> Option<ServerVersion> {
        self.server_version
    }

    pub fn server_version_string(&self) -> &str {
        &self.server_version_string
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn set_schema(&mut self, schema: Option<String>) {
        self.schema = schema;
    }

    /// Shift the current status into the previous snapshot and store a new one
    pub fn update_status(&mut self, status: ServerStatusFlags, warnings: u16) {
        self.previous_status = self.status;
        self.status = status;
        self.warning_count = warnings;
    }

    pub fn update_from_ok(&mut self, ok: &OkPayload) {
        self.update_status(ok.status_flags, ok.warnings);
        self.affected_rows = ok.affected_rows;
        self.last_insert_id = ok.last_insert_id;
        for change in &ok.session_state_changes {
            match change {
                SessionStateChange::SystemVariable { name, value } => {
                    self.set_variable(name.clone(), value.clone());
                }
                SessionStateChange::Schema(schema) => self.schema = Some(schema.clone()),
                SessionStateChange::StateChanged(_) | SessionStateChange::Other { .. } => {}
            }
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.status
            .contains(ServerStatusFlags::SERVER_STATUS_IN_TRANS)
    }

    pub fn is_autocommit(&self) -> bool {
        self.status
            .contains(ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT)
    }

    /// The last response opened a transaction
    pub fn transaction_started(&self) -> bool {
        !self
            .previous_status
            .contains(ServerStatusFlags::SERVER_STATUS_IN_TRANS)
            && self.in_transaction()
    }

    /// The last response committed or rolled back a transaction
    pub fn transaction_ended(&self) -> bool {
        self.previous_status
            .contains(ServerStatusFlags::SERVER_STATUS_IN_TRANS)
            && !self.in_transaction()
    }

    pub fn more_results_exist(&self) -> bool {
        self.status
            .contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS)
    }

    pub fn cursor_exists(&self) -> bool {
        self.status
            .contains(ServerStatusFlags::SERVER_STATUS_CURSOR_EXISTS)
    }

    pub fn last_row_sent(&self) -> bool {
        self.status
            .contains(ServerStatusFlags::SERVER_STATUS_LAST_ROW_SENT)
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn variables(&self) -> &HashMap<String, String> {
        &self.variables
    }

    fn sql_mode_contains(&self, mode: &str) -> bool {
        self.variable("sql_mode").is_some_and(|modes| {
            modes
                .split(',')
                .any(|m| m.trim().eq_ignore_ascii_case(mode))
        })
    }

    /// Either the status flag or `sql_mode` says backslashes are literal
    pub fn no_backslash_escapes(&self) -> bool {
        self.status
            .contains(ServerStatusFlags::SERVER_STATUS_NO_BACKSLASH_ESCAPES)
            || self.sql_mode_contains("NO_BACKSLASH_ESCAPES")
    }

    pub fn time_truncate_fractional(&self) -> bool {
        self.sql_mode_contains("TIME_TRUNCATE_FRACTIONAL")
    }

    /// Fractional seconds in temporal columns arrived in 5.6.4
    pub fn supports_fractional_seconds(&self) -> bool {
        self.server_version
            .is_some_and(|v| v.meets_minimum(5, 6, 4))
    }

    pub fn is_server_version_at_least(&self, major: u16, minor: u16, patch: u16) -> bool {
        self.server_version
            .is_some_and(|v| v.meets_minimum(major, minor, patch))
    }
}
