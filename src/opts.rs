use std::sync::Arc;
use std::time::Duration;

use smart_default::SmartDefault;

use crate::buffer_pool::{BufferPool, GLOBAL_BUFFER_POOL};
use crate::charset::Charset;
use crate::constant::{
    CAPABILITIES_ALWAYS_ENABLED, CAPABILITIES_CONFIGURABLE, CapabilityFlags,
};
use crate::error::{Error, Result};

/// What a new command does when a streamed result is still unread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamingPolicy {
    /// Fail with `Error::StreamingDataOutstanding`
    #[default]
    Refuse,
    /// Drain and discard the remaining rows first
    Close,
}

/// Whether rows must support in-place updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultSetConcurrency {
    #[default]
    ReadOnly,
    Updatable,
}

/// A configuration for connection
///
/// ```rs
/// let mut opts = Opts::default();
/// opts.user = "root".to_string();
/// opts.compress = true;
/// ```
#[derive(Debug, Clone, SmartDefault)]
pub struct Opts {
    /// Enable TCP_NODELAY socket option to disable Nagle's algorithm
    #[default = true]
    pub tcp_nodelay: bool,

    /// The client capabilities are `CAPABILITIES_ALWAYS_ENABLED | (opts.capabilities & CAPABILITIES_CONFIGURABLE)`.
    /// The final negotiated capabilities are `SERVER_CAPABILITIES & CLIENT_CAPABILITIES`.
    #[default(CAPABILITIES_ALWAYS_ENABLED
        | CapabilityFlags::CLIENT_DEPRECATE_EOF
        | CapabilityFlags::CLIENT_SESSION_TRACK
        | CapabilityFlags::CLIENT_CAN_HANDLE_EXPIRED_PASSWORDS
        | CapabilityFlags::CLIENT_CONNECT_ATTRS)]
    pub capabilities: CapabilityFlags,

    /// Enable compression for the connection
    pub compress: bool,

    /// Database name to use
    pub db: Option<String>,

    /// Hostname or IP address
    pub host: Option<String>,

    /// Port number for the MySQL server
    #[default = 3306]
    pub port: u16,

    /// Unix socket path
    pub socket: Option<String>,

    /// Username for authentication (can be empty for anonymous connections)
    pub user: String,

    pub password: Option<String>,

    /// Second and third factor of multi-factor authentication
    pub password2: Option<String>,
    pub password3: Option<String>,

    pub tls: bool,

    /// Plugin used for the first authentication attempt; the server's
    /// default is used when unset
    pub default_auth_plugin: Option<String>,

    /// Plugins the client refuses to use
    pub disabled_auth_plugins: Vec<String>,

    /// Allow `caching_sha2_password` and `sha256_password` to stay selected
    /// on an insecure transport
    pub allow_public_key_retrieval: bool,

    /// Path of the server's RSA public key
    pub server_rsa_public_key: Option<String>,

    /// Largest logical packet the client sends or accepts
    #[default(64 * 1024 * 1024)]
    pub max_allowed_packet: usize,

    #[default = true]
    pub send_fractional_seconds: bool,

    #[default = true]
    pub send_fractional_seconds_for_time: bool,

    /// Honour declared stream lengths when rendering stream parameters
    #[default = true]
    pub use_stream_lengths_in_prep_stmts: bool,

    /// Rows whose packet is at least this large are kept as one buffer
    #[default = 2048]
    pub large_row_size_threshold: usize,

    pub character_encoding: Charset,

    pub allow_load_local_infile: bool,

    pub streaming_policy: StreamingPolicy,

    /// Rows per COM_STMT_FETCH when a cursor is used
    #[default = 100]
    pub fetch_size: u32,

    pub result_set_concurrency: ResultSetConcurrency,

    /// Keep a ring buffer of recent packets for framing error messages
    pub enable_packet_debug: bool,

    #[default = 20]
    pub packet_debug_buffer_size: usize,

    /// Log every packet at `trace` level
    pub trace_protocol: bool,

    /// Collect send/receive timing and byte counters
    pub collect_timing: bool,

    pub socket_timeout: Option<Duration>,

    /// Extra connection attributes sent with `CLIENT_CONNECT_ATTRS`
    #[default(vec![("_client_name".to_string(), "zero-mysql-protocol".to_string())])]
    pub connect_attributes: Vec<(String, String)>,

    /// SQL command to execute after connection is established
    pub init_command: Option<String>,

    #[default(Arc::clone(&GLOBAL_BUFFER_POOL))]
    pub buffer_pool: Arc<BufferPool>,
}

impl Opts {
    /// Capabilities requested in the handshake response
    pub fn client_capabilities(&self) -> CapabilityFlags {
        let mut capabilities =
            CAPABILITIES_ALWAYS_ENABLED | (self.capabilities & CAPABILITIES_CONFIGURABLE);
        if self.db.is_some() {
            capabilities |= CapabilityFlags::CLIENT_CONNECT_WITH_DB;
        }
        if self.tls {
            capabilities |= CapabilityFlags::CLIENT_SSL;
        }
        if self.compress {
            capabilities |= CapabilityFlags::CLIENT_COMPRESS;
        }
        if self.allow_load_local_infile {
            capabilities |= CapabilityFlags::CLIENT_LOCAL_FILES;
        }
        if self.password2.is_some() {
            capabilities |= CapabilityFlags::CLIENT_MULTI_FACTOR_AUTHENTICATION;
        }
        capabilities
    }

    /// Password of factor `n` (0-based)
    pub fn password_for_factor(&self, n: usize) -> Option<&str> {
        match n {
            0 => self.password.as_deref(),
            1 => self.password2.as_deref(),
            2 => self.password3.as_deref(),
            _ => None,
        }
    }

    /// Reject settings that cannot work before touching the network
    pub fn validate(&self) -> Result<()> {
        if self.max_allowed_packet == 0 {
            return Err(Error::BadConfigError(
                "max_allowed_packet must be positive".to_string(),
            ));
        }
        if self.fetch_size == 0 {
            return Err(Error::BadConfigError("fetch_size must be positive".to_string()));
        }
        if self.password3.is_some() && self.password2.is_none() {
            return Err(Error::BadConfigError(
                "password3 is set but password2 is not".to_string(),
            ));
        }
        Ok(())
    }
}
