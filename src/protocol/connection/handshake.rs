use std::hint::cold_path;
use std::sync::Arc;

use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::charset::Charset;
use crate::constant::{CapabilityFlags, MAX_AUTH_NEGOTIATIONS, ServerStatusFlags};
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::primitive::*;
use crate::protocol::response::{ErrPayloadBytes, OkPayload};

use super::auth::{
    AuthContext, AuthPluginRegistry, AuthenticationPlugin, CACHING_SHA2_PASSWORD,
    DEFAULT_AUTH_PLUGIN, SHA256_PASSWORD,
};
use super::change_user::write_change_user;
use super::ssl_request::SslRequest;

const PROTOCOL_VERSION: u8 = 10;

#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
struct HandshakeFixedFields {
    connection_id: U32LE,
    auth_data_part1: [u8; 8],
    filler: u8,
    capability_flags_lower: U16LE,
    charset: u8,
    status_flags: U16LE,
    capability_flags_upper: U16LE,
    auth_data_len: u8,
}

/// Server greeting (Protocol::HandshakeV10)
#[derive(Debug, Clone)]
pub struct InitialHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// Seed for the first authentication step, normally 20 bytes
    pub auth_plugin_data: Vec<u8>,
    pub capability_flags: CapabilityFlags,
    pub charset: u8,
    pub status_flags: ServerStatusFlags,
    pub auth_plugin_name: Option<String>,
}

/// Read initial handshake packet from server.
///
/// A greeting that does not parse is reported as a protocol mismatch when
/// the server announced a protocol version other than 10.
pub fn read_initial_handshake(payload: &[u8]) -> Result<InitialHandshake> {
    let (protocol_version, data) = read_int_1(payload)?;

    if protocol_version == 0xFF {
        cold_path();
        Err(ErrPayloadBytes(payload))?
    }

    match parse_greeting_body(protocol_version, data) {
        Ok(greeting) => Ok(greeting),
        Err(_) if protocol_version != PROTOCOL_VERSION => {
            Err(Error::ProtocolMismatch(protocol_version))
        }
        Err(e) => Err(e),
    }
}

fn parse_greeting_body(protocol_version: u8, data: &[u8]) -> Result<InitialHandshake> {
    let (server_version, data) = read_string_null(data)?;
    let (fixed, mut data) =
        HandshakeFixedFields::ref_from_prefix(data).map_err(|_| Error::UnexpectedEof)?;

    let cap_bits = ((fixed.capability_flags_upper.get() as u32) << 16)
        | (fixed.capability_flags_lower.get() as u32);
    let capability_flags = CapabilityFlags::from_bits_truncate(cap_bits);

    let (_reserved, rest) = read_string_fix(data, 10)?;
    data = rest;

    let mut auth_plugin_data = fixed.auth_data_part1.to_vec();
    if capability_flags.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
        // part 2 is at least 12 bytes followed by a NUL
        let part2_len = (fixed.auth_data_len as usize).saturating_sub(9).max(12);
        let (part2, rest) = read_string_fix(data, part2_len)?;
        auth_plugin_data.extend_from_slice(part2);
        data = rest.get(1..).unwrap_or_default();
    }

    let auth_plugin_name = if capability_flags.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
        // some servers omit the terminating NUL
        let name = match read_string_null(data) {
            Ok((name, _)) => name,
            Err(_) => read_string_eof(data),
        };
        Some(String::from_utf8_lossy(name).into_owned())
    } else {
        None
    };

    Ok(InitialHandshake {
        protocol_version,
        server_version: String::from_utf8_lossy(server_version).into_owned(),
        connection_id: fixed.connection_id.get(),
        auth_plugin_data,
        capability_flags,
        charset: fixed.charset,
        status_flags: ServerStatusFlags::from_bits_truncate(fixed.status_flags.get()),
        auth_plugin_name,
    })
}

/// Handshake response packet sent by client (HandshakeResponse41)
#[derive(Debug, Clone)]
pub struct HandshakeResponse41<'a> {
    pub capability_flags: CapabilityFlags,
    pub max_packet_size: u32,
    pub charset: u8,
    pub username: &'a str,
    pub auth_response: &'a [u8],
    pub database: Option<&'a str>,
    pub auth_plugin_name: Option<&'a str>,
    pub connect_attributes: &'a [(String, String)],
}

/// Write handshake response packet (HandshakeResponse41)
pub fn write_handshake_response(out: &mut Vec<u8>, response: &HandshakeResponse41<'_>) {
    let caps = response.capability_flags;
    write_int_4(out, caps.bits());
    write_int_4(out, response.max_packet_size);
    write_int_1(out, response.charset);
    out.extend_from_slice(&[0u8; 23]);
    write_string_null(out, response.username.as_bytes());
    write_auth_response(out, caps, response.auth_response);

    if let Some(db) = response.database
        && caps.contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB)
    {
        write_string_null(out, db.as_bytes());
    }
    if let Some(plugin) = response.auth_plugin_name
        && caps.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH)
    {
        write_string_null(out, plugin.as_bytes());
    }
    if caps.contains(CapabilityFlags::CLIENT_CONNECT_ATTRS) {
        write_connect_attributes(out, response.connect_attributes);
    }
}

pub(super) fn write_auth_response(out: &mut Vec<u8>, caps: CapabilityFlags, auth_response: &[u8]) {
    if caps.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA) {
        write_bytes_lenenc(out, auth_response);
    } else if caps.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
        write_int_1(out, auth_response.len() as u8);
        out.extend_from_slice(auth_response);
    } else {
        write_string_null(out, auth_response);
    }
}

/// Key/value pairs prefixed by their total length
pub(super) fn write_connect_attributes(out: &mut Vec<u8>, attributes: &[(String, String)]) {
    let mut body = Vec::new();
    for (key, value) in attributes {
        write_bytes_lenenc(&mut body, key.as_bytes());
        write_bytes_lenenc(&mut body, value.as_bytes());
    }
    write_int_lenenc(out, body.len() as u64);
    out.extend_from_slice(&body);
}

/// Write SSL request packet (sent before HandshakeResponse when TLS is enabled)
pub fn write_ssl_request(
    out: &mut Vec<u8>,
    capability_flags: CapabilityFlags,
    max_packet_size: u32,
    charset: u8,
) {
    let request = SslRequest::new(capability_flags, max_packet_size, charset);
    out.extend_from_slice(request.as_bytes());
}

/// Auth switch request from server
#[derive(Debug, Clone)]
pub struct AuthSwitchRequest<'a> {
    pub plugin_name: &'a [u8],
    pub plugin_data: &'a [u8],
}

/// Read auth switch request (0xFE with a plugin name)
pub fn read_auth_switch_request(payload: &[u8]) -> Result<AuthSwitchRequest<'_>> {
    let (header, data) = read_int_1(payload)?;
    if header != 0xFE {
        return Err(Error::InvalidPacket);
    }
    let (plugin_name, plugin_data) = split_plugin_request(data)?;
    Ok(AuthSwitchRequest {
        plugin_name,
        plugin_data,
    })
}

/// Plugin name and data of an auth switch or next-factor packet body
fn split_plugin_request(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let (plugin_name, rest) = read_string_null(data)?;
    let plugin_data = match rest.split_last() {
        Some((&0, init)) => init,
        _ => rest,
    };
    Ok((plugin_name, plugin_data))
}

/// Connection settings the handshake needs, detached from [`Opts`]
#[derive(Clone)]
pub struct HandshakeConfig {
    pub user: String,
    pub passwords: [Option<String>; 3],
    pub database: Option<String>,
    /// Capabilities the client asks for
    pub capabilities: CapabilityFlags,
    pub charset: Charset,
    pub max_allowed_packet: usize,
    pub tls: bool,
    pub default_auth_plugin: Option<String>,
    pub allow_public_key_retrieval: bool,
    pub has_server_rsa_key: bool,
    pub connect_attributes: Vec<(String, String)>,
}

impl std::fmt::Debug for HandshakeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeConfig")
            .field("user", &self.user)
            .field("database", &self.database)
            .field("capabilities", &self.capabilities)
            .field("charset", &self.charset)
            .field("tls", &self.tls)
            .field("default_auth_plugin", &self.default_auth_plugin)
            .finish_non_exhaustive()
    }
}

impl From<&Opts> for HandshakeConfig {
    fn from(opts: &Opts) -> Self {
        Self {
            user: opts.user.clone(),
            passwords: [
                opts.password.clone(),
                opts.password2.clone(),
                opts.password3.clone(),
            ],
            database: opts.db.clone(),
            capabilities: opts.client_capabilities(),
            charset: opts.character_encoding,
            max_allowed_packet: opts.max_allowed_packet,
            tls: opts.tls,
            default_auth_plugin: opts.default_auth_plugin.clone(),
            allow_public_key_retrieval: opts.allow_public_key_retrieval,
            has_server_rsa_key: opts.server_rsa_public_key.is_some(),
            connect_attributes: opts.connect_attributes.clone(),
        }
    }
}

impl HandshakeConfig {
    fn password(&self, factor: usize) -> Option<String> {
        self.passwords.get(factor).cloned().flatten()
    }

    fn max_packet_size(&self) -> u32 {
        u32::try_from(self.max_allowed_packet).unwrap_or(u32::MAX)
    }
}

/// What the caller must do after driving the handshake
#[derive(Debug)]
pub enum HandshakeAction {
    /// Send this SSL request, upgrade the transport to TLS, then call
    /// [`Handshake::resume_after_tls`]
    SslRequest(Vec<u8>),
    /// Send these packets in order, then read the next server packet.
    /// Empty means read without sending.
    Write(Vec<Vec<u8>>),
    /// Authentication succeeded
    Connected {
        capabilities: CapabilityFlags,
        ok: OkPayload,
    },
}

/// Observable phase of a [`Handshake`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    AwaitingGreeting,
    AwaitingTls,
    /// Round trips made so far
    Exchanging(usize),
    Authenticated,
    Failed,
}

enum State {
    AwaitingGreeting,
    AwaitingTls,
    Exchanging {
        plugin: Box<dyn AuthenticationPlugin>,
        factor: usize,
        rounds: usize,
    },
    Authenticated,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    HandshakeResponse,
    ChangeUser,
}

/// State machine for connection authentication and COM_CHANGE_USER.
///
/// Pure parsing and packet generation state machine without I/O dependencies.
pub struct Handshake {
    config: HandshakeConfig,
    registry: Arc<AuthPluginRegistry>,
    state: State,
    greeting: Option<InitialHandshake>,
    seed: Vec<u8>,
    capabilities: CapabilityFlags,
    secure: bool,
    plugin_name: Option<&'static str>,
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("phase", &self.phase())
            .field("capabilities", &self.capabilities)
            .field("secure", &self.secure)
            .field("plugin_name", &self.plugin_name)
            .finish_non_exhaustive()
    }
}

impl Handshake {
    /// Fails before any I/O when the configured default plugin is unusable
    pub fn new(config: HandshakeConfig, registry: Arc<AuthPluginRegistry>) -> Result<Self> {
        registry.validate(config.default_auth_plugin.as_deref())?;
        Ok(Self {
            config,
            registry,
            state: State::AwaitingGreeting,
            greeting: None,
            seed: Vec::new(),
            capabilities: CapabilityFlags::empty(),
            secure: false,
            plugin_name: None,
        })
    }

    /// Mark the transport as confidential from the start (local sockets)
    pub fn on_secure_transport(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Start a COM_CHANGE_USER exchange on an authenticated connection.
    ///
    /// Returns the state machine and the request packet to send. `seed` is
    /// the scramble of the original greeting.
    pub fn change_user(
        config: HandshakeConfig,
        registry: Arc<AuthPluginRegistry>,
        capabilities: CapabilityFlags,
        seed: Vec<u8>,
        server_plugin: Option<&str>,
        secure: bool,
    ) -> Result<(Self, Vec<u8>)> {
        let mut handshake = Self::new(config, registry)?;
        handshake.capabilities = capabilities;
        handshake.seed = seed;
        handshake.secure = secure;
        let action = handshake.begin_authentication(server_plugin, RequestKind::ChangeUser);
        match action {
            Ok(HandshakeAction::Write(mut packets)) if !packets.is_empty() => {
                let request = packets.remove(0);
                Ok((handshake, request))
            }
            Ok(_) => Err(Error::LibraryBug(crate::error::eyre!(
                "change user produced no request packet"
            ))),
            Err(e) => {
                handshake.state = State::Failed;
                Err(e)
            }
        }
    }

    pub fn phase(&self) -> HandshakePhase {
        match &self.state {
            State::AwaitingGreeting => HandshakePhase::AwaitingGreeting,
            State::AwaitingTls => HandshakePhase::AwaitingTls,
            State::Exchanging { rounds, .. } => HandshakePhase::Exchanging(*rounds),
            State::Authenticated => HandshakePhase::Authenticated,
            State::Failed => HandshakePhase::Failed,
        }
    }

    pub fn greeting(&self) -> Option<&InitialHandshake> {
        self.greeting.as_ref()
    }

    /// Negotiated capabilities; empty before the greeting
    pub fn capabilities(&self) -> CapabilityFlags {
        self.capabilities
    }

    /// Plugin in use for the current (or last) exchange step
    pub fn plugin_name(&self) -> Option<&'static str> {
        self.plugin_name
    }

    /// Drive the state machine with the next payload
    pub fn drive(&mut self, payload: &[u8]) -> Result<HandshakeAction> {
        let result = match self.state {
            State::AwaitingGreeting => self.on_greeting(payload),
            State::Exchanging { .. } => self.on_auth_response(payload),
            State::AwaitingTls | State::Authenticated | State::Failed => {
                Err(Error::LibraryBug(crate::error::eyre!(
                    "handshake driven in phase {:?}",
                    self.phase()
                )))
            }
        };
        if result.is_err() {
            self.fail();
        }
        result
    }

    /// Continue after the transport was upgraded to TLS
    pub fn resume_after_tls(&mut self) -> Result<HandshakeAction> {
        if !matches!(self.state, State::AwaitingTls) {
            return Err(Error::LibraryBug(crate::error::eyre!(
                "resume_after_tls in phase {:?}",
                self.phase()
            )));
        }
        self.secure = true;
        let server_plugin = self
            .greeting
            .as_ref()
            .and_then(|g| g.auth_plugin_name.clone());
        let result =
            self.begin_authentication(server_plugin.as_deref(), RequestKind::HandshakeResponse);
        if result.is_err() {
            self.fail();
        }
        result
    }

    fn fail(&mut self) {
        if let State::Exchanging { plugin, .. } = &mut self.state {
            plugin.destroy();
        }
        self.state = State::Failed;
    }

    fn on_greeting(&mut self, payload: &[u8]) -> Result<HandshakeAction> {
        let greeting = read_initial_handshake(payload)?;
        tracing::debug!(
            server_version = %greeting.server_version,
            connection_id = greeting.connection_id,
            plugin = ?greeting.auth_plugin_name,
            "received server greeting"
        );

        let mut requested = self.config.capabilities;
        if self.config.tls {
            requested |= CapabilityFlags::CLIENT_SSL;
        }
        self.capabilities = requested & greeting.capability_flags;
        self.seed = greeting.auth_plugin_data.clone();
        let server_plugin = greeting.auth_plugin_name.clone();
        self.greeting = Some(greeting);

        if self.config.tls {
            if !self.capabilities.contains(CapabilityFlags::CLIENT_SSL) {
                return Err(Error::BadConfigError(
                    "TLS was requested but the server does not support it".to_string(),
                ));
            }
            let mut out = Vec::new();
            write_ssl_request(
                &mut out,
                self.capabilities,
                self.config.max_packet_size(),
                self.config.charset.default_collation(),
            );
            self.state = State::AwaitingTls;
            return Ok(HandshakeAction::SslRequest(out));
        }

        self.begin_authentication(server_plugin.as_deref(), RequestKind::HandshakeResponse)
    }

    /// Choose the first plugin and produce the request carrying its first step
    fn begin_authentication(
        &mut self,
        server_plugin: Option<&str>,
        kind: RequestKind,
    ) -> Result<HandshakeAction> {
        let client_default = self
            .config
            .default_auth_plugin
            .clone()
            .unwrap_or_else(|| DEFAULT_AUTH_PLUGIN.to_string());
        let mut name = match (&self.config.default_auth_plugin, server_plugin) {
            (Some(name), _) => name.clone(),
            (None, Some(name)) if self.registry.is_available(name) => name.to_string(),
            _ => client_default.clone(),
        };

        let mut skip_password = false;
        let needs_key_material = name == SHA256_PASSWORD || name == CACHING_SHA2_PASSWORD;
        if needs_key_material
            && !self.secure
            && !self.config.has_server_rsa_key
            && !self.config.allow_public_key_retrieval
            && self.registry.create(&name)?.requires_confidentiality()
        {
            tracing::debug!(plugin = %name, "insecure transport, falling back to the default plugin");
            name = if client_default == name {
                DEFAULT_AUTH_PLUGIN.to_string()
            } else {
                client_default
            };
            skip_password = true;
        }

        let mut plugin = self.registry.create(&name)?;
        self.check_confidentiality(plugin.as_ref())?;
        plugin.set_authentication_parameters(AuthContext {
            user: self.config.user.clone(),
            password: if skip_password {
                None
            } else {
                self.config.password(0)
            },
            secure: self.secure,
        });

        let mut packets = Vec::new();
        plugin.next_authentication_step(&self.seed, &mut packets)?;
        let auth_response = if packets.is_empty() {
            Vec::new()
        } else {
            packets.remove(0)
        };

        let mut request = Vec::new();
        match kind {
            RequestKind::HandshakeResponse => write_handshake_response(
                &mut request,
                &HandshakeResponse41 {
                    capability_flags: self.capabilities,
                    max_packet_size: self.config.max_packet_size(),
                    charset: self.config.charset.default_collation(),
                    username: &self.config.user,
                    auth_response: &auth_response,
                    database: self.config.database.as_deref(),
                    auth_plugin_name: Some(plugin.protocol_plugin_name()),
                    connect_attributes: &self.config.connect_attributes,
                },
            ),
            RequestKind::ChangeUser => write_change_user(
                &mut request,
                self.capabilities,
                &self.config.user,
                &auth_response,
                self.config.database.as_deref(),
                self.config.charset,
                plugin.protocol_plugin_name(),
                &self.config.connect_attributes,
            ),
        }
        packets.insert(0, request);

        self.plugin_name = Some(plugin.protocol_plugin_name());
        self.state = State::Exchanging {
            plugin,
            factor: 0,
            rounds: 1,
        };
        Ok(HandshakeAction::Write(packets))
    }

    fn check_confidentiality(&self, plugin: &dyn AuthenticationPlugin) -> Result<()> {
        if plugin.requires_confidentiality() && !self.secure {
            return Err(Error::ConfidentialityRequired(
                plugin.protocol_plugin_name().to_string(),
            ));
        }
        Ok(())
    }

    fn on_auth_response(&mut self, payload: &[u8]) -> Result<HandshakeAction> {
        let State::Exchanging {
            plugin,
            factor,
            rounds,
        } = std::mem::replace(&mut self.state, State::Failed)
        else {
            return Err(Error::LibraryBug(crate::error::eyre!(
                "auth response outside of exchange"
            )));
        };
        let mut plugin = plugin;
        let mut factor = factor;
        let rounds = rounds + 1;
        if rounds > MAX_AUTH_NEGOTIATIONS {
            plugin.destroy();
            return Err(Error::TooManyAuthNegotiations);
        }

        let (header, data) = read_int_1(payload)?;
        let mut packets = Vec::new();
        match header {
            0x00 => {
                let ok = OkPayload::parse(payload, self.capabilities)?;
                plugin.destroy();
                self.state = State::Authenticated;
                tracing::debug!(
                    plugin = self.plugin_name,
                    rounds,
                    "authentication succeeded"
                );
                return Ok(HandshakeAction::Connected {
                    capabilities: self.capabilities,
                    ok,
                });
            }
            0xFF => {
                plugin.destroy();
                return Err(ErrPayloadBytes(payload).into());
            }
            0xFE if data.is_empty() => {
                plugin.destroy();
                return Err(Error::UnsupportedAuthPlugin("mysql_old_password".to_string()));
            }
            0xFE => {
                let switch = read_auth_switch_request(payload)?;
                let name = String::from_utf8_lossy(switch.plugin_name).into_owned();
                tracing::debug!(from = plugin.protocol_plugin_name(), to = %name, "auth method switch");
                plugin = self.switch_plugin(plugin, &name, factor)?;
                self.seed = switch.plugin_data.to_vec();
                plugin.next_authentication_step(switch.plugin_data, &mut packets)?;
            }
            0x02 => {
                let (plugin_name, plugin_data) = split_plugin_request(data)?;
                factor += 1;
                if self.config.password(factor).is_none() {
                    plugin.destroy();
                    return Err(Error::BadConfigError(format!(
                        "server asked for authentication factor {} but no password is configured",
                        factor + 1
                    )));
                }
                let name = String::from_utf8_lossy(plugin_name).into_owned();
                tracing::debug!(factor = factor + 1, plugin = %name, "next authentication factor");
                plugin.destroy();
                plugin = self.registry.create(&name)?;
                self.check_confidentiality(plugin.as_ref())?;
                plugin.set_authentication_parameters(self.context(factor));
                plugin.next_authentication_step(plugin_data, &mut packets)?;
            }
            0x01 => {
                plugin.next_authentication_step(data, &mut packets)?;
            }
            _ => {
                plugin.next_authentication_step(payload, &mut packets)?;
            }
        }

        self.plugin_name = Some(plugin.protocol_plugin_name());
        self.state = State::Exchanging {
            plugin,
            factor,
            rounds,
        };
        Ok(HandshakeAction::Write(packets))
    }

    fn context(&self, factor: usize) -> AuthContext {
        AuthContext {
            user: self.config.user.clone(),
            password: self.config.password(factor),
            secure: self.secure,
        }
    }

    fn switch_plugin(
        &self,
        mut current: Box<dyn AuthenticationPlugin>,
        name: &str,
        factor: usize,
    ) -> Result<Box<dyn AuthenticationPlugin>> {
        let mut plugin = if current.protocol_plugin_name() == name && current.is_reusable() {
            current.reset();
            current
        } else {
            current.destroy();
            self.registry.create(name)?
        };
        self.check_confidentiality(plugin.as_ref())?;
        plugin.set_authentication_parameters(self.context(factor));
        Ok(plugin)
    }
}
