use crate::charset::Charset;
use crate::constant::{CapabilityFlags, CommandByte};
use crate::protocol::primitive::*;

use super::handshake::write_connect_attributes;

/// Write COM_CHANGE_USER.
///
/// The server answers like it answers a handshake response, so the reply is
/// fed to the same [`super::Handshake`] exchange.
#[expect(clippy::too_many_arguments)]
pub fn write_change_user(
    out: &mut Vec<u8>,
    capabilities: CapabilityFlags,
    user: &str,
    auth_response: &[u8],
    database: Option<&str>,
    charset: Charset,
    plugin_name: &str,
    connect_attributes: &[(String, String)],
) {
    write_int_1(out, CommandByte::ChangeUser as u8);
    write_string_null(out, &charset.encode(user));
    if capabilities.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
        write_int_1(out, auth_response.len() as u8);
        out.extend_from_slice(auth_response);
    } else {
        write_string_null(out, auth_response);
    }
    write_string_null(out, &charset.encode(database.unwrap_or_default()));
    if capabilities.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
        write_int_2(out, charset.default_collation() as u16);
    }
    if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
        write_string_null(out, plugin_name.as_bytes());
    }
    if capabilities.contains(CapabilityFlags::CLIENT_CONNECT_ATTRS) {
        write_connect_attributes(out, connect_attributes);
    }
}
