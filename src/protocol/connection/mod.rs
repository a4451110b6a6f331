pub mod auth;
mod change_user;
mod handshake;
mod ssl_request;

pub use auth::{AuthContext, AuthPluginRegistry, AuthenticationPlugin};
pub use change_user::write_change_user;
pub use handshake::{
    AuthSwitchRequest, Handshake, HandshakeAction, HandshakeConfig, HandshakePhase,
    HandshakeResponse41, InitialHandshake, read_auth_switch_request, read_initial_handshake,
    write_handshake_response, write_ssl_request,
};
