//! Authentication plugins and their registry.
//!
//! The negotiation loop in [`super::handshake`] only moves bytes between the
//! server and an [`AuthenticationPlugin`]; what the bytes mean is up to the
//! plugin.

use std::collections::HashMap;

use auto_impl::auto_impl;

use crate::error::{Error, Result};

pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
pub const SHA256_PASSWORD: &str = "sha256_password";
pub const MYSQL_CLEAR_PASSWORD: &str = "mysql_clear_password";

/// Plugin used when neither the client nor the server names one
pub const DEFAULT_AUTH_PLUGIN: &str = MYSQL_NATIVE_PASSWORD;

/// Credentials handed to a plugin before its first step
#[derive(Clone, Default)]
pub struct AuthContext {
    pub user: String,
    pub password: Option<String>,
    /// TLS is established (or will be before the first credential byte)
    pub secure: bool,
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("secure", &self.secure)
            .finish()
    }
}

/// One authentication mechanism.
///
/// `next_authentication_step` receives the server's data (the seed on the
/// first call) and appends the packets to send, possibly none.
#[auto_impl(&mut, Box)]
pub trait AuthenticationPlugin: Send {
    fn protocol_plugin_name(&self) -> &'static str;

    /// The plugin sends credentials in a form only safe over TLS
    fn requires_confidentiality(&self) -> bool;

    /// The instance may be `reset` and used for another exchange
    fn is_reusable(&self) -> bool;

    fn set_authentication_parameters(&mut self, ctx: AuthContext);

    fn next_authentication_step(
        &mut self,
        from_server: &[u8],
        to_server: &mut Vec<Vec<u8>>,
    ) -> Result<()>;

    fn reset(&mut self) {}

    fn destroy(&mut self) {}
}

fn xor_in_place<const N: usize>(lhs: &mut [u8; N], rhs: &[u8]) {
    for (l, r) in lhs.iter_mut().zip(rhs) {
        *l ^= r;
    }
}

/// The server's seed is 20 bytes; switch requests may carry a trailing NUL
fn seed(from_server: &[u8]) -> &[u8] {
    &from_server[..from_server.len().min(20)]
}

/// SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))
pub fn scramble_native(password: &str, seed: &[u8]) -> [u8; 20] {
    use sha1::{Digest, Sha1};

    let stage1: [u8; 20] = Sha1::digest(password.as_bytes()).into();
    let stage2 = Sha1::digest(stage1);
    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let mut result: [u8; 20] = hasher.finalize().into();
    xor_in_place(&mut result, &stage1);
    result
}

/// SHA256(password) XOR SHA256(SHA256(SHA256(password)) + seed)
pub fn scramble_sha256(password: &str, seed: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let stage1: [u8; 32] = Sha256::digest(password.as_bytes()).into();
    let stage2 = Sha256::digest(stage1);
    let mut hasher = Sha256::new();
    hasher.update(stage2);
    hasher.update(seed);
    let mut result: [u8; 32] = hasher.finalize().into();
    xor_in_place(&mut result, &stage1);
    result
}

fn clear_password(ctx: &AuthContext) -> Vec<u8> {
    let mut out = ctx.password.clone().unwrap_or_default().into_bytes();
    out.push(0);
    out
}

#[derive(Debug, Default)]
pub struct NativePasswordPlugin {
    ctx: AuthContext,
}

impl AuthenticationPlugin for NativePasswordPlugin {
    fn protocol_plugin_name(&self) -> &'static str {
        MYSQL_NATIVE_PASSWORD
    }

    fn requires_confidentiality(&self) -> bool {
        false
    }

    fn is_reusable(&self) -> bool {
        true
    }

    fn set_authentication_parameters(&mut self, ctx: AuthContext) {
        self.ctx = ctx;
    }

    fn next_authentication_step(
        &mut self,
        from_server: &[u8],
        to_server: &mut Vec<Vec<u8>>,
    ) -> Result<()> {
        match self.ctx.password.as_deref() {
            None | Some("") => to_server.push(Vec::new()),
            Some(password) => to_server.push(scramble_native(password, seed(from_server)).to_vec()),
        }
        Ok(())
    }

    fn destroy(&mut self) {
        self.ctx = AuthContext::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum CachingSha2Stage {
    #[default]
    Scramble,
    FastAuthResult,
    FullAuthSent,
}

const FAST_AUTH_SUCCESS: u8 = 0x03;
const PERFORM_FULL_AUTHENTICATION: u8 = 0x04;

/// `caching_sha2_password`; full authentication needs TLS since RSA key
/// exchange is not available
#[derive(Debug, Default)]
pub struct CachingSha2PasswordPlugin {
    ctx: AuthContext,
    stage: CachingSha2Stage,
}

impl AuthenticationPlugin for CachingSha2PasswordPlugin {
    fn protocol_plugin_name(&self) -> &'static str {
        CACHING_SHA2_PASSWORD
    }

    fn requires_confidentiality(&self) -> bool {
        false
    }

    fn is_reusable(&self) -> bool {
        true
    }

    fn set_authentication_parameters(&mut self, ctx: AuthContext) {
        self.ctx = ctx;
    }

    fn next_authentication_step(
        &mut self,
        from_server: &[u8],
        to_server: &mut Vec<Vec<u8>>,
    ) -> Result<()> {
        match self.stage {
            CachingSha2Stage::Scramble => {
                match self.ctx.password.as_deref() {
                    None | Some("") => to_server.push(Vec::new()),
                    Some(password) => {
                        to_server.push(scramble_sha256(password, seed(from_server)).to_vec());
                    }
                }
                self.stage = CachingSha2Stage::FastAuthResult;
                Ok(())
            }
            CachingSha2Stage::FastAuthResult => match from_server.first() {
                Some(&FAST_AUTH_SUCCESS) => Ok(()),
                Some(&PERFORM_FULL_AUTHENTICATION) => {
                    if !self.ctx.secure {
                        return Err(Error::ConfidentialityRequired(CACHING_SHA2_PASSWORD.to_string()));
                    }
                    tracing::debug!("caching_sha2_password full authentication over TLS");
                    to_server.push(clear_password(&self.ctx));
                    self.stage = CachingSha2Stage::FullAuthSent;
                    Ok(())
                }
                _ => Err(Error::InvalidPacket),
            },
            CachingSha2Stage::FullAuthSent => Err(Error::InvalidPacket),
        }
    }

    fn reset(&mut self) {
        self.stage = CachingSha2Stage::Scramble;
    }

    fn destroy(&mut self) {
        self.ctx = AuthContext::default();
        self.stage = CachingSha2Stage::Scramble;
    }
}

/// `sha256_password` restricted to TLS, where the password is sent as is
#[derive(Debug, Default)]
pub struct Sha256PasswordPlugin {
    ctx: AuthContext,
}

impl AuthenticationPlugin for Sha256PasswordPlugin {
    fn protocol_plugin_name(&self) -> &'static str {
        SHA256_PASSWORD
    }

    fn requires_confidentiality(&self) -> bool {
        true
    }

    fn is_reusable(&self) -> bool {
        true
    }

    fn set_authentication_parameters(&mut self, ctx: AuthContext) {
        self.ctx = ctx;
    }

    fn next_authentication_step(
        &mut self,
        _from_server: &[u8],
        to_server: &mut Vec<Vec<u8>>,
    ) -> Result<()> {
        if !self.ctx.secure {
            return Err(Error::ConfidentialityRequired(SHA256_PASSWORD.to_string()));
        }
        match self.ctx.password.as_deref() {
            None | Some("") => to_server.push(vec![0]),
            Some(_) => to_server.push(clear_password(&self.ctx)),
        }
        Ok(())
    }

    fn destroy(&mut self) {
        self.ctx = AuthContext::default();
    }
}

#[derive(Debug, Default)]
pub struct ClearPasswordPlugin {
    ctx: AuthContext,
}

impl AuthenticationPlugin for ClearPasswordPlugin {
    fn protocol_plugin_name(&self) -> &'static str {
        MYSQL_CLEAR_PASSWORD
    }

    fn requires_confidentiality(&self) -> bool {
        true
    }

    fn is_reusable(&self) -> bool {
        true
    }

    fn set_authentication_parameters(&mut self, ctx: AuthContext) {
        self.ctx = ctx;
    }

    fn next_authentication_step(
        &mut self,
        _from_server: &[u8],
        to_server: &mut Vec<Vec<u8>>,
    ) -> Result<()> {
        to_server.push(clear_password(&self.ctx));
        Ok(())
    }

    fn destroy(&mut self) {
        self.ctx = AuthContext::default();
    }
}

type PluginConstructor = Box<dyn Fn() -> Box<dyn AuthenticationPlugin> + Send + Sync>;

/// Plugins available to a connection, by protocol name
pub struct AuthPluginRegistry {
    constructors: HashMap<String, PluginConstructor>,
    disabled: Vec<String>,
}

impl std::fmt::Debug for AuthPluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("AuthPluginRegistry")
            .field("plugins", &names)
            .field("disabled", &self.disabled)
            .finish()
    }
}

impl Default for AuthPluginRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl AuthPluginRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
            disabled: Vec::new(),
        }
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(MYSQL_NATIVE_PASSWORD, || Box::new(NativePasswordPlugin::default()));
        registry.register(CACHING_SHA2_PASSWORD, || {
            Box::new(CachingSha2PasswordPlugin::default())
        });
        registry.register(SHA256_PASSWORD, || Box::new(Sha256PasswordPlugin::default()));
        registry.register(MYSQL_CLEAR_PASSWORD, || Box::new(ClearPasswordPlugin::default()));
        registry
    }

    /// Add or replace the plugin called `name`
    pub fn register(
        &mut self,
        name: impl Into<String>,
        constructor: impl Fn() -> Box<dyn AuthenticationPlugin> + Send + Sync + 'static,
    ) {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    pub fn disable(&mut self, names: impl IntoIterator<Item = impl Into<String>>) {
        self.disabled.extend(names.into_iter().map(Into::into));
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.constructors.contains_key(name) && !self.disabled.iter().any(|d| d == name)
    }

    /// Fresh instance of an enabled plugin
    pub fn create(&self, name: &str) -> Result<Box<dyn AuthenticationPlugin>> {
        if !self.is_available(name) {
            return Err(Error::UnsupportedAuthPlugin(name.to_string()));
        }
        self.constructors
            .get(name)
            .map(|constructor| constructor())
            .ok_or_else(|| Error::UnsupportedAuthPlugin(name.to_string()))
    }

    /// Check the configured default plugin before any I/O
    pub fn validate(&self, default_plugin: Option<&str>) -> Result<()> {
        let Some(name) = default_plugin else {
            return Ok(());
        };
        if self.disabled.iter().any(|d| d == name) {
            return Err(Error::BadConfigError(format!(
                "default authentication plugin '{name}' is disabled"
            )));
        }
        if !self.constructors.contains_key(name) {
            return Err(Error::BadConfigError(format!(
                "default authentication plugin '{name}' is not registered"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &[u8; 20] = b"abcdefghijklmnopqrst";

    fn ctx(password: &str, secure: bool) -> AuthContext {
        AuthContext {
            user: "root".to_string(),
            password: Some(password.to_string()),
            secure,
        }
    }

    #[test]
    fn native_scramble_unmasks_to_stage1() {
        use sha1::{Digest, Sha1};
        let scrambled = scramble_native("secret", SEED);
        let stage1: [u8; 20] = Sha1::digest(b"secret").into();
        let stage2 = Sha1::digest(stage1);
        let mut hasher = Sha1::new();
        hasher.update(SEED);
        hasher.update(stage2);
        let mask: [u8; 20] = hasher.finalize().into();
        let unmasked: Vec<u8> = scrambled.iter().zip(mask).map(|(a, b)| a ^ b).collect();
        assert_eq!(unmasked, stage1);
    }

    #[test]
    fn empty_password_sends_empty_response() {
        let mut plugin = NativePasswordPlugin::default();
        plugin.set_authentication_parameters(ctx("", false));
        let mut out = Vec::new();
        plugin.next_authentication_step(SEED, &mut out).unwrap();
        assert_eq!(out, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn caching_sha2_fast_and_full_paths() {
        let mut plugin = CachingSha2PasswordPlugin::default();
        plugin.set_authentication_parameters(ctx("pw", false));
        let mut out = Vec::new();
        plugin.next_authentication_step(SEED, &mut out).unwrap();
        assert_eq!(out[0].len(), 32);

        out.clear();
        plugin.next_authentication_step(&[FAST_AUTH_SUCCESS], &mut out).unwrap();
        assert!(out.is_empty());

        plugin.reset();
        plugin.next_authentication_step(SEED, &mut out).unwrap();
        let err = plugin
            .next_authentication_step(&[PERFORM_FULL_AUTHENTICATION], &mut out)
            .unwrap_err();
        assert!(matches!(err, Error::ConfidentialityRequired(_)));

        let mut secure = CachingSha2PasswordPlugin::default();
        secure.set_authentication_parameters(ctx("pw", true));
        let mut out = Vec::new();
        secure.next_authentication_step(SEED, &mut out).unwrap();
        out.clear();
        secure
            .next_authentication_step(&[PERFORM_FULL_AUTHENTICATION], &mut out)
            .unwrap();
        assert_eq!(out, vec![b"pw\0".to_vec()]);
    }

    #[test]
    fn registry_create_and_validate() {
        let mut registry = AuthPluginRegistry::with_builtin();
        assert_eq!(
            registry.create(CACHING_SHA2_PASSWORD).unwrap().protocol_plugin_name(),
            CACHING_SHA2_PASSWORD
        );
        assert!(matches!(
            registry.create("auth_gssapi_client"),
            Err(Error::UnsupportedAuthPlugin(_))
        ));
        registry.disable([MYSQL_CLEAR_PASSWORD]);
        assert!(registry.create(MYSQL_CLEAR_PASSWORD).is_err());
        assert!(matches!(
            registry.validate(Some(MYSQL_CLEAR_PASSWORD)),
            Err(Error::BadConfigError(_))
        ));
        assert!(registry.validate(Some("nope")).is_err());
        assert!(registry.validate(None).is_ok());
        assert!(registry.validate(Some(SHA256_PASSWORD)).is_ok());
    }

    #[test]
    fn boxed_plugin_forwards() {
        let mut plugin: Box<dyn AuthenticationPlugin> = Box::new(ClearPasswordPlugin::default());
        plugin.set_authentication_parameters(ctx("x", true));
        let mut out = Vec::new();
        plugin.next_authentication_step(&[], &mut out).unwrap();
        assert_eq!(out, vec![b"x\0".to_vec()]);
        assert!(plugin.requires_confidentiality());
    }
}
