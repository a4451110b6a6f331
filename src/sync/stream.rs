use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::error::{Error, Result};

/// Byte stream a connection runs on.
///
/// TLS setup is owned by the implementor: `upgrade_to_tls` is called after the
/// SSL request packet has been written and must leave `self` speaking TLS.
pub trait Transport: Read + Write + Send {
    fn is_secure(&self) -> bool {
        false
    }

    fn upgrade_to_tls(&mut self) -> Result<()> {
        Err(Error::BadConfigError(
            "TLS was requested but this transport cannot be upgraded".to_string(),
        ))
    }

    fn read_timeout(&self) -> std::io::Result<Option<Duration>>;

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()>;

    fn shutdown(&mut self) -> std::io::Result<()>;
}

impl Transport for TcpStream {
    fn read_timeout(&self) -> std::io::Result<Option<Duration>> {
        TcpStream::read_timeout(self)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn shutdown(&mut self) -> std::io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

impl Transport for UnixStream {
    // a local socket never leaves the host
    fn is_secure(&self) -> bool {
        true
    }

    fn read_timeout(&self) -> std::io::Result<Option<Duration>> {
        UnixStream::read_timeout(self)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        UnixStream::set_read_timeout(self, timeout)
    }

    fn shutdown(&mut self) -> std::io::Result<()> {
        UnixStream::shutdown(self, Shutdown::Both)
    }
}
