use zerocopy::byteorder::little_endian::U32 as U32LE;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::constant::CapabilityFlags;

/// Protocol::SSLRequest, the truncated handshake response sent in clear text
/// before the TLS upgrade
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub(crate) struct SslRequest {
    client_flag: U32LE,
    max_packet_size: U32LE,
    character_set: u8,
    filler: [u8; 23],
}

impl SslRequest {
    pub(crate) fn new(capabilities: CapabilityFlags, max_packet_size: u32, collation: u8) -> Self {
        Self {
            client_flag: U32LE::new((capabilities | CapabilityFlags::CLIENT_SSL).bits()),
            max_packet_size: U32LE::new(max_packet_size),
            character_set: collation,
            filler: [0; 23],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssl_request_is_32_bytes_with_ssl_flag() {
        let request = SslRequest::new(CapabilityFlags::CLIENT_PROTOCOL_41, 1024, 255);
        let bytes = request.as_bytes();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[..4], &(0x0200u32 | 0x0800).to_le_bytes());
        assert_eq!(&bytes[4..8], &1024u32.to_le_bytes());
        assert_eq!(bytes[8], 255);
        assert!(bytes[9..].iter().all(|&b| b == 0));
    }
}
