use std::borrow::Cow;

use crate::error::{Error, Result};

/// Character sets the protocol core can transcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Charset {
    #[default]
    Utf8mb4,
    Utf8mb3,
    Latin1,
    Ascii,
    Binary,
}

impl Charset {
    /// Resolve a MySQL charset name or a common encoding alias
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "utf8mb4" | "utf-8" | "utf8" => Some(Self::Utf8mb4),
            "utf8mb3" => Some(Self::Utf8mb3),
            "latin1" | "iso-8859-1" | "iso8859_1" | "cp1252" => Some(Self::Latin1),
            "ascii" | "us-ascii" => Some(Self::Ascii),
            "binary" => Some(Self::Binary),
            _ => None,
        }
    }

    /// Charset of a server collation id
    pub fn from_collation(collation: u16) -> Option<Self> {
        match collation {
            45 | 46 | 224..=247 | 255..=323 => Some(Self::Utf8mb4),
            33 | 76 | 83 | 192..=215 | 223 => Some(Self::Utf8mb3),
            5 | 8 | 15 | 31 | 47 | 48 | 49 | 94 => Some(Self::Latin1),
            11 | 65 => Some(Self::Ascii),
            63 => Some(Self::Binary),
            _ => None,
        }
    }

    /// Collation sent in the handshake response and COM_CHANGE_USER
    pub fn default_collation(self) -> u8 {
        match self {
            Self::Utf8mb4 => 45,
            Self::Utf8mb3 => 33,
            Self::Latin1 => 8,
            Self::Ascii => 11,
            Self::Binary => 63,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Utf8mb4 => "utf8mb4",
            Self::Utf8mb3 => "utf8mb3",
            Self::Latin1 => "latin1",
            Self::Ascii => "ascii",
            Self::Binary => "binary",
        }
    }

    pub fn max_bytes_per_char(self) -> usize {
        match self {
            Self::Utf8mb4 => 4,
            Self::Utf8mb3 => 3,
            Self::Latin1 | Self::Ascii | Self::Binary => 1,
        }
    }

    pub fn is_multibyte(self) -> bool {
        self.max_bytes_per_char() > 1
    }

    pub fn decode(self, bytes: &[u8]) -> Result<Cow<'_, str>> {
        match self {
            Self::Utf8mb4 | Self::Utf8mb3 => simdutf8::basic::from_utf8(bytes)
                .map(Cow::Borrowed)
                .map_err(|_| Error::data_format("invalid utf-8 sequence in string value")),
            Self::Ascii => {
                if bytes.is_ascii() {
                    // ASCII is a subset of UTF-8
                    simdutf8::basic::from_utf8(bytes)
                        .map(Cow::Borrowed)
                        .map_err(|_| Error::data_format("invalid ascii string value"))
                } else {
                    Err(Error::data_format("non-ascii byte in ascii string value"))
                }
            }
            Self::Latin1 | Self::Binary => {
                if bytes.is_ascii() {
                    simdutf8::basic::from_utf8(bytes)
                        .map(Cow::Borrowed)
                        .map_err(|_| Error::data_format("invalid latin1 string value"))
                } else {
                    Ok(Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect()))
                }
            }
        }
    }

    /// Characters that cannot be represented become `?`
    pub fn encode(self, s: &str) -> Cow<'_, [u8]> {
        match self {
            Self::Utf8mb4 | Self::Utf8mb3 => Cow::Borrowed(s.as_bytes()),
            Self::Latin1 | Self::Binary | Self::Ascii => {
                if s.is_ascii() {
                    return Cow::Borrowed(s.as_bytes());
                }
                let limit = if self == Self::Ascii { 0x7F } else { 0xFF };
                Cow::Owned(
                    s.chars()
                        .map(|c| u8::try_from(u32::from(c)).ok().filter(|&b| u32::from(b) <= limit))
                        .map(|b| b.unwrap_or(b'?'))
                        .collect(),
                )
            }
        }
    }
}
