#![forbid(unsafe_code)]

//! Error types shared by backends, codecs, and the reactive wrappers.
//!
//! # Failure Modes
//!
//! | Failure | Source | Surfaced as |
//! |---------|--------|-------------|
//! | Raw value not parseable | `Codec::parse` | Reported, never returned from reads |
//! | Value not serializable | `Codec::stringify` | `StorageError::Codec` from writes |
//! | Storage disabled | Backend access | `StorageError::Unavailable` |
//! | Quota exceeded | `Backend::set_item` | `StorageError::QuotaExceeded` |
//! | File I/O | `FileBackend` | `StorageError::Io` |
//! | Unreadable file contents | `FileBackend` | `StorageError::Corrupt` |

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Direction of a failed codec conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecErrorKind {
    /// Raw string could not be turned into a value.
    Parse,
    /// Value could not be turned into a raw string.
    Serialize,
}

/// Error from a [`Codec`](crate::codec::Codec) conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecError {
    kind: CodecErrorKind,
    message: String,
}

impl CodecError {
    /// A raw value could not be parsed.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: CodecErrorKind::Parse,
            message: message.into(),
        }
    }

    /// A value could not be serialized.
    #[must_use]
    pub fn serialize(message: impl Into<String>) -> Self {
        Self {
            kind: CodecErrorKind::Serialize,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> CodecErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CodecErrorKind::Parse => write!(f, "parse error: {}", self.message),
            CodecErrorKind::Serialize => write!(f, "serialize error: {}", self.message),
        }
    }
}

impl std::error::Error for CodecError {}

/// Errors from storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// The backend refused access (e.g. storage disabled).
    Unavailable(String),
    /// Writing `key` would exceed the backend's byte quota.
    QuotaExceeded { key: String, limit: usize },
    /// Underlying file I/O failed.
    Io(io::Error),
    /// A persisted file exists but does not hold a valid entry map.
    Corrupt { path: PathBuf, message: String },
    /// Converting the value stored under `key` failed.
    Codec { key: String, source: CodecError },
}

impl StorageError {
    /// Attach the key a codec failure happened on.
    #[must_use]
    pub fn codec(key: impl Into<String>, source: CodecError) -> Self {
        Self::Codec {
            key: key.into(),
            source,
        }
    }

    /// Whether this error came from parsing a raw value.
    #[must_use]
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Codec { source, .. } if source.kind() == CodecErrorKind::Parse)
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(reason) => write!(f, "storage unavailable: {reason}"),
            Self::QuotaExceeded { key, limit } => {
                write!(f, "quota of {limit} bytes exceeded writing '{key}'")
            }
            Self::Io(err) => write!(f, "storage i/o error: {err}"),
            Self::Corrupt { path, message } => {
                write!(f, "corrupt storage file {}: {message}", path.display())
            }
            Self::Codec { key, source } => write!(f, "key '{key}': {source}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Codec { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}
