//! # Error Types
//!
//! Purpose: a single error enum shared by the engine and server crates so
//! callers can match on failure kinds instead of parsing log strings.
//!
//! Most client-facing operations do not raise `TinyDbError` at all — they
//! return a sentinel (`null`, `-1`, …) per the wire protocol. This type is
//! for the paths that have no sentinel: snapshot I/O, startup, and auth.

use std::fmt;

/// Crate-wide result alias, mirroring the teacher crate's `HkvResult`.
pub type TinyDbResult<T> = Result<T, TinyDbError>;

#[derive(Debug, thiserror::Error)]
pub enum TinyDbError {
    #[error("key exceeds maximum size")]
    KeyTooLong,

    #[error("key not found")]
    NotFound,

    #[error("memory pool exhausted")]
    PoolExhausted,

    #[error("lock poisoned")]
    LockPoisoned,

    #[error("snapshot I/O error: {0}")]
    SnapshotIo(#[from] std::io::Error),

    #[error("snapshot format error: {0}")]
    SnapshotFormat(SnapshotFormatError),

    #[error("authentication failed")]
    AuthFailed,

    #[error("user already exists")]
    UserExists,

    #[error("cannot delete the default user")]
    CannotDeleteDefault,

    #[error("permission denied")]
    PermissionDenied,
}

/// Narrower reason for a malformed snapshot file, kept distinct from
/// `TinyDbError::SnapshotIo` so import failures can be reported precisely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormatError {
    SignatureMismatch,
    VersionMismatch,
    UnexpectedEof,
    InvalidEntryType(u32),
    LengthExceedsLimit(u32),
}

impl fmt::Display for SnapshotFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotFormatError::SignatureMismatch => write!(f, "signature mismatch"),
            SnapshotFormatError::VersionMismatch => write!(f, "version mismatch"),
            SnapshotFormatError::UnexpectedEof => write!(f, "declared length runs past end of file"),
            SnapshotFormatError::InvalidEntryType(tag) => write!(f, "unknown entry type tag {tag}"),
            SnapshotFormatError::LengthExceedsLimit(len) => {
                write!(f, "declared length {len} exceeds the maximum allowed field size")
            }
        }
    }
}

impl From<SnapshotFormatError> for TinyDbError {
    fn from(value: SnapshotFormatError) -> Self {
        TinyDbError::SnapshotFormat(value)
    }
}
