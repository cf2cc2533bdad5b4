//! Error taxonomy shared by every module of the EWF engine.
//!
//! The teacher's individual format readers (`raw.rs`, `vmdk.rs`, `ewf.rs`'s
//! previous incarnation) return `Result<T, String>`; the storage engine needs
//! a richer, matchable taxonomy (spec §7) so callers can tell a structural
//! parse failure from a recorded-but-recoverable checksum mismatch.

use std::fmt;

/// Which kind of checksum/hash comparison failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityKind {
    DescriptorChecksum,
    TableChecksum,
    ChunkChecksum,
    OverallDigest,
}

impl fmt::Display for IntegrityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntegrityKind::DescriptorChecksum => "descriptor checksum",
            IntegrityKind::TableChecksum => "table checksum",
            IntegrityKind::ChunkChecksum => "chunk checksum",
            IntegrityKind::OverallDigest => "overall digest",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EwfError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported value: {0}")]
    UnsupportedValue(String),

    #[error("handle not initialized")]
    NotInitialized,

    #[error("handle already initialized")]
    AlreadyInitialized,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("{kind} mismatch: {detail}")]
    Integrity {
        kind: IntegrityKind,
        detail: String,
    },

    #[error("chunk {chunk_index} is corrupted")]
    Corrupted { chunk_index: u64 },

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("operation aborted")]
    Aborted,

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),
}

impl EwfError {
    pub fn integrity(kind: IntegrityKind, detail: impl Into<String>) -> Self {
        EwfError::Integrity {
            kind,
            detail: detail.into(),
        }
    }
}

/// Lets `Handle`'s `Read`/`Seek` impls propagate engine errors through the
/// `io::Result` surface those traits require.
impl From<EwfError> for std::io::Error {
    fn from(err: EwfError) -> Self {
        match err {
            EwfError::Io(io_err) => io_err,
            other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, EwfError>;
