//! Error types for the acidstore read path.

use std::io;
use std::path::PathBuf;

/// The result type used throughout acidstore.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for acidstore operations.
///
/// Every variant is fatal to the operation that raised it. Nothing in the
/// read path is retried or masked internally.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error occurred outside of an open merge source.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A directory or file name under a partition could not be parsed.
    #[error("Malformed layout at {path:?}: {reason}")]
    MalformedLayout {
        /// The offending path.
        path: PathBuf,
        /// Why the name was rejected.
        reason: String,
    },

    /// The partition cannot serve the requested snapshot.
    #[error(
        "Not enough history available for (hwm={high_watermark}, minOpen={min_open:?}); \
         oldest available base: {oldest_base:?}"
    )]
    SnapshotUnsatisfiable {
        /// High watermark of the requested write id snapshot.
        high_watermark: u64,
        /// Lowest open write id in the snapshot, if any.
        min_open: Option<u64>,
        /// The oldest base directory found in the partition.
        oldest_base: PathBuf,
    },

    /// An I/O error on an open merge source.
    #[error("IO error reading source {path:?}: {source}")]
    SourceIo {
        /// The source file being read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Serialized metadata could not be decoded.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Event data is corrupt or violates the layout ordering.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// A checksum mismatch was detected.
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// The expected checksum value.
        expected: u32,
        /// The actual checksum value.
        actual: u32,
    },

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An object was used in a state that does not allow the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Creates a new malformed layout error.
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::MalformedLayout { path: path.into(), reason: reason.into() }
    }

    /// Creates a new source I/O error.
    pub fn source_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::SourceIo { path: path.into(), source }
    }

    /// Creates a new encoding error.
    pub fn encoding(msg: impl Into<String>) -> Self {
        Error::Encoding(msg.into())
    }

    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}
