//! Error taxonomy (§7). Each subsystem owns a `thiserror` enum; [`LogPressError`]
//! aggregates them the way `EngineError` aggregates `StorageError`/`TraversalError`/…
//! in the storage engine this crate is patterned on.

use thiserror::Error;

/// Input-bound and resource-bound failures surfaced while ingesting raw lines.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error reading input: {0}")]
    Io(#[from] std::io::Error),

    #[error("out of memory while buffering input")]
    OutOfMemory,
}

/// Failures from template mining. The miner itself never fails on well-formed
/// token vectors; this exists for the invariant self-check in debug builds.
#[derive(Debug, Error)]
pub enum MineError {
    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),
}

/// Failures from column encoding/decoding (§4.4 invariants).
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("column value {value:?} is not valid for codec {codec}")]
    TypeMismatch { codec: &'static str, value: String },

    #[error("round-trip mismatch detected by self-test in codec {0}")]
    RoundTripMismatch(&'static str),

    #[error("entropy coder failed: {0}")]
    Entropy(String),
}

/// Reader-side failures (§7 format-bound; fatal to the operation, the handle
/// is invalidated).
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad magic: expected {expected:?}, found {found:?}")]
    BadMagic { expected: [u8; 4], found: [u8; 4] },

    #[error("unsupported major version {found}, reader supports up to {max_supported}")]
    UnsupportedVersion { found: u16, max_supported: u16 },

    #[error("crc mismatch: artifact is corrupt or was truncated")]
    CrcMismatch,

    #[error("truncated section {name}: expected {expected} bytes, found {found}")]
    TruncatedSection {
        name: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("(de)serialization error: {0}")]
    Codec(#[from] postcard::Error),

    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
}

/// Query-bound failures (§7 query-bound; recoverable, handle remains usable).
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("malformed predicate: {0}")]
    MalformedPredicate(String),

    #[error("column decode error: {0}")]
    Decode(#[from] ContainerError),
}

/// Top-level error surface returned by the public API (§6, §7).
#[derive(Debug, Error)]
pub enum LogPressError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Mine(#[from] MineError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("usage error: {0}")]
    Usage(String),
}

impl From<std::io::Error> for LogPressError {
    fn from(error: std::io::Error) -> Self {
        IngestError::from(error).into()
    }
}

impl LogPressError {
    /// Process exit code per §6 "Exit codes".
    pub fn exit_code(&self) -> i32 {
        match self {
            LogPressError::Usage(_) => 2,
            LogPressError::Ingest(IngestError::Io(_)) => 3,
            LogPressError::Container(ContainerError::Io(_)) => 3,
            LogPressError::Container(_) => 4,
            LogPressError::Query(_) => 4,
            LogPressError::Cancelled => 5,
            LogPressError::Ingest(_) | LogPressError::Mine(_) | LogPressError::Encode(_) => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, LogPressError>;
