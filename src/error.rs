//! Error taxonomy shared by the library.

use std::path::PathBuf;

/// Failures that abort a call. Engine-side trouble (non-zero exit, missing
/// or unreadable outputs) is never reported through this type.
#[derive(Debug, thiserror::Error)]
pub enum CambError {
    /// Malformed parameter document
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Parameter document could not be read
    #[error("reading parameter document {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Entry that would not survive being written as one `key = value` line
    #[error("invalid parameter '{}': {reason}", key.escape_debug())]
    InvalidParameter { key: String, reason: &'static str },

    #[error("can't take derivative of non-numerical parameter '{name}'={value}")]
    NonNumericParameter { name: String, value: String },

    #[error("parameter '{0}' is not set")]
    MissingParameter(String),

    #[error("epsilon must be finite and non-zero, got {0}")]
    InvalidEpsilon(f64),

    #[error("couldn't find CAMB executable '{}'", .0.display())]
    ExecutableNotFound(PathBuf),

    #[error("failed to launch engine: {0}")]
    Spawn(#[source] std::io::Error),

    /// Scratch file, log capture or named pipe setup failed
    #[error("scratch path {}: {source}", path.display())]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("protocol '{0}' is not supported on this platform")]
    UnsupportedProtocol(String),

    #[error("unknown protocol '{0}' (expected 'disk' or 'pipe')")]
    UnknownProtocol(String),
}

pub type Result<T, E = CambError> = std::result::Result<T, E>;
