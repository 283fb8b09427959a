//! Error and Result types for siglog operations.
//!
//! Every public operation returns [`Result`]. Errors also map to stable
//! integer codes (0 = OK) for bindings that cannot carry a Rust enum across
//! the boundary; see [`error_code_name`] and [`error_code_description`].

use std::io;
use thiserror::Error;

/// A convenience `Result` type for siglog operations.
pub type Result<T> = std::result::Result<T, LogError>;

/// The error type for log file operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// A caller-supplied argument is out of range or inconsistent.
    #[error("Invalid parameter: {0}")]
    ParameterInvalid(String),

    /// A referenced source, signal, or chunk does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A source or signal with the same id was already defined.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A chunk header or payload checksum does not match.
    #[error("CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        /// Expected CRC32C checksum stored in the file.
        expected: u32,
        /// Actual CRC32C checksum computed over the bytes read.
        actual: u32,
    },

    /// The file ends before any complete chunk.
    #[error("File truncated")]
    Truncated,

    /// Unsupported log file format version.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// The operation cannot be served by this file (e.g. raw sample reads
    /// for a signal written with data omission enabled).
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The command ring is full and blocking was not permitted.
    #[error("Ring buffer overflow")]
    Overflow,

    /// The resource is in use by another operation.
    #[error("Busy")]
    Busy,

    /// The operation is not supported by this build.
    #[error("Not supported")]
    NotSupported,

    /// The writer thread aborted; the session is unusable.
    #[error("Writer aborted")]
    Abort,
}

/// Integer code for success.
pub const ERROR_CODE_OK: i32 = 0;

impl LogError {
    /// Returns the stable integer code for this error (never 0).
    pub fn code(&self) -> i32 {
        match self {
            LogError::ParameterInvalid(_) => 1,
            LogError::NotFound(_) => 2,
            LogError::AlreadyExists(_) => 3,
            LogError::Io(_) => 4,
            LogError::CrcMismatch { .. } => 5,
            LogError::Truncated => 6,
            LogError::UnsupportedVersion(_) => 7,
            LogError::Unsupported(_) => 8,
            LogError::Overflow => 9,
            LogError::Busy => 10,
            LogError::NotSupported => 11,
            LogError::Abort => 12,
        }
    }

    /// Clones the error for re-delivery on a different thread.
    ///
    /// `io::Error` is not `Clone`, so the I/O variant is rebuilt from its
    /// kind and message.
    pub(crate) fn duplicate(&self) -> LogError {
        match self {
            LogError::ParameterInvalid(s) => LogError::ParameterInvalid(s.clone()),
            LogError::NotFound(s) => LogError::NotFound(s.clone()),
            LogError::AlreadyExists(s) => LogError::AlreadyExists(s.clone()),
            LogError::Io(e) => LogError::Io(io::Error::new(e.kind(), e.to_string())),
            LogError::CrcMismatch { expected, actual } => LogError::CrcMismatch {
                expected: *expected,
                actual: *actual,
            },
            LogError::Truncated => LogError::Truncated,
            LogError::UnsupportedVersion(v) => LogError::UnsupportedVersion(*v),
            LogError::Unsupported(s) => LogError::Unsupported(s.clone()),
            LogError::Overflow => LogError::Overflow,
            LogError::Busy => LogError::Busy,
            LogError::NotSupported => LogError::NotSupported,
            LogError::Abort => LogError::Abort,
        }
    }
}

/// Returns the symbolic name for an error code.
pub fn error_code_name(code: i32) -> &'static str {
    match code {
        0 => "OK",
        1 => "PARAMETER_INVALID",
        2 => "NOT_FOUND",
        3 => "ALREADY_EXISTS",
        4 => "IO",
        5 => "CRC_MISMATCH",
        6 => "TRUNCATED",
        7 => "UNSUPPORTED_VERSION",
        8 => "UNSUPPORTED",
        9 => "OVERFLOW",
        10 => "BUSY",
        11 => "NOT_SUPPORTED",
        12 => "ABORT",
        _ => "UNKNOWN",
    }
}

/// Returns a human-readable description for an error code.
pub fn error_code_description(code: i32) -> &'static str {
    match code {
        0 => "Success",
        1 => "A parameter is out of range or inconsistent",
        2 => "The referenced entity does not exist",
        3 => "The entity was already defined",
        4 => "An operating system I/O operation failed",
        5 => "A stored checksum does not match the data",
        6 => "The file ends before any complete chunk",
        7 => "The file format version is not supported",
        8 => "The file cannot serve this operation",
        9 => "The command ring is full",
        10 => "The resource is busy",
        11 => "The operation is not supported",
        12 => "The writer thread aborted",
        _ => "Unknown error code",
    }
}
