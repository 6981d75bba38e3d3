//! Error types.

use thiserror::Error;

use crate::packet::{DecodeError, ErrorCode};

/// Everything that can end a transfer early.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("unexpected opcode: expected {expected}, got {got}")]
    UnexpectedOpcode {
        expected: &'static str,
        got: &'static str,
    },

    #[error("unexpected block number: expected {expected}, got {got}")]
    UnexpectedBlock { expected: u16, got: u16 },

    #[error("peer reported error {code:?}: {message}")]
    Peer { code: ErrorCode, message: String },

    #[error("no response for block {block} after {attempts} attempts")]
    TimeoutExhausted { block: u16, attempts: u32 },

    #[error("receive timed out")]
    RecvTimeout,

    #[error("data payload exceeds the 512-byte block size: {len} bytes")]
    OversizedPayload { len: usize },

    #[error("block counter would wrap: transfer exceeds 65535 blocks")]
    BlockOverflow,

    #[error("another transfer is in progress")]
    Busy,

    #[error("transfer cancelled")]
    Cancelled,

    #[error("file not found: {name}")]
    NotFound { name: String },

    #[error("file already exists: {name}")]
    FileExists { name: String },

    #[error("path escapes the root directory: {name}")]
    OutsideRoot { name: String },

    #[error("filename too long: {len} bytes (max {max})")]
    NameTooLong { len: usize, max: usize },
}

impl Error {
    /// Wire code used when this abort must be reported to the peer.
    pub fn wire_code(&self) -> ErrorCode {
        match self {
            Error::Io(e) if e.kind() == std::io::ErrorKind::WriteZero => ErrorCode::DiskFull,
            Error::Io(e) if e.kind() == std::io::ErrorKind::StorageFull => ErrorCode::DiskFull,
            Error::Io(_) => ErrorCode::Undefined,
            Error::UnexpectedBlock { .. } => ErrorCode::UnknownTransferId,
            Error::Decode(_) | Error::UnexpectedOpcode { .. } => ErrorCode::IllegalOperation,
            Error::BlockOverflow | Error::OversizedPayload { .. } => ErrorCode::IllegalOperation,
            Error::NotFound { .. } => ErrorCode::FileNotFound,
            Error::FileExists { .. } => ErrorCode::FileExists,
            Error::OutsideRoot { .. } | Error::NameTooLong { .. } => ErrorCode::AccessViolation,
            _ => ErrorCode::Undefined,
        }
    }
}

/// Result alias.
pub type Result<T> = std::result::Result<T, Error>;
