use serde::Serialize;
use std::fmt;

use crate::registry::Handle;

/// Failure classes surfaced across the script/host boundary. The string form
/// doubles as the JavaScript error class name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    InvalidHandle,
    NotFound,
    ProtocolViolation,
    OperationFailed,
    InvalidArgument,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::InvalidHandle,
        ErrorKind::NotFound,
        ErrorKind::ProtocolViolation,
        ErrorKind::OperationFailed,
        ErrorKind::InvalidArgument,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidHandle => "InvalidHandle",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::ProtocolViolation => "ProtocolViolation",
            ErrorKind::OperationFailed => "OperationFailed",
            ErrorKind::InvalidArgument => "InvalidArgument",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("resource handle {0} is not live")]
    InvalidHandle(Handle),

    #[error("unknown op: {0}")]
    NotFound(String),

    #[error("{0}")]
    ProtocolViolation(String),

    /// Underlying operation failure; the message is passed through verbatim.
    #[error("{0}")]
    OperationFailed(String),

    #[error("{op}: {message}")]
    InvalidArgument { op: String, message: String },
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::InvalidHandle(_) => ErrorKind::InvalidHandle,
            BridgeError::NotFound(_) => ErrorKind::NotFound,
            BridgeError::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            BridgeError::OperationFailed(_) => ErrorKind::OperationFailed,
            BridgeError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
        }
    }

    pub fn invalid_argument(op: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::InvalidArgument {
            op: op.into(),
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for BridgeError {
    fn from(err: rusqlite::Error) -> Self {
        BridgeError::OperationFailed(err.to_string())
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
