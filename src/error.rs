//! Error types for kvgate

use crate::protocol::{Status, StatusCode};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for kvgate operations
pub type Result<T> = std::result::Result<T, KvError>;

/// Errors raised by the store, the RPC layer and the gateway
#[derive(Error, Debug)]
pub enum KvError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol parse error: {0}")]
    Protocol(String),

    #[error("Frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Connection closed by server")]
    ConnectionClosed,

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Server error: {0}")]
    Server(String),
}

impl KvError {
    /// Status code reported on the wire for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            KvError::Protocol(_) | KvError::FrameTooLarge { .. } | KvError::InvalidRequest(_) => {
                StatusCode::InvalidArgument
            }
            KvError::NotFound(_) => StatusCode::NotFound,
            KvError::Io(_)
            | KvError::Unavailable(_)
            | KvError::ConnectionClosed
            | KvError::Timeout(_) => StatusCode::Unavailable,
            KvError::Internal(_) | KvError::Server(_) => StatusCode::Internal,
        }
    }

    /// Whether the connection can keep serving frames after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            KvError::Io(_) | KvError::ConnectionClosed | KvError::FrameTooLarge { .. }
        )
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for KvError {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        let detail = match err {
            nom::Err::Incomplete(_) => "incomplete frame".to_string(),
            nom::Err::Error(e) | nom::Err::Failure(e) => format!(
                "{:?} at {:?}",
                e.code,
                String::from_utf8_lossy(&e.input[..e.input.len().min(32)])
            ),
        };
        KvError::Protocol(detail)
    }
}

impl From<Status> for KvError {
    fn from(status: Status) -> Self {
        match status.code {
            StatusCode::InvalidArgument => KvError::InvalidRequest(status.message),
            StatusCode::NotFound => KvError::NotFound(status.message),
            StatusCode::Unavailable => KvError::Unavailable(status.message),
            StatusCode::Internal => KvError::Internal(status.message),
        }
    }
}

impl From<&KvError> for Status {
    fn from(err: &KvError) -> Self {
        Status::new(err.status_code(), err.to_string())
    }
}
