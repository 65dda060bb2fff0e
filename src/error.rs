use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

use crate::remote::{RemoteError, RemoteErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidInput,
    NotFound,
    Transport,
    Decode,
    /// A caller used an operation in a state that does not allow it.
    Contract,
    Io,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerError {
    pub code: ErrorCode,
    pub message: String,
}

impl ViewerError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }
}

impl fmt::Display for ViewerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl Error for ViewerError {}

impl From<RemoteError> for ViewerError {
    fn from(err: RemoteError) -> Self {
        let code = match err.kind {
            RemoteErrorKind::Status(404) => ErrorCode::NotFound,
            RemoteErrorKind::Transport | RemoteErrorKind::Status(_) => ErrorCode::Transport,
            RemoteErrorKind::Decode => ErrorCode::Decode,
            RemoteErrorKind::Cancelled => ErrorCode::Internal,
        };
        Self {
            code,
            message: err.message,
        }
    }
}

impl From<std::io::Error> for ViewerError {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorCode::Io, err.to_string())
    }
}

impl From<serde_json::Error> for ViewerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorCode::Decode, err.to_string())
    }
}
