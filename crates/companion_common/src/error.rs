//! Error types for the stats companion.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompanionError {
    #[error("Caller lacks the stats companion permission (uid {0})")]
    PermissionDenied(u32),

    #[error("Unknown pull tag {0}")]
    UnknownTag(i32),

    #[error("Stats daemon unavailable: {0}")]
    DaemonUnavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CompanionError {
    pub fn code(&self) -> i32 {
        match self {
            CompanionError::PermissionDenied(_) => -32010,
            CompanionError::UnknownTag(_) => -32011,
            CompanionError::DaemonUnavailable(_) => -32000,
            CompanionError::InvalidRequest(_) => -32600,
            CompanionError::Io(_) => -32006,
            CompanionError::Json(_) => -32700,
            CompanionError::Internal(_) => -32603,
        }
    }
}
