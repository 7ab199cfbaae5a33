use thiserror::Error;

use agora_shared::error::{ErrorCode, ValidationError};

#[derive(Error, Debug)]
pub enum ClientError {
    /// The request never produced an HTTP response.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered `{success: false, error}`.
    #[error("Server rejected request ({status}): {code}")]
    Api { status: u16, code: ErrorCode },

    /// The health probe failed, so the service is blocked or down for
    /// this client. `status` is `None` when nothing answered at all.
    #[error("Service unavailable (status {status:?})")]
    Unavailable { status: Option<u16> },

    /// Rejected locally before anything was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl ClientError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Api { code, .. } => Some(*code),
            ClientError::Validation(v) => Some(v.code()),
            _ => None,
        }
    }

    /// The caller's network identity is on the block list.
    pub fn is_access_denied(&self) -> bool {
        self.code() == Some(ErrorCode::AccessDenied)
    }

    /// Failures worth retrying on the next poll.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport(_) | ClientError::Unavailable { .. } => true,
            ClientError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
