use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error codes carried in `{success: false, error}` bodies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation
    EmptyMessage,
    MessageTooLong,
    EmptyName,
    NameTooLong,
    InvalidUsername,
    WeakPassword,
    InvalidEmoji,
    AttachmentTooLarge,
    AttachmentRequired,
    ReplyTargetNotFound,
    InvalidRequest,

    // Admin authentication outcomes
    AdminPasswordRequired,
    InvalidAdminPassword,

    // Session / privilege
    Unauthenticated,
    InvalidCredentials,
    Forbidden,
    AccessDenied,

    // Lookups and conflicts
    NotFound,
    DuplicateIdentity,

    // Infrastructure
    UpstreamUnavailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::EmptyMessage => "EMPTY_MESSAGE",
            ErrorCode::MessageTooLong => "MESSAGE_TOO_LONG",
            ErrorCode::EmptyName => "EMPTY_NAME",
            ErrorCode::NameTooLong => "NAME_TOO_LONG",
            ErrorCode::InvalidUsername => "INVALID_USERNAME",
            ErrorCode::WeakPassword => "WEAK_PASSWORD",
            ErrorCode::InvalidEmoji => "INVALID_EMOJI",
            ErrorCode::AttachmentTooLarge => "ATTACHMENT_TOO_LARGE",
            ErrorCode::AttachmentRequired => "ATTACHMENT_REQUIRED",
            ErrorCode::ReplyTargetNotFound => "REPLY_TARGET_NOT_FOUND",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::AdminPasswordRequired => "ADMIN_PASSWORD_REQUIRED",
            ErrorCode::InvalidAdminPassword => "INVALID_ADMIN_PASSWORD",
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::InvalidCredentials => "INVALID_CREDENTIALS",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::AccessDenied => "ACCESS_DENIED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::DuplicateIdentity => "DUPLICATE_IDENTITY",
            ErrorCode::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-correctable input problems, detected before any state is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Message too long: {len} characters (max {max})")]
    MessageTooLong { len: usize, max: usize },

    #[error("Name is empty")]
    EmptyName,

    #[error("Name too long: {len} characters (max {max})")]
    NameTooLong { len: usize, max: usize },

    #[error("Invalid username")]
    InvalidUsername,

    #[error("Password does not meet length requirements")]
    WeakPassword,

    #[error("Invalid reaction emoji")]
    InvalidEmoji,

    #[error("Attachment too large: {size} bytes (max {max})")]
    AttachmentTooLarge { size: usize, max: usize },

    #[error("Attachment required for this message type")]
    AttachmentRequired,

    #[error("Reply target does not exist")]
    ReplyTargetNotFound,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ValidationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ValidationError::EmptyMessage => ErrorCode::EmptyMessage,
            ValidationError::MessageTooLong { .. } => ErrorCode::MessageTooLong,
            ValidationError::EmptyName => ErrorCode::EmptyName,
            ValidationError::NameTooLong { .. } => ErrorCode::NameTooLong,
            ValidationError::InvalidUsername => ErrorCode::InvalidUsername,
            ValidationError::WeakPassword => ErrorCode::WeakPassword,
            ValidationError::InvalidEmoji => ErrorCode::InvalidEmoji,
            ValidationError::AttachmentTooLarge { .. } => ErrorCode::AttachmentTooLarge,
            ValidationError::AttachmentRequired => ErrorCode::AttachmentRequired,
            ValidationError::ReplyTargetNotFound => ErrorCode::ReplyTargetNotFound,
            ValidationError::InvalidRequest(_) => ErrorCode::InvalidRequest,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Malformed session token")]
    Malformed,

    #[error("Session signature invalid")]
    BadSignature,

    #[error("Session expired")]
    Expired,
}
