use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-identifying address used by the block list (an IP address in
/// practice), independent of the display name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct NetworkIdentity(pub String);

impl NetworkIdentity {
    pub const UNKNOWN: &'static str = "unknown";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_string())
    }

    /// Canonical text of `ip`: an IPv4-mapped IPv6 address is keyed as the
    /// plain IPv4 address, so both forms hit the same block entry.
    pub fn from_ip(ip: IpAddr) -> Self {
        Self(ip.to_canonical().to_string())
    }

    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN || self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error returned when a stored enum column holds an unexpected value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guest" => Ok(Role::Guest),
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownVariant {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

/// Message variant. Plain text travels as `"user"` on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[serde(rename = "user", alias = "text")]
    Text,
    System,
    Admin,
    File,
    Voice,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "user",
            MessageKind::System => "system",
            MessageKind::Admin => "admin",
            MessageKind::File => "file",
            MessageKind::Voice => "voice",
        }
    }

    /// Kinds that carry an opaque attachment payload.
    pub fn carries_attachment(&self) -> bool {
        matches!(self, MessageKind::File | MessageKind::Voice)
    }
}

impl FromStr for MessageKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" | "text" => Ok(MessageKind::Text),
            "system" => Ok(MessageKind::System),
            "admin" => Ok(MessageKind::Admin),
            "file" => Ok(MessageKind::File),
            "voice" => Ok(MessageKind::Voice),
            other => Err(UnknownVariant {
                kind: "message kind",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Achievement {
    FirstMessage,
    Chatterbox,
    Centurion,
    FileSharer,
}

impl Achievement {
    pub const ALL: [Achievement; 4] = [
        Achievement::FirstMessage,
        Achievement::Chatterbox,
        Achievement::Centurion,
        Achievement::FileSharer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Achievement::FirstMessage => "first_message",
            Achievement::Chatterbox => "chatterbox",
            Achievement::Centurion => "centurion",
            Achievement::FileSharer => "file_sharer",
        }
    }
}

impl FromStr for Achievement {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Achievement::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "achievement",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Block,
    BlockUser,
    Unblock,
    DeleteMessage,
    ClearMessages,
    AdminLogin,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Block => "BLOCK",
            AuditAction::BlockUser => "BLOCK_USER",
            AuditAction::Unblock => "UNBLOCK",
            AuditAction::DeleteMessage => "DELETE_MESSAGE",
            AuditAction::ClearMessages => "CLEAR_MESSAGES",
            AuditAction::AdminLogin => "ADMIN_LOGIN",
        }
    }
}

impl FromStr for AuditAction {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BLOCK" => Ok(AuditAction::Block),
            "BLOCK_USER" => Ok(AuditAction::BlockUser),
            "UNBLOCK" => Ok(AuditAction::Unblock),
            "DELETE_MESSAGE" => Ok(AuditAction::DeleteMessage),
            "CLEAR_MESSAGES" => Ok(AuditAction::ClearMessages),
            "ADMIN_LOGIN" => Ok(AuditAction::AdminLogin),
            other => Err(UnknownVariant {
                kind: "audit action",
                value: other.to_string(),
            }),
        }
    }
}
