//! Domain records persisted in the SQLite database.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agora_shared::types::{
    Achievement, AuditAction, MessageId, MessageKind, NetworkIdentity, Role, UserId,
};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A participant. Guests are created on first authentication, registered
/// users by `register`; nobody is ever hard-deleted (see `blocked`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    /// Login name, present for registered accounts and the admin record.
    pub username: Option<String>,
    pub display_name: String,
    /// Argon2 PHC string. Never serialized to clients.
    #[serde(skip_serializing)]
    pub credential_hash: Option<String>,
    pub role: Role,
    pub reputation_points: u64,
    /// Lifetime count of qualifying events; deletes do not lower it.
    pub messages_sent: u64,
    pub achievements: BTreeSet<Achievement>,
    pub blocked: bool,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Last network identity the user authenticated from.
    pub network_identity: Option<NetworkIdentity>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Fields supplied when creating a user; the store assigns the rest.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: Option<String>,
    pub display_name: String,
    pub credential_hash: Option<String>,
    pub role: Role,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub network_identity: Option<NetworkIdentity>,
}

impl NewUser {
    pub fn guest(display_name: impl Into<String>, network_identity: NetworkIdentity) -> Self {
        Self {
            username: None,
            display_name: display_name.into(),
            credential_hash: None,
            role: Role::Guest,
            email: None,
            phone: None,
            network_identity: Some(network_identity),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Opaque binary payload carried by file and voice messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// One entry of the message log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Insertion sequence; breaks ties between equal `created_at` values.
    pub seq: i64,
    pub id: MessageId,
    /// `None` for system messages.
    pub author_id: Option<UserId>,
    pub author_display_name: String,
    pub body: String,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    pub reply_to_id: Option<MessageId>,
    pub attachment: Option<Attachment>,
    /// Aggregate counts derived from individual reaction rows.
    pub reactions: BTreeMap<String, u64>,
    pub edited: bool,
    pub author_network_identity: Option<NetworkIdentity>,
}

/// Fields supplied by the caller of an append; id, timestamp and sequence
/// are always assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub author_id: Option<UserId>,
    pub author_display_name: String,
    pub body: String,
    pub kind: MessageKind,
    pub reply_to_id: Option<MessageId>,
    pub attachment: Option<Attachment>,
    pub author_network_identity: Option<NetworkIdentity>,
}

/// Limits applied by `append_message` and `edit_message`.
#[derive(Debug, Clone, Copy)]
pub struct MessageLimits {
    pub max_body_chars: usize,
    pub max_attachment_bytes: usize,
}

/// One page of the log plus the total it was cut from.
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub total: u64,
}

// ---------------------------------------------------------------------------
// Reaction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Moderation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockEntry {
    pub network_identity: NetworkIdentity,
    pub reason: String,
    pub blocked_at: DateTime<Utc>,
    pub blocked_by: UserId,
}

/// Accountability record. Rows are never updated or deleted (enforced by
/// triggers).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditEvent {
    pub id: i64,
    pub action: AuditAction,
    pub actor_id: UserId,
    pub subject_id: Option<String>,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Digest left behind when moderation removes a message from the log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tombstone {
    pub message_id: MessageId,
    pub author_id: Option<UserId>,
    pub author_display_name: String,
    pub body_digest: String,
    pub body_length: u64,
    pub created_at: DateTime<Utc>,
    pub deleted_at: DateTime<Utc>,
    pub deleted_by: UserId,
}
