//! The shared message log.
//!
//! Order is `created_at` ascending with the insertion sequence as the tie
//! breaker; every read path honours it.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use agora_shared::error::ValidationError;
use agora_shared::types::{MessageId, NetworkIdentity, UserId};
use agora_shared::validation::validate_body;

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{Attachment, Message, MessageLimits, MessagePage, NewMessage};
use crate::rows::{non_negative, parse_enum, parse_ts, parse_uuid, ts};

const MESSAGE_COLUMNS: &str = "seq, id, author_id, author_display_name, body, kind, created_at,
     reply_to_id, attachment_name, attachment_mime, attachment_data, edited,
     author_network_identity";

impl Database {
    /// Validate and append a message. The id, timestamp and sequence are
    /// assigned here; a rejected append leaves the log untouched.
    pub fn append_message(&self, new: &NewMessage, limits: MessageLimits) -> Result<Message> {
        self.atomically(|db| {
            check_payload(new, limits)?;

            if let Some(author) = new.author_id {
                if db.author_is_blocked(author, new.author_network_identity.as_ref())? {
                    return Err(StoreError::BlockedAuthor);
                }
            }

            if let Some(target) = new.reply_to_id {
                if !db.message_exists(target)? {
                    return Err(ValidationError::ReplyTargetNotFound.into());
                }
            }

            let id = MessageId::new();
            let now = Utc::now();
            let attachment = new.attachment.as_ref();
            db.conn().execute(
                "INSERT INTO messages (id, author_id, author_display_name, body, kind, created_at,
                                       reply_to_id, attachment_name, attachment_mime,
                                       attachment_data, author_network_identity)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    id.to_string(),
                    new.author_id.map(|a| a.to_string()),
                    new.author_display_name,
                    new.body,
                    new.kind.as_str(),
                    ts(&now),
                    new.reply_to_id.map(|r| r.to_string()),
                    attachment.map(|a| a.file_name.as_str()),
                    attachment.map(|a| a.mime_type.as_str()),
                    attachment.map(|a| a.data.as_slice()),
                    new.author_network_identity.as_ref().map(|n| n.as_str()),
                ],
            )?;

            tracing::debug!(message = %id, kind = new.kind.as_str(), "message appended");
            db.get_message(id)
        })
    }

    fn author_is_blocked(
        &self,
        author: UserId,
        identity: Option<&NetworkIdentity>,
    ) -> Result<bool> {
        let flagged: Option<bool> = self
            .conn()
            .query_row(
                "SELECT blocked FROM users WHERE id = ?1",
                params![author.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if flagged == Some(true) {
            return Ok(true);
        }
        match identity {
            Some(identity) => self.is_blocked(identity),
            None => Ok(false),
        }
    }

    fn message_exists(&self, id: MessageId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM messages WHERE id = ?1",
                params![id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        let mut message = self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found)?;
        message.reactions = self.reaction_counts(id)?;
        Ok(message)
    }

    /// Full snapshot of the log in canonical order.
    pub fn list_messages(&self) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages ORDER BY created_at ASC, seq ASC"
        ))?;
        let rows = stmt.query_map([], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        self.attach_reactions(&mut messages)?;
        Ok(messages)
    }

    /// One page counted from the newest end: page 1 holds the latest
    /// `limit` messages. Each page is returned in canonical order.
    pub fn list_messages_page(&self, page: u32, limit: u32) -> Result<MessagePage> {
        let page = page.max(1);
        let limit = limit.max(1);
        let offset = u64::from(page - 1) * u64::from(limit);

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             ORDER BY created_at DESC, seq DESC
             LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt.query_map(
            params![i64::from(limit), i64::try_from(offset).unwrap_or(i64::MAX)],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        messages.reverse();
        self.attach_reactions(&mut messages)?;

        Ok(MessagePage {
            messages,
            total: self.count_messages()?,
        })
    }

    pub fn latest_message(&self) -> Result<Option<Message>> {
        let message = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     ORDER BY created_at DESC, seq DESC LIMIT 1"
                ),
                [],
                row_to_message,
            )
            .optional()?;
        match message {
            Some(mut message) => {
                message.reactions = self.reaction_counts(message.id)?;
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    pub fn count_messages(&self) -> Result<u64> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(non_negative(n))
    }

    /// Replace a message body and mark it edited. Blank and over-long
    /// bodies are rejected exactly as on append.
    pub fn edit_message(
        &self,
        id: MessageId,
        body: &str,
        limits: MessageLimits,
    ) -> Result<Message> {
        self.atomically(|db| {
            let existing = db.get_message(id)?;
            validate_body(body, limits.max_body_chars, existing.attachment.is_some())?;

            db.conn().execute(
                "UPDATE messages SET body = ?1, edited = 1 WHERE id = ?2",
                params![body, id.to_string()],
            )?;
            db.get_message(id)
        })
    }

    /// Remove one message and return it as it was. Reactions go with it.
    pub fn delete_message(&self, id: MessageId) -> Result<Message> {
        self.atomically(|db| {
            let message = db.get_message(id)?;
            db.conn()
                .execute("DELETE FROM messages WHERE id = ?1", params![id.to_string()])?;
            Ok(message)
        })
    }

    /// Empty the log; returns how many messages were removed.
    pub fn delete_all_messages(&self) -> Result<u64> {
        let removed = self.conn().execute("DELETE FROM messages", [])?;
        Ok(removed as u64)
    }

    fn attach_reactions(&self, messages: &mut [Message]) -> Result<()> {
        for message in messages.iter_mut() {
            message.reactions = self.reaction_counts(message.id)?;
        }
        Ok(())
    }
}

fn check_payload(new: &NewMessage, limits: MessageLimits) -> Result<()> {
    if new.kind.carries_attachment() && new.attachment.is_none() {
        return Err(ValidationError::AttachmentRequired.into());
    }
    if let Some(attachment) = &new.attachment {
        if attachment.data.len() > limits.max_attachment_bytes {
            return Err(ValidationError::AttachmentTooLarge {
                size: attachment.data.len(),
                max: limits.max_attachment_bytes,
            }
            .into());
        }
    }
    validate_body(&new.body, limits.max_body_chars, new.attachment.is_some())?;
    Ok(())
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(1)?;
    let author_str: Option<String> = row.get(2)?;
    let kind_str: String = row.get(5)?;
    let created_str: String = row.get(6)?;
    let reply_str: Option<String> = row.get(7)?;
    let attachment_name: Option<String> = row.get(8)?;
    let attachment_mime: Option<String> = row.get(9)?;
    let attachment_data: Option<Vec<u8>> = row.get(10)?;
    let identity: Option<String> = row.get(12)?;

    let attachment = match (attachment_name, attachment_mime, attachment_data) {
        (Some(file_name), Some(mime_type), Some(data)) => Some(Attachment {
            file_name,
            mime_type,
            data,
        }),
        _ => None,
    };

    Ok(Message {
        seq: row.get(0)?,
        id: MessageId(parse_uuid(1, &id_str)?),
        author_id: author_str
            .map(|s| parse_uuid(2, &s).map(UserId))
            .transpose()?,
        author_display_name: row.get(3)?,
        body: row.get(4)?,
        kind: parse_enum(5, &kind_str)?,
        created_at: parse_ts(6, &created_str)?,
        reply_to_id: reply_str
            .map(|s| parse_uuid(7, &s).map(MessageId))
            .transpose()?,
        attachment,
        reactions: Default::default(),
        edited: row.get(11)?,
        author_network_identity: identity.map(NetworkIdentity),
    })
}
