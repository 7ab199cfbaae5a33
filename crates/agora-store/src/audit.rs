//! Append-only audit trail and tombstones for moderated messages.

use chrono::Utc;
use rusqlite::params;

use agora_shared::types::{AuditAction, MessageId, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::{AuditEvent, Message, Tombstone};
use crate::rows::{non_negative, parse_enum, parse_ts, parse_uuid, ts};

impl Database {
    pub fn record_audit(
        &self,
        action: AuditAction,
        actor_id: UserId,
        subject_id: Option<&str>,
        detail: &str,
    ) -> Result<AuditEvent> {
        let now = Utc::now();
        self.conn().execute(
            "INSERT INTO audit_log (action, actor_id, subject_id, detail, at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![action.as_str(), actor_id.to_string(), subject_id, detail, ts(&now)],
        )?;

        tracing::info!(action = action.as_str(), actor = %actor_id, subject = ?subject_id, "audit");
        Ok(AuditEvent {
            id: self.conn().last_insert_rowid(),
            action,
            actor_id,
            subject_id: subject_id.map(str::to_string),
            detail: detail.to_string(),
            at: now,
        })
    }

    /// Most recent audit events first.
    pub fn list_audit(&self, limit: u32) -> Result<Vec<AuditEvent>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, action, actor_id, subject_id, detail, at
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![i64::from(limit)], |row| {
            let action: String = row.get(1)?;
            let actor: String = row.get(2)?;
            let at: String = row.get(5)?;
            Ok(AuditEvent {
                id: row.get(0)?,
                action: parse_enum(1, &action)?,
                actor_id: UserId(parse_uuid(2, &actor)?),
                subject_id: row.get(3)?,
                detail: row.get(4)?,
                at: parse_ts(5, &at)?,
            })
        })?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Keep a digest of a message that moderation removed. The body itself
    /// is not retained.
    pub fn insert_tombstone(&self, message: &Message, deleted_by: UserId) -> Result<Tombstone> {
        let tombstone = Tombstone {
            message_id: message.id,
            author_id: message.author_id,
            author_display_name: message.author_display_name.clone(),
            body_digest: blake3::hash(message.body.as_bytes()).to_hex().to_string(),
            body_length: message.body.chars().count() as u64,
            created_at: message.created_at,
            deleted_at: Utc::now(),
            deleted_by,
        };

        self.conn().execute(
            "INSERT OR REPLACE INTO message_tombstones
                 (message_id, author_id, author_display_name, body_digest, body_length,
                  created_at, deleted_at, deleted_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                tombstone.message_id.to_string(),
                tombstone.author_id.map(|a| a.to_string()),
                tombstone.author_display_name,
                tombstone.body_digest,
                i64::try_from(tombstone.body_length).unwrap_or(i64::MAX),
                ts(&tombstone.created_at),
                ts(&tombstone.deleted_at),
                tombstone.deleted_by.to_string(),
            ],
        )?;
        Ok(tombstone)
    }

    /// Most recently deleted first.
    pub fn list_tombstones(&self, limit: u32) -> Result<Vec<Tombstone>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, author_id, author_display_name, body_digest, body_length,
                    created_at, deleted_at, deleted_by
             FROM message_tombstones ORDER BY deleted_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![i64::from(limit)], |row| {
            let message_id: String = row.get(0)?;
            let author_id: Option<String> = row.get(1)?;
            let length: i64 = row.get(4)?;
            let created_at: String = row.get(5)?;
            let deleted_at: String = row.get(6)?;
            let deleted_by: String = row.get(7)?;
            Ok(Tombstone {
                message_id: MessageId(parse_uuid(0, &message_id)?),
                author_id: author_id.map(|s| parse_uuid(1, &s).map(UserId)).transpose()?,
                author_display_name: row.get(2)?,
                body_digest: row.get(3)?,
                body_length: non_negative(length),
                created_at: parse_ts(5, &created_at)?,
                deleted_at: parse_ts(6, &deleted_at)?,
                deleted_by: UserId(parse_uuid(7, &deleted_by)?),
            })
        })?;

        let mut tombstones = Vec::new();
        for row in rows {
            tombstones.push(row?);
        }
        Ok(tombstones)
    }
}
