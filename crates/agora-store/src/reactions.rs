use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::params;

use agora_shared::types::{MessageId, UserId};
use agora_shared::validation::validate_emoji;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Reaction;
use crate::rows::{non_negative, parse_ts, parse_uuid, ts};

impl Database {
    /// Record that `user` reacted to `message` with `emoji`. Reacting twice
    /// with the same emoji is a no-op. Returns the updated counts.
    pub fn add_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
    ) -> Result<BTreeMap<String, u64>> {
        validate_emoji(emoji)?;

        self.atomically(|db| {
            let exists: i64 = db.conn().query_row(
                "SELECT COUNT(*) FROM messages WHERE id = ?1",
                params![message_id.to_string()],
                |row| row.get(0),
            )?;
            if exists == 0 {
                return Err(StoreError::NotFound);
            }

            db.conn().execute(
                "INSERT OR IGNORE INTO reactions (message_id, user_id, emoji, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    message_id.to_string(),
                    user_id.to_string(),
                    emoji,
                    ts(&Utc::now()),
                ],
            )?;

            db.reaction_counts(message_id)
        })
    }

    /// Aggregate emoji counts for one message.
    pub fn reaction_counts(&self, message_id: MessageId) -> Result<BTreeMap<String, u64>> {
        let mut stmt = self.conn().prepare_cached(
            "SELECT emoji, COUNT(*) FROM reactions WHERE message_id = ?1 GROUP BY emoji",
        )?;
        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            let emoji: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((emoji, non_negative(count)))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (emoji, count) = row?;
            counts.insert(emoji, count);
        }
        Ok(counts)
    }

    pub fn reactions_for(&self, message_id: MessageId) -> Result<Vec<Reaction>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, user_id, emoji, created_at
             FROM reactions WHERE message_id = ?1 ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            let msg_id_str: String = row.get(0)?;
            let user_id_str: String = row.get(1)?;
            let ts_str: String = row.get(3)?;
            Ok(Reaction {
                message_id: MessageId(parse_uuid(0, &msg_id_str)?),
                user_id: UserId(parse_uuid(1, &user_id_str)?),
                emoji: row.get(2)?,
                created_at: parse_ts(3, &ts_str)?,
            })
        })?;

        let mut reactions = Vec::new();
        for row in rows {
            reactions.push(row?);
        }
        Ok(reactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageLimits, NewMessage, NewUser};
    use agora_shared::error::ValidationError;
    use agora_shared::types::{MessageKind, NetworkIdentity};

    fn setup() -> (Database, UserId, UserId, MessageId) {
        let db = Database::open_in_memory().unwrap();
        let alice = db
            .insert_user(&NewUser::guest("Alice", NetworkIdentity::unknown()))
            .unwrap();
        let bob = db
            .insert_user(&NewUser::guest("Bob", NetworkIdentity::unknown()))
            .unwrap();
        let msg = db
            .append_message(
                &NewMessage {
                    author_id: Some(alice.id),
                    author_display_name: "Alice".into(),
                    body: "react to me".into(),
                    kind: MessageKind::Text,
                    reply_to_id: None,
                    attachment: None,
                    author_network_identity: None,
                },
                MessageLimits {
                    max_body_chars: 500,
                    max_attachment_bytes: 0,
                },
            )
            .unwrap();
        (db, alice.id, bob.id, msg.id)
    }

    #[test]
    fn test_counts_aggregate_per_emoji() {
        let (db, alice, bob, msg) = setup();
        db.add_reaction(msg, alice, "👍").unwrap();
        db.add_reaction(msg, bob, "👍").unwrap();
        let counts = db.add_reaction(msg, bob, "🎉").unwrap();

        assert_eq!(counts.get("👍"), Some(&2));
        assert_eq!(counts.get("🎉"), Some(&1));
        assert_eq!(db.get_message(msg).unwrap().reactions, counts);
        assert_eq!(db.reactions_for(msg).unwrap().len(), 3);
    }

    #[test]
    fn test_repeat_reaction_is_noop() {
        let (db, alice, _, msg) = setup();
        db.add_reaction(msg, alice, "👍").unwrap();
        let counts = db.add_reaction(msg, alice, "👍").unwrap();
        assert_eq!(counts.get("👍"), Some(&1));
    }

    #[test]
    fn test_reaction_on_missing_message() {
        let (db, alice, _, _) = setup();
        assert!(matches!(
            db.add_reaction(MessageId::new(), alice, "👍"),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_invalid_emoji() {
        let (db, alice, _, msg) = setup();
        assert!(matches!(
            db.add_reaction(msg, alice, " "),
            Err(StoreError::Validation(ValidationError::InvalidEmoji))
        ));
    }

    #[test]
    fn test_reactions_removed_with_message() {
        let (db, alice, _, msg) = setup();
        db.add_reaction(msg, alice, "👍").unwrap();
        db.delete_message(msg).unwrap();
        assert!(db.reaction_counts(msg).unwrap().is_empty());
    }
}
