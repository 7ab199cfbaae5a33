//! Network identities barred from the service.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use agora_shared::types::{NetworkIdentity, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::BlockEntry;
use crate::rows::{non_negative, parse_ts, parse_uuid, ts};

impl Database {
    /// Block `identity`. Blocking an identity that is already listed
    /// replaces its reason, actor and timestamp.
    pub fn block_identity(
        &self,
        identity: &NetworkIdentity,
        reason: &str,
        blocked_by: UserId,
    ) -> Result<BlockEntry> {
        let now = Utc::now();
        self.conn().execute(
            "INSERT INTO block_list (network_identity, reason, blocked_at, blocked_by)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(network_identity) DO UPDATE SET
                 reason = excluded.reason,
                 blocked_at = excluded.blocked_at,
                 blocked_by = excluded.blocked_by",
            params![identity.as_str(), reason, ts(&now), blocked_by.to_string()],
        )?;

        tracing::info!(identity = %identity, "identity blocked");
        Ok(BlockEntry {
            network_identity: identity.clone(),
            reason: reason.to_string(),
            blocked_at: now,
            blocked_by,
        })
    }

    /// Remove a block. Returns `false` when the identity was not listed.
    pub fn unblock_identity(&self, identity: &NetworkIdentity) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM block_list WHERE network_identity = ?1",
            params![identity.as_str()],
        )?;
        if affected > 0 {
            tracing::info!(identity = %identity, "identity unblocked");
        }
        Ok(affected > 0)
    }

    pub fn is_blocked(&self, identity: &NetworkIdentity) -> Result<bool> {
        Ok(self.get_block(identity)?.is_some())
    }

    pub fn get_block(&self, identity: &NetworkIdentity) -> Result<Option<BlockEntry>> {
        let entry = self
            .conn()
            .query_row(
                "SELECT network_identity, reason, blocked_at, blocked_by
                 FROM block_list WHERE network_identity = ?1",
                params![identity.as_str()],
                row_to_block,
            )
            .optional()?;
        Ok(entry)
    }

    /// All blocks, newest first.
    pub fn list_blocks(&self) -> Result<Vec<BlockEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT network_identity, reason, blocked_at, blocked_by
             FROM block_list ORDER BY blocked_at DESC",
        )?;
        let rows = stmt.query_map([], row_to_block)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn count_blocks(&self) -> Result<u64> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM block_list", [], |row| row.get(0))?;
        Ok(non_negative(n))
    }
}

fn row_to_block(row: &rusqlite::Row<'_>) -> rusqlite::Result<BlockEntry> {
    let identity: String = row.get(0)?;
    let blocked_at: String = row.get(2)?;
    let blocked_by: String = row.get(3)?;

    Ok(BlockEntry {
        network_identity: NetworkIdentity(identity),
        reason: row.get(1)?,
        blocked_at: parse_ts(2, &blocked_at)?,
        blocked_by: UserId(parse_uuid(3, &blocked_by)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_and_unblock() {
        let db = Database::open_in_memory().unwrap();
        let ip = NetworkIdentity::new("203.0.113.7");
        let admin = UserId::new();

        assert!(!db.is_blocked(&ip).unwrap());
        db.block_identity(&ip, "spam", admin).unwrap();
        assert!(db.is_blocked(&ip).unwrap());
        assert_eq!(db.count_blocks().unwrap(), 1);

        assert!(db.unblock_identity(&ip).unwrap());
        assert!(!db.is_blocked(&ip).unwrap());
        assert!(!db.unblock_identity(&ip).unwrap());
    }

    #[test]
    fn test_reblock_replaces_entry() {
        let db = Database::open_in_memory().unwrap();
        let ip = NetworkIdentity::new("203.0.113.8");
        let admin = UserId::new();

        db.block_identity(&ip, "first", admin).unwrap();
        db.block_identity(&ip, "second", admin).unwrap();

        let blocks = db.list_blocks().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].reason, "second");
        assert_eq!(db.get_block(&ip).unwrap().unwrap().blocked_by, admin);
    }
}
