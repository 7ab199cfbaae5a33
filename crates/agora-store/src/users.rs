//! Identity records: users, their reputation and achievement sets.

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use agora_shared::constants::RESERVED_ADMIN_NAME;
use agora_shared::types::{Achievement, NetworkIdentity, Role, UserId};

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{NewUser, User};
use crate::rows::{non_negative, parse_enum, parse_ts, parse_uuid, ts};

const USER_COLUMNS: &str = "id, username, display_name, credential_hash, role, reputation_points,
     messages_sent, blocked, email, phone, network_identity, first_seen, last_seen";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new user. Fails with [`StoreError::Duplicate`] naming the
    /// first unique field (username, email, phone) that is already taken.
    pub fn insert_user(&self, new: &NewUser) -> Result<User> {
        self.atomically(|db| {
            for (field, value) in [
                ("username", new.username.as_deref()),
                ("email", new.email.as_deref()),
                ("phone", new.phone.as_deref()),
            ] {
                if let Some(value) = value {
                    if db.unique_value_taken(field, value)? {
                        return Err(StoreError::Duplicate(field));
                    }
                }
            }

            let id = UserId::new();
            let now = Utc::now();
            db.conn().execute(
                "INSERT INTO users (id, username, display_name, credential_hash, role,
                                    email, phone, network_identity, first_seen, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    id.to_string(),
                    new.username,
                    new.display_name,
                    new.credential_hash,
                    new.role.as_str(),
                    new.email,
                    new.phone,
                    new.network_identity.as_ref().map(|n| n.as_str()),
                    ts(&now),
                ],
            )?;

            tracing::debug!(user = %id, role = new.role.as_str(), "user created");
            db.get_user(id)
        })
    }

    fn unique_value_taken(&self, field: &'static str, value: &str) -> Result<bool> {
        // `field` is one of three fixed column names, never user input.
        let sql = format!("SELECT 1 FROM users WHERE {field} = ?1 LIMIT 1");
        let found = self
            .conn()
            .query_row(&sql, params![value], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Return the single admin record, creating it on first use. The stored
    /// credential hash follows the configured one so that rotating the
    /// admin password takes effect without a data edit.
    pub fn ensure_admin_user(&self, credential_hash: &str) -> Result<User> {
        self.atomically(|db| {
            if let Some(admin) = db.find_user_by_username(RESERVED_ADMIN_NAME)? {
                if admin.credential_hash.as_deref() != Some(credential_hash) {
                    db.conn().execute(
                        "UPDATE users SET credential_hash = ?1 WHERE id = ?2",
                        params![credential_hash, admin.id.to_string()],
                    )?;
                }
                return db.get_user(admin.id);
            }

            db.insert_user(&NewUser {
                username: Some(RESERVED_ADMIN_NAME.to_string()),
                display_name: RESERVED_ADMIN_NAME.to_string(),
                credential_hash: Some(credential_hash.to_string()),
                role: Role::Admin,
                email: None,
                phone: None,
                network_identity: None,
            })
        })
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_user(&self, id: UserId) -> Result<User> {
        let mut user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found)?;
        user.achievements = self.achievements_for(id)?;
        Ok(user)
    }

    pub fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                row_to_user,
            )
            .optional()?;
        self.with_achievements(user)
    }

    /// Most recently seen guest record with this display name.
    pub fn find_guest_by_display_name(&self, display_name: &str) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users
                     WHERE role = 'guest' AND display_name = ?1
                     ORDER BY last_seen DESC LIMIT 1"
                ),
                params![display_name],
                row_to_user,
            )
            .optional()?;
        self.with_achievements(user)
    }

    /// Display name most recently used from `identity`, if any.
    pub fn last_display_name_for(&self, identity: &NetworkIdentity) -> Result<Option<String>> {
        if identity.is_unknown() {
            return Ok(None);
        }
        let name = self
            .conn()
            .query_row(
                "SELECT display_name FROM users
                 WHERE network_identity = ?1
                 ORDER BY last_seen DESC LIMIT 1",
                params![identity.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }

    pub fn achievements_for(&self, id: UserId) -> Result<BTreeSet<Achievement>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT achievement FROM achievements WHERE user_id = ?1")?;
        let rows = stmt.query_map(params![id.to_string()], |row| {
            let raw: String = row.get(0)?;
            parse_enum::<Achievement>(0, &raw)
        })?;

        let mut set = BTreeSet::new();
        for row in rows {
            set.insert(row?);
        }
        Ok(set)
    }

    pub fn count_users(&self) -> Result<u64> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(non_negative(n))
    }

    fn with_achievements(&self, user: Option<User>) -> Result<Option<User>> {
        match user {
            Some(mut user) => {
                user.achievements = self.achievements_for(user.id)?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Record an authenticated action: refresh `last_seen` and, when known,
    /// the network identity.
    pub fn touch_user(&self, id: UserId, identity: &NetworkIdentity) -> Result<()> {
        let now = ts(&Utc::now());
        let affected = if identity.is_unknown() {
            self.conn().execute(
                "UPDATE users SET last_seen = ?1 WHERE id = ?2",
                params![now, id.to_string()],
            )?
        } else {
            self.conn().execute(
                "UPDATE users SET last_seen = ?1, network_identity = ?2 WHERE id = ?3",
                params![now, identity.as_str(), id.to_string()],
            )?
        };
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn set_user_blocked(&self, id: UserId, blocked: bool) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET blocked = ?1 WHERE id = ?2",
            params![blocked, id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Lift the block flag from every user last seen at `identity`.
    pub fn clear_block_flag_for(&self, identity: &NetworkIdentity) -> Result<u64> {
        let affected = self.conn().execute(
            "UPDATE users SET blocked = 0 WHERE network_identity = ?1 AND blocked = 1",
            params![identity.as_str()],
        )?;
        Ok(affected as u64)
    }

    /// Count one qualifying event; returns the new lifetime total.
    pub fn record_activity(&self, id: UserId) -> Result<u64> {
        let affected = self.conn().execute(
            "UPDATE users SET messages_sent = messages_sent + 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        let total: i64 = self.conn().query_row(
            "SELECT messages_sent FROM users WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        Ok(non_negative(total))
    }

    /// Add reputation points in a single statement; returns the new total.
    pub fn add_points(&self, id: UserId, points: u64) -> Result<u64> {
        let points = i64::try_from(points).unwrap_or(i64::MAX);
        let affected = self.conn().execute(
            "UPDATE users SET reputation_points = reputation_points + ?1 WHERE id = ?2",
            params![points, id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        let total: i64 = self.conn().query_row(
            "SELECT reputation_points FROM users WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        Ok(non_negative(total))
    }

    /// Add `achievement` to the user's set. Returns `false` when it was
    /// already present, in which case nothing changes.
    pub fn unlock_achievement(&self, id: UserId, achievement: Achievement) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO achievements (user_id, achievement, unlocked_at)
             VALUES (?1, ?2, ?3)",
            params![id.to_string(), achievement.as_str(), ts(&Utc::now())],
        )?;
        Ok(inserted > 0)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let role_str: String = row.get(4)?;
    let points: i64 = row.get(5)?;
    let sent: i64 = row.get(6)?;
    let identity: Option<String> = row.get(10)?;
    let first_seen: String = row.get(11)?;
    let last_seen: String = row.get(12)?;

    Ok(User {
        id: UserId(parse_uuid(0, &id_str)?),
        username: row.get(1)?,
        display_name: row.get(2)?,
        credential_hash: row.get(3)?,
        role: parse_enum(4, &role_str)?,
        reputation_points: non_negative(points),
        messages_sent: non_negative(sent),
        achievements: BTreeSet::new(),
        blocked: row.get(7)?,
        email: row.get(8)?,
        phone: row.get(9)?,
        network_identity: identity.map(NetworkIdentity),
        first_seen: parse_ts(11, &first_seen)?,
        last_seen: parse_ts(12, &last_seen)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn registered(username: &str, email: Option<&str>) -> NewUser {
        NewUser {
            username: Some(username.to_string()),
            display_name: username.to_uppercase(),
            credential_hash: Some("$argon2id$stub".to_string()),
            role: Role::User,
            email: email.map(str::to_string),
            phone: None,
            network_identity: None,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let db = db();
        let user = db
            .insert_user(&NewUser::guest("Alice", NetworkIdentity::new("10.0.0.1")))
            .unwrap();

        let loaded = db.get_user(user.id).unwrap();
        assert_eq!(loaded.display_name, "Alice");
        assert_eq!(loaded.role, Role::Guest);
        assert_eq!(loaded.reputation_points, 0);
        assert!(!loaded.blocked);
        assert_eq!(loaded.network_identity, Some(NetworkIdentity::new("10.0.0.1")));
    }

    #[test]
    fn test_duplicate_username_and_email() {
        let db = db();
        db.insert_user(&registered("alice", Some("a@example.com"))).unwrap();

        let err = db.insert_user(&registered("alice", None)).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate("username")));

        let err = db
            .insert_user(&registered("alice2", Some("a@example.com")))
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate("email")));

        assert_eq!(db.count_users().unwrap(), 1);
    }

    #[test]
    fn test_get_missing_user() {
        let db = db();
        assert!(matches!(db.get_user(UserId::new()), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_unlock_achievement_once() {
        let db = db();
        let user = db
            .insert_user(&NewUser::guest("Bob", NetworkIdentity::unknown()))
            .unwrap();

        assert!(db.unlock_achievement(user.id, Achievement::Chatterbox).unwrap());
        assert!(!db.unlock_achievement(user.id, Achievement::Chatterbox).unwrap());

        let achievements = db.get_user(user.id).unwrap().achievements;
        assert_eq!(achievements.len(), 1);
        assert!(achievements.contains(&Achievement::Chatterbox));
    }

    #[test]
    fn test_points_and_activity_counters() {
        let db = db();
        let user = db
            .insert_user(&NewUser::guest("Carol", NetworkIdentity::unknown()))
            .unwrap();

        assert_eq!(db.record_activity(user.id).unwrap(), 1);
        assert_eq!(db.record_activity(user.id).unwrap(), 2);
        assert_eq!(db.add_points(user.id, 3).unwrap(), 3);
        assert_eq!(db.add_points(user.id, 2).unwrap(), 5);
    }

    #[test]
    fn test_last_display_name_for_identity() {
        let db = db();
        let ip = NetworkIdentity::new("192.168.1.20");
        let first = db.insert_user(&NewUser::guest("Dave", ip.clone())).unwrap();
        assert_eq!(db.last_display_name_for(&ip).unwrap().as_deref(), Some("Dave"));

        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = db.insert_user(&NewUser::guest("David", ip.clone())).unwrap();
        db.touch_user(second.id, &ip).unwrap();
        assert_eq!(db.last_display_name_for(&ip).unwrap().as_deref(), Some("David"));

        assert_ne!(first.id, second.id);
        assert!(db.last_display_name_for(&NetworkIdentity::unknown()).unwrap().is_none());
    }

    #[test]
    fn test_ensure_admin_user_is_stable() {
        let db = db();
        let first = db.ensure_admin_user("$argon2id$one").unwrap();
        let second = db.ensure_admin_user("$argon2id$two").unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.role, Role::Admin);
        assert_eq!(second.credential_hash.as_deref(), Some("$argon2id$two"));
    }

    #[test]
    fn test_block_flag() {
        let db = db();
        let user = db
            .insert_user(&NewUser::guest("Eve", NetworkIdentity::unknown()))
            .unwrap();
        db.set_user_blocked(user.id, true).unwrap();
        assert!(db.get_user(user.id).unwrap().blocked);
        assert!(matches!(
            db.set_user_blocked(UserId::new(), true),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_clear_block_flag_for_identity() {
        let db = db();
        let here = NetworkIdentity::new("10.0.0.4");
        let a = db.insert_user(&NewUser::guest("Ann", here.clone())).unwrap();
        let b = db
            .insert_user(&NewUser::guest("Ben", NetworkIdentity::new("10.0.0.5")))
            .unwrap();
        db.set_user_blocked(a.id, true).unwrap();
        db.set_user_blocked(b.id, true).unwrap();

        assert_eq!(db.clear_block_flag_for(&here).unwrap(), 1);
        assert!(!db.get_user(a.id).unwrap().blocked);
        assert!(db.get_user(b.id).unwrap().blocked);
        assert_eq!(db.clear_block_flag_for(&here).unwrap(), 0);
    }
}
