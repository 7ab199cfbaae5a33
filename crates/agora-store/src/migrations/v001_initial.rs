//! v001 -- Initial schema creation.
//!
//! Creates the identity and message tables: `users`, `achievements`,
//! `messages` and `reactions`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id                TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    username          TEXT UNIQUE,                 -- registered accounts only
    display_name      TEXT NOT NULL,
    credential_hash   TEXT,                        -- Argon2 PHC string
    role              TEXT NOT NULL,               -- guest | user | admin
    reputation_points INTEGER NOT NULL DEFAULT 0 CHECK (reputation_points >= 0),
    messages_sent     INTEGER NOT NULL DEFAULT 0,
    blocked           INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    email             TEXT UNIQUE,
    phone             TEXT UNIQUE,
    network_identity  TEXT,
    first_seen        TEXT NOT NULL,               -- RFC-3339, fixed width
    last_seen         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_display_name ON users(display_name, role);
CREATE INDEX IF NOT EXISTS idx_users_network_identity ON users(network_identity, last_seen);

-- ----------------------------------------------------------------
-- Achievements (set per user)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS achievements (
    user_id     TEXT NOT NULL,
    achievement TEXT NOT NULL,
    unlocked_at TEXT NOT NULL,

    PRIMARY KEY (user_id, achievement),
    FOREIGN KEY (user_id) REFERENCES users(id)
);

-- ----------------------------------------------------------------
-- Messages (append-only log, ordered by created_at then seq)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq                     INTEGER PRIMARY KEY AUTOINCREMENT,
    id                      TEXT NOT NULL UNIQUE,  -- UUID v4
    author_id               TEXT,                  -- NULL for system messages
    author_display_name     TEXT NOT NULL,
    body                    TEXT NOT NULL,
    kind                    TEXT NOT NULL,         -- user | system | admin | file | voice
    created_at              TEXT NOT NULL,
    reply_to_id             TEXT,
    attachment_name         TEXT,
    attachment_mime         TEXT,
    attachment_data         BLOB,                  -- opaque payload
    edited                  INTEGER NOT NULL DEFAULT 0,
    author_network_identity TEXT,

    FOREIGN KEY (author_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_order ON messages(created_at, seq);
CREATE INDEX IF NOT EXISTS idx_messages_author ON messages(author_id);

-- ----------------------------------------------------------------
-- Reactions (at most one per message, user and emoji)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS reactions (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    emoji      TEXT NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id, emoji),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
