use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Block list keyed by network identity
CREATE TABLE IF NOT EXISTS block_list (
    network_identity TEXT PRIMARY KEY NOT NULL,
    reason           TEXT NOT NULL,
    blocked_at       TEXT NOT NULL,
    blocked_by       TEXT NOT NULL               -- admin user id
);

-- Append-only audit trail
CREATE TABLE IF NOT EXISTS audit_log (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    action     TEXT NOT NULL,
    actor_id   TEXT NOT NULL,
    subject_id TEXT,
    detail     TEXT NOT NULL,
    at         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_at ON audit_log(at);

CREATE TRIGGER IF NOT EXISTS audit_log_no_update
BEFORE UPDATE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit_log is append-only');
END;

CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
BEFORE DELETE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit_log is append-only');
END;

-- What remains of a moderated message: a digest, never the body
CREATE TABLE IF NOT EXISTS message_tombstones (
    message_id          TEXT PRIMARY KEY NOT NULL,
    author_id           TEXT,
    author_display_name TEXT NOT NULL,
    body_digest         TEXT NOT NULL,           -- BLAKE3 hex
    body_length         INTEGER NOT NULL,
    created_at          TEXT NOT NULL,
    deleted_at          TEXT NOT NULL,
    deleted_by          TEXT NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
