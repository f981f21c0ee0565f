use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Webhook events whose persistence failed, kept for manual replay.
CREATE TABLE IF NOT EXISTS dead_letters (
    id         TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    session    TEXT NOT NULL,
    event      TEXT NOT NULL,
    payload    TEXT NOT NULL,               -- raw webhook body (JSON)
    error      TEXT NOT NULL,
    replayed   INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_dead_letters_pending ON dead_letters(replayed, created_at);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
