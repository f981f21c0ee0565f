use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS gateway_sessions (
    organization_id TEXT NOT NULL,             -- FK -> organizations(id)
    session_name    TEXT NOT NULL,
    status          TEXT NOT NULL,             -- raw gateway status, e.g. WORKING
    state           TEXT NOT NULL,             -- normalized SessionState
    updated_at      TEXT NOT NULL,

    PRIMARY KEY (organization_id, session_name),
    FOREIGN KEY (organization_id) REFERENCES organizations(id)
);

-- One running counter row per (organization, UTC day).
CREATE TABLE IF NOT EXISTS daily_analytics (
    organization_id          TEXT NOT NULL,    -- FK -> organizations(id)
    day                      TEXT NOT NULL,    -- YYYY-MM-DD
    total                    INTEGER NOT NULL DEFAULT 0,
    sent                     INTEGER NOT NULL DEFAULT 0,
    received                 INTEGER NOT NULL DEFAULT 0,
    unique_contacts          INTEGER NOT NULL DEFAULT 0,
    responses                INTEGER NOT NULL DEFAULT 0,
    response_time_total_secs INTEGER NOT NULL DEFAULT 0,
    updated_at               TEXT NOT NULL,

    PRIMARY KEY (organization_id, day),
    FOREIGN KEY (organization_id) REFERENCES organizations(id)
);

-- Which contacts were already counted toward unique_contacts on a day.
CREATE TABLE IF NOT EXISTS daily_contacts (
    organization_id TEXT NOT NULL,
    day             TEXT NOT NULL,
    contact_id      TEXT NOT NULL,             -- FK -> contacts(id)

    PRIMARY KEY (organization_id, day, contact_id),
    FOREIGN KEY (contact_id) REFERENCES contacts(id)
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
