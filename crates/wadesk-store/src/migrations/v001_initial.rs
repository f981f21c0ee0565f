//! v001 -- Initial schema creation.
//!
//! Creates the tenant tables: `organizations`, `memberships`, `invitations`,
//! `contacts` and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Organizations (tenants)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS organizations (
    id                   TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    name                 TEXT NOT NULL,
    slug                 TEXT NOT NULL UNIQUE,        -- immutable once assigned
    gateway_base_url     TEXT,
    gateway_api_key      TEXT,
    gateway_session_name TEXT NOT NULL DEFAULT 'default',
    subscription_status  TEXT NOT NULL DEFAULT 'inactive',
    created_at           TEXT NOT NULL                -- RFC-3339
);

-- Session name is the webhook join key, so it must identify one tenant.
CREATE UNIQUE INDEX IF NOT EXISTS idx_organizations_session
    ON organizations(gateway_session_name);

-- ----------------------------------------------------------------
-- Memberships (user <-> organization)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS memberships (
    id              TEXT PRIMARY KEY NOT NULL,        -- UUID v4
    organization_id TEXT NOT NULL,                    -- FK -> organizations(id)
    user_id         TEXT NOT NULL,                    -- identity provider subject
    role            TEXT NOT NULL,                    -- owner | admin | member
    active          INTEGER NOT NULL DEFAULT 1,       -- boolean 0/1
    created_at      TEXT NOT NULL,

    UNIQUE (organization_id, user_id),
    FOREIGN KEY (organization_id) REFERENCES organizations(id)
);

CREATE INDEX IF NOT EXISTS idx_memberships_user ON memberships(user_id, active);

-- ----------------------------------------------------------------
-- Invitations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS invitations (
    id              TEXT PRIMARY KEY NOT NULL,        -- UUID v4
    organization_id TEXT NOT NULL,                    -- FK -> organizations(id)
    email           TEXT NOT NULL,                    -- lower-cased
    role            TEXT NOT NULL,
    token_hash      TEXT NOT NULL UNIQUE,             -- BLAKE3 hex of the token
    status          TEXT NOT NULL DEFAULT 'pending',  -- pending | accepted
    invited_by      TEXT NOT NULL,
    expires_at      TEXT NOT NULL,
    created_at      TEXT NOT NULL,

    FOREIGN KEY (organization_id) REFERENCES organizations(id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_invitations_one_pending
    ON invitations(organization_id, email) WHERE status = 'pending';
CREATE INDEX IF NOT EXISTS idx_invitations_email ON invitations(email, status);

-- ----------------------------------------------------------------
-- Contacts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contacts (
    id                  TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    organization_id     TEXT NOT NULL,                -- FK -> organizations(id)
    external_id         TEXT NOT NULL,                -- gateway contact id
    display_name        TEXT,
    last_seen_at        TEXT NOT NULL,
    created_at          TEXT NOT NULL,

    UNIQUE (organization_id, external_id),
    FOREIGN KEY (organization_id) REFERENCES organizations(id)
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,        -- UUID v4
    organization_id TEXT NOT NULL,                    -- FK -> organizations(id)
    contact_id      TEXT NOT NULL,                    -- FK -> contacts(id)
    external_id     TEXT NOT NULL,                    -- gateway message id
    content         TEXT NOT NULL,
    message_type    TEXT NOT NULL,
    direction       TEXT NOT NULL,                    -- outgoing | incoming
    timestamp       TEXT NOT NULL,                    -- event time, RFC-3339
    day             TEXT NOT NULL,                    -- UTC date of timestamp
    ack             INTEGER,                          -- delivery status
    ingested_at     TEXT NOT NULL,

    UNIQUE (organization_id, external_id),
    FOREIGN KEY (organization_id) REFERENCES organizations(id),
    FOREIGN KEY (contact_id) REFERENCES contacts(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_org_day ON messages(organization_id, day);
CREATE INDEX IF NOT EXISTS idx_messages_contact_ts
    ON messages(contact_id, timestamp);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
