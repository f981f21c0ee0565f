//! Contacts known to an organization.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Contact;
use crate::rows::{ts_at, ts_key, uuid_at};

impl Database {
    pub fn get_contact(&self, organization_id: Uuid, external_id: &str) -> Result<Option<Contact>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT id, organization_id, external_id, display_name, last_seen_at, created_at
                 FROM contacts
                 WHERE organization_id = ?1 AND external_id = ?2",
                params![organization_id.to_string(), external_id],
                row_to_contact,
            )
            .optional()?)
    }

    /// Contacts of an organization, most recently seen first.
    pub fn list_contacts(&self, organization_id: Uuid) -> Result<Vec<Contact>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, organization_id, external_id, display_name, last_seen_at, created_at
             FROM contacts
             WHERE organization_id = ?1
             ORDER BY last_seen_at DESC",
        )?;

        let rows = stmt.query_map(params![organization_id.to_string()], row_to_contact)?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }

    pub fn count_contacts(&self, organization_id: Uuid) -> Result<i64> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM contacts WHERE organization_id = ?1",
            params![organization_id.to_string()],
            |row| row.get(0),
        )?)
    }
}

// ---------------------------------------------------------------------------
// Helpers used inside the ingestion transaction
// ---------------------------------------------------------------------------

/// Create the contact on first sight, otherwise advance `last_seen_at`.
///
/// An existing contact keeps its stored display name, even when it has none.
/// Returns the contact id and whether the row was created by this call.
pub(crate) fn upsert_contact(
    conn: &Connection,
    organization_id: Uuid,
    external_id: &str,
    display_name: Option<&str>,
    seen_at: DateTime<Utc>,
) -> Result<(Uuid, bool)> {
    let created = conn.execute(
        "INSERT INTO contacts (id, organization_id, external_id, display_name, last_seen_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(organization_id, external_id) DO NOTHING",
        params![
            Uuid::new_v4().to_string(),
            organization_id.to_string(),
            external_id,
            display_name,
            ts_key(seen_at),
            ts_key(Utc::now()),
        ],
    )? == 1;

    if !created {
        conn.execute(
            "UPDATE contacts
             SET last_seen_at = MAX(last_seen_at, ?3)
             WHERE organization_id = ?1 AND external_id = ?2",
            params![organization_id.to_string(), external_id, ts_key(seen_at)],
        )?;
    }

    let id = conn
        .query_row(
            "SELECT id FROM contacts WHERE organization_id = ?1 AND external_id = ?2",
            params![organization_id.to_string(), external_id],
            |row| uuid_at(row, 0),
        )
        .map_err(StoreError::not_found)?;

    Ok((id, created))
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: uuid_at(row, 0)?,
        organization_id: uuid_at(row, 1)?,
        external_id: row.get(2)?,
        display_name: row.get(3)?,
        last_seen_at: ts_at(row, 4)?,
        created_at: ts_at(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewOrganization;
    use chrono::TimeZone;

    fn setup() -> (Database, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let org = db
            .create_organization(&NewOrganization {
                name: "Acme".into(),
                slug: "acme".into(),
                ..Default::default()
            })
            .unwrap();
        (db, org.id)
    }

    #[test]
    fn first_name_wins_and_last_seen_only_advances() {
        let (db, org) = setup();
        let t1 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let t0 = Utc.timestamp_opt(1_600_000_000, 0).unwrap();

        let (id, created) = upsert_contact(db.conn(), org, "49170@c.us", Some("Anna"), t1).unwrap();
        assert!(created);

        let (again, created) = upsert_contact(db.conn(), org, "49170@c.us", Some("Other"), t0).unwrap();
        assert_eq!(again, id);
        assert!(!created);

        let contact = db.get_contact(org, "49170@c.us").unwrap().unwrap();
        assert_eq!(contact.display_name.as_deref(), Some("Anna"));
        assert_eq!(contact.last_seen_at, t1);
        assert_eq!(db.count_contacts(org).unwrap(), 1);
    }

    #[test]
    fn later_name_does_not_fill_a_nameless_contact() {
        let (db, org) = setup();
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        upsert_contact(db.conn(), org, "49170@c.us", None, t).unwrap();
        upsert_contact(db.conn(), org, "49170@c.us", Some("Anna"), t + chrono::Duration::seconds(5)).unwrap();

        let contact = db.get_contact(org, "49170@c.us").unwrap().unwrap();
        assert_eq!(contact.display_name, None);
        assert_eq!(contact.last_seen_at, t + chrono::Duration::seconds(5));
    }

    #[test]
    fn contacts_are_scoped_per_organization() {
        let (db, org) = setup();
        let other = db
            .create_organization(&NewOrganization {
                name: "Other".into(),
                slug: "other".into(),
                gateway_session_name: Some("other".into()),
                ..Default::default()
            })
            .unwrap();
        let t = Utc::now();

        let (a, _) = upsert_contact(db.conn(), org, "49170@c.us", None, t).unwrap();
        let (b, created) = upsert_contact(db.conn(), other.id, "49170@c.us", None, t).unwrap();
        assert!(created);
        assert_ne!(a, b);
    }
}
