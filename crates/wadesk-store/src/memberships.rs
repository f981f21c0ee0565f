//! Membership records: which identity-provider users belong to which
//! organization, and in what role.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use uuid::Uuid;

use wadesk_shared::Role;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Membership, Organization};
use crate::organizations::row_to_organization;
use crate::rows::{enum_at, ts_at, ts_key, uuid_at};

impl Database {
    /// Add `user_id` to an organization, or reactivate and re-role an
    /// existing (possibly deactivated) membership.
    pub fn add_membership(&self, organization_id: Uuid, user_id: &str, role: Role) -> Result<Membership> {
        upsert_membership(self.conn(), organization_id, user_id, role)
    }

    /// Every active membership of a user, joined with its organization.
    ///
    /// Ordered by membership creation time, then id, so "the first
    /// organization" is stable across calls.
    pub fn active_memberships_for_user(&self, user_id: &str) -> Result<Vec<(Organization, Membership)>> {
        let mut stmt = self.conn().prepare(
            "SELECT o.id, o.name, o.slug, o.gateway_base_url, o.gateway_api_key,
                    o.gateway_session_name, o.subscription_status, o.created_at,
                    m.id, m.organization_id, m.user_id, m.role, m.active, m.created_at
             FROM memberships m
             JOIN organizations o ON o.id = m.organization_id
             WHERE m.user_id = ?1 AND m.active = 1
             ORDER BY m.created_at ASC, m.id ASC",
        )?;

        let rows = stmt.query_map(params![user_id], |row| {
            Ok((row_to_organization(row)?, membership_at(row, 8)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_active_membership(&self, organization_id: Uuid, user_id: &str) -> Result<Option<Membership>> {
        active_membership(self.conn(), organization_id, user_id)
    }

    /// Active members of an organization, oldest first.
    pub fn list_members(&self, organization_id: Uuid) -> Result<Vec<Membership>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, organization_id, user_id, role, active, created_at
             FROM memberships
             WHERE organization_id = ?1 AND active = 1
             ORDER BY created_at ASC, id ASC",
        )?;

        let rows = stmt.query_map(params![organization_id.to_string()], row_to_membership)?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    pub fn count_active_owners(&self, organization_id: Uuid) -> Result<i64> {
        count_owners(self.conn(), organization_id)
    }

    /// Deactivate a membership. Refuses to remove the last active owner.
    pub fn deactivate_membership(&mut self, organization_id: Uuid, user_id: &str) -> Result<()> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let role: Option<String> = tx
            .query_row(
                "SELECT role FROM memberships
                 WHERE organization_id = ?1 AND user_id = ?2 AND active = 1",
                params![organization_id.to_string(), user_id],
                |row| row.get(0),
            )
            .optional()?;

        match role.as_deref().and_then(Role::parse) {
            None => return Err(StoreError::NotFound),
            Some(Role::Owner) if count_owners(&tx, organization_id)? <= 1 => {
                return Err(StoreError::Conflict(
                    "cannot remove the last owner of an organization".into(),
                ));
            }
            Some(_) => {}
        }

        tx.execute(
            "UPDATE memberships SET active = 0
             WHERE organization_id = ?1 AND user_id = ?2",
            params![organization_id.to_string(), user_id],
        )?;
        tx.commit()?;

        tracing::info!(org = %organization_id, user = user_id, "membership deactivated");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn active_membership(
    conn: &Connection,
    organization_id: Uuid,
    user_id: &str,
) -> Result<Option<Membership>> {
    Ok(conn
        .query_row(
            "SELECT id, organization_id, user_id, role, active, created_at
             FROM memberships
             WHERE organization_id = ?1 AND user_id = ?2 AND active = 1",
            params![organization_id.to_string(), user_id],
            row_to_membership,
        )
        .optional()?)
}

pub(crate) fn upsert_membership(
    conn: &Connection,
    organization_id: Uuid,
    user_id: &str,
    role: Role,
) -> Result<Membership> {
    conn.execute(
        "INSERT INTO memberships (id, organization_id, user_id, role, active, created_at)
         VALUES (?1, ?2, ?3, ?4, 1, ?5)
         ON CONFLICT(organization_id, user_id)
         DO UPDATE SET role = excluded.role, active = 1",
        params![
            Uuid::new_v4().to_string(),
            organization_id.to_string(),
            user_id,
            role.as_str(),
            ts_key(Utc::now()),
        ],
    )?;

    conn.query_row(
        "SELECT id, organization_id, user_id, role, active, created_at
         FROM memberships
         WHERE organization_id = ?1 AND user_id = ?2",
        params![organization_id.to_string(), user_id],
        row_to_membership,
    )
    .map_err(StoreError::not_found)
}

fn count_owners(conn: &Connection, organization_id: Uuid) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM memberships
         WHERE organization_id = ?1 AND role = 'owner' AND active = 1",
        params![organization_id.to_string()],
        |row| row.get(0),
    )?)
}

fn row_to_membership(row: &rusqlite::Row<'_>) -> rusqlite::Result<Membership> {
    membership_at(row, 0)
}

fn membership_at(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Membership> {
    let active: i64 = row.get(offset + 4)?;
    Ok(Membership {
        id: uuid_at(row, offset)?,
        organization_id: uuid_at(row, offset + 1)?,
        user_id: row.get(offset + 2)?,
        role: enum_at(row, offset + 3, Role::parse)?,
        active: active != 0,
        created_at: ts_at(row, offset + 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewOrganization;

    fn org(db: &Database, slug: &str) -> Organization {
        db.create_organization(&NewOrganization {
            name: slug.to_uppercase(),
            slug: slug.into(),
            gateway_session_name: Some(format!("{slug}-session")),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn memberships_listed_in_creation_order() {
        let db = Database::open_in_memory().unwrap();
        let a = org(&db, "alpha");
        let b = org(&db, "beta");

        db.add_membership(a.id, "user-1", Role::Member).unwrap();
        db.add_membership(b.id, "user-1", Role::Admin).unwrap();

        let list = db.active_memberships_for_user("user-1").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].0.id, a.id);
        assert_eq!(list[1].1.role, Role::Admin);

        // Stable across calls.
        let again = db.active_memberships_for_user("user-1").unwrap();
        assert_eq!(list, again);
    }

    #[test]
    fn re_adding_reactivates_with_new_role() {
        let mut db = Database::open_in_memory().unwrap();
        let a = org(&db, "alpha");
        db.add_membership(a.id, "owner", Role::Owner).unwrap();
        let first = db.add_membership(a.id, "user-1", Role::Member).unwrap();

        db.deactivate_membership(a.id, "user-1").unwrap();
        assert!(db.get_active_membership(a.id, "user-1").unwrap().is_none());

        let again = db.add_membership(a.id, "user-1", Role::Admin).unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.role, Role::Admin);
        assert!(again.active);
    }

    #[test]
    fn last_owner_cannot_be_removed() {
        let mut db = Database::open_in_memory().unwrap();
        let a = org(&db, "alpha");
        db.add_membership(a.id, "owner-1", Role::Owner).unwrap();

        assert!(matches!(
            db.deactivate_membership(a.id, "owner-1"),
            Err(StoreError::Conflict(_))
        ));

        db.add_membership(a.id, "owner-2", Role::Owner).unwrap();
        db.deactivate_membership(a.id, "owner-1").unwrap();
        assert_eq!(db.count_active_owners(a.id).unwrap(), 1);
    }

    #[test]
    fn removing_unknown_member_is_not_found() {
        let mut db = Database::open_in_memory().unwrap();
        let a = org(&db, "alpha");
        assert!(matches!(
            db.deactivate_membership(a.id, "ghost"),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn list_members_excludes_inactive() {
        let mut db = Database::open_in_memory().unwrap();
        let a = org(&db, "alpha");
        db.add_membership(a.id, "owner", Role::Owner).unwrap();
        db.add_membership(a.id, "user-1", Role::Member).unwrap();
        db.deactivate_membership(a.id, "user-1").unwrap();

        let members = db.list_members(a.id).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, "owner");
    }
}
