//! CRUD operations for [`Organization`] records.

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use wadesk_shared::constants::DEFAULT_SESSION_NAME;
use wadesk_shared::Role;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{GatewaySettings, Membership, NewOrganization, Organization};
use crate::rows::{now, ts_at, ts_key, uuid_at};

const ORG_COLUMNS: &str = "id, name, slug, gateway_base_url, gateway_api_key,
     gateway_session_name, subscription_status, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Provision a new organization.
    pub fn create_organization(&self, new: &NewOrganization) -> Result<Organization> {
        insert_organization(self.conn(), new)
    }

    /// Provision an organization together with its first owner, atomically.
    pub fn create_organization_with_owner(
        &mut self,
        new: &NewOrganization,
        owner_user_id: &str,
    ) -> Result<(Organization, Membership)> {
        let tx = self.conn_mut().transaction()?;
        let org = insert_organization(&tx, new)?;
        let membership =
            crate::memberships::upsert_membership(&tx, org.id, owner_user_id, Role::Owner)?;
        tx.commit()?;
        Ok((org, membership))
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_organization(&self, id: Uuid) -> Result<Organization> {
        self.conn()
            .query_row(
                &format!("SELECT {ORG_COLUMNS} FROM organizations WHERE id = ?1"),
                params![id.to_string()],
                row_to_organization,
            )
            .map_err(StoreError::not_found)
    }

    pub fn get_organization_by_slug(&self, slug: &str) -> Result<Organization> {
        self.conn()
            .query_row(
                &format!("SELECT {ORG_COLUMNS} FROM organizations WHERE slug = ?1"),
                params![slug.trim().to_ascii_lowercase()],
                row_to_organization,
            )
            .map_err(StoreError::not_found)
    }

    /// Resolve the organization that owns a gateway session. `None` for
    /// stale or orphaned sessions.
    pub fn find_organization_by_session(&self, session: &str) -> Result<Option<Organization>> {
        find_by_session(self.conn(), session)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Replace the gateway credentials. The slug is never touched.
    pub fn update_gateway_settings(&self, id: Uuid, settings: &GatewaySettings) -> Result<Organization> {
        let current = self.get_organization(id)?;
        let session_name = clean(settings.session_name.as_deref()).unwrap_or(current.gateway_session_name);
        // Omitted keeps the stored key, an empty string clears it.
        let api_key = match settings.api_key.as_deref() {
            None => current.gateway_api_key,
            Some(key) => clean(Some(key)),
        };

        self.conn()
            .execute(
                "UPDATE organizations
                 SET gateway_base_url = ?1, gateway_api_key = ?2, gateway_session_name = ?3
                 WHERE id = ?4",
                params![
                    clean(settings.base_url.as_deref()),
                    api_key,
                    session_name,
                    id.to_string(),
                ],
            )
            .map_err(|e| StoreError::from_constraint(e, "gateway session already in use"))?;

        self.get_organization(id)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn find_by_session(
    conn: &rusqlite::Connection,
    session: &str,
) -> Result<Option<Organization>> {
    Ok(conn
        .query_row(
            &format!("SELECT {ORG_COLUMNS} FROM organizations WHERE gateway_session_name = ?1"),
            params![session],
            row_to_organization,
        )
        .optional()?)
}

fn insert_organization(conn: &rusqlite::Connection, new: &NewOrganization) -> Result<Organization> {
    let slug = new.slug.trim().to_ascii_lowercase();
    if !is_valid_slug(&slug) {
        return Err(StoreError::Conflict(format!("invalid slug `{}`", new.slug)));
    }
    let org = Organization {
        id: Uuid::new_v4(),
        name: new.name.trim().to_string(),
        slug,
        gateway_base_url: clean(new.gateway_base_url.as_deref()),
        gateway_api_key: clean(new.gateway_api_key.as_deref()),
        gateway_session_name: clean(new.gateway_session_name.as_deref())
            .unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string()),
        subscription_status: "inactive".to_string(),
        created_at: now(),
    };
    conn.execute(
        "INSERT INTO organizations (id, name, slug, gateway_base_url, gateway_api_key,
             gateway_session_name, subscription_status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            org.id.to_string(),
            org.name,
            org.slug,
            org.gateway_base_url,
            org.gateway_api_key,
            org.gateway_session_name,
            org.subscription_status,
            ts_key(org.created_at),
        ],
    )
    .map_err(|e| StoreError::from_constraint(e, "slug or gateway session already in use"))?;
    Ok(org)
}

/// Lower-case ASCII letters, digits and single dashes, not at the edges.
fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= 64
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub(crate) fn row_to_organization(row: &rusqlite::Row<'_>) -> rusqlite::Result<Organization> {
    Ok(Organization {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        gateway_base_url: row.get(3)?,
        gateway_api_key: row.get(4)?,
        gateway_session_name: row.get(5)?,
        subscription_status: row.get(6)?,
        created_at: ts_at(row, 7)?,
    })
}
