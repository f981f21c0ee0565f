//! Last known connectivity status of each gateway session.

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use wadesk_shared::SessionState;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::GatewaySession;
use crate::rows::{enum_at, ts_at, ts_key, uuid_at};

impl Database {
    /// Store a status report received at `at`.
    ///
    /// Last write wins by `at`, not by call order: a report older than the
    /// stored one is dropped. Returns the row as stored afterwards.
    pub fn upsert_gateway_session(
        &self,
        organization_id: Uuid,
        session_name: &str,
        status: &str,
        at: DateTime<Utc>,
    ) -> Result<GatewaySession> {
        let session = GatewaySession {
            organization_id,
            session_name: session_name.to_string(),
            status: status.trim().to_string(),
            state: SessionState::from_gateway(status),
            updated_at: at.trunc_subsecs(6),
        };

        self.conn().execute(
            "INSERT INTO gateway_sessions (organization_id, session_name, status, state, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(organization_id, session_name) DO UPDATE SET
                 status = excluded.status,
                 state = excluded.state,
                 updated_at = excluded.updated_at
             WHERE excluded.updated_at >= gateway_sessions.updated_at",
            params![
                session.organization_id.to_string(),
                session.session_name,
                session.status,
                session.state.as_str(),
                ts_key(session.updated_at),
            ],
        )?;

        self.get_gateway_session(organization_id, session_name)?
            .ok_or(StoreError::NotFound)
    }

    pub fn get_gateway_session(
        &self,
        organization_id: Uuid,
        session_name: &str,
    ) -> Result<Option<GatewaySession>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT organization_id, session_name, status, state, updated_at
                 FROM gateway_sessions
                 WHERE organization_id = ?1 AND session_name = ?2",
                params![organization_id.to_string(), session_name],
                |row| {
                    Ok(GatewaySession {
                        organization_id: uuid_at(row, 0)?,
                        session_name: row.get(1)?,
                        status: row.get(2)?,
                        state: enum_at(row, 3, SessionState::parse)?,
                        updated_at: ts_at(row, 4)?,
                    })
                },
            )
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewOrganization;
    use chrono::Duration;

    #[test]
    fn later_status_wins() {
        let db = Database::open_in_memory().unwrap();
        let org = db
            .create_organization(&NewOrganization {
                name: "Acme".into(),
                slug: "acme".into(),
                gateway_session_name: Some("org-42".into()),
                ..Default::default()
            })
            .unwrap();

        let t1 = Utc::now();
        let t2 = t1 + Duration::seconds(5);
        db.upsert_gateway_session(org.id, "org-42", "WORKING", t1).unwrap();
        db.upsert_gateway_session(org.id, "org-42", "FAILED", t2).unwrap();

        let session = db.get_gateway_session(org.id, "org-42").unwrap().unwrap();
        assert_eq!(session.status, "FAILED");
        assert_eq!(session.state, SessionState::Failed);
        assert_eq!(session.updated_at.timestamp_micros(), t2.timestamp_micros());
    }

    #[test]
    fn older_report_does_not_override_newer() {
        let db = Database::open_in_memory().unwrap();
        let org = db
            .create_organization(&NewOrganization {
                name: "Acme".into(),
                slug: "acme".into(),
                gateway_session_name: Some("org-42".into()),
                ..Default::default()
            })
            .unwrap();

        let t1 = Utc::now();
        let t2 = t1 + Duration::seconds(5);
        db.upsert_gateway_session(org.id, "org-42", "FAILED", t2).unwrap();
        let stored = db.upsert_gateway_session(org.id, "org-42", "WORKING", t1).unwrap();

        assert_eq!(stored.status, "FAILED");
        assert_eq!(stored.state, SessionState::Failed);
        assert_eq!(stored.updated_at.timestamp_micros(), t2.timestamp_micros());
        assert_eq!(db.get_gateway_session(org.id, "org-42").unwrap().unwrap().status, "FAILED");
    }
}
