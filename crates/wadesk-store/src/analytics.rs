//! Daily analytics aggregator.
//!
//! One running counter row per (organization, UTC day). Every mutation is a
//! single atomic `INSERT ... ON CONFLICT DO UPDATE`, never read-then-write,
//! so concurrent writers on separate connections cannot lose increments.
//! [`Database::reconcile_day`] recomputes a row from the stored messages.
//!
//! Response times are a function of the stored conversation, not of the
//! order webhooks arrive in: an outgoing message answers the incoming
//! messages stored between it and the contact's previous outgoing message,
//! ordered by event time and then external id. Ingesting a message only
//! changes the answer of the message itself and of the contact's next
//! outgoing message, so the live path corrects exactly those two.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use uuid::Uuid;

use wadesk_shared::protocol::ChatEvent;
use wadesk_shared::Direction;

use crate::database::Database;
use crate::error::Result;
use crate::models::{DailyAnalytics, ReconcileReport};
use crate::rows::{day_at, day_key, now, ts_at, ts_key, uuid_at, DAY_FORMAT};

const ANALYTICS_COLUMNS: &str = "organization_id, day, total, sent, received, unique_contacts,
     responses, response_time_total_secs, updated_at";

impl Database {
    /// Count one stored message for (organization, day).
    pub fn record_event(&self, organization_id: Uuid, day: NaiveDate, direction: Direction) -> Result<()> {
        record_event(self.conn(), organization_id, day, direction)
    }

    /// Count `contact_id` toward the day's unique contacts, once.
    pub fn record_contact_seen(&self, organization_id: Uuid, day: NaiveDate, contact_id: Uuid) -> Result<bool> {
        record_contact_seen(self.conn(), organization_id, day, contact_id)
    }

    pub fn record_response(&self, organization_id: Uuid, day: NaiveDate, secs: i64) -> Result<()> {
        record_response(self.conn(), organization_id, day, secs)
    }

    pub fn get_daily_analytics(&self, organization_id: Uuid, day: NaiveDate) -> Result<Option<DailyAnalytics>> {
        get_daily(self.conn(), organization_id, day)
    }

    /// Rows for `from..=to`, oldest first. Days without traffic are absent.
    pub fn daily_analytics(
        &self,
        organization_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyAnalytics>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ANALYTICS_COLUMNS}
             FROM daily_analytics
             WHERE organization_id = ?1 AND day >= ?2 AND day <= ?3
             ORDER BY day ASC"
        ))?;

        let rows = stmt.query_map(
            params![organization_id.to_string(), day_key(from), day_key(to)],
            row_to_daily,
        )?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Recompute one day's counters from the message table and overwrite
    /// the stored row.
    pub fn reconcile_day(&mut self, organization_id: Uuid, day: NaiveDate) -> Result<ReconcileReport> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let report = reconcile_in(&tx, organization_id, day)?;
        tx.commit()?;

        if report.drifted {
            tracing::warn!(
                org = %organization_id,
                day = %day,
                total = report.after.total,
                "analytics drift corrected"
            );
        }
        Ok(report)
    }

    /// Reconcile every day that has messages or a counter row.
    pub fn reconcile_organization(&mut self, organization_id: Uuid) -> Result<Vec<ReconcileReport>> {
        let days = {
            let mut stmt = self.conn().prepare(
                "SELECT day FROM messages WHERE organization_id = ?1
                 UNION
                 SELECT day FROM daily_analytics WHERE organization_id = ?1
                 ORDER BY day ASC",
            )?;
            let rows = stmt.query_map(params![organization_id.to_string()], |row| day_at(row, 0))?;
            let mut days = Vec::new();
            for row in rows {
                days.push(row?);
            }
            days
        };

        let mut reports = Vec::with_capacity(days.len());
        for day in days {
            reports.push(self.reconcile_day(organization_id, day)?);
        }
        Ok(reports)
    }
}

// ---------------------------------------------------------------------------
// Counter mutations (also used inside the ingestion transaction)
// ---------------------------------------------------------------------------

pub(crate) fn record_event(
    conn: &Connection,
    organization_id: Uuid,
    day: NaiveDate,
    direction: Direction,
) -> Result<()> {
    let (sent, received) = match direction {
        Direction::Outgoing => (1, 0),
        Direction::Incoming => (0, 1),
    };
    conn.execute(
        "INSERT INTO daily_analytics (organization_id, day, total, sent, received, updated_at)
         VALUES (?1, ?2, 1, ?3, ?4, ?5)
         ON CONFLICT(organization_id, day) DO UPDATE SET
             total = total + 1,
             sent = sent + excluded.sent,
             received = received + excluded.received,
             updated_at = excluded.updated_at",
        params![
            organization_id.to_string(),
            day_key(day),
            sent,
            received,
            ts_key(Utc::now()),
        ],
    )?;
    Ok(())
}

pub(crate) fn record_contact_seen(
    conn: &Connection,
    organization_id: Uuid,
    day: NaiveDate,
    contact_id: Uuid,
) -> Result<bool> {
    let first_today = conn.execute(
        "INSERT OR IGNORE INTO daily_contacts (organization_id, day, contact_id)
         VALUES (?1, ?2, ?3)",
        params![organization_id.to_string(), day_key(day), contact_id.to_string()],
    )? == 1;

    if first_today {
        conn.execute(
            "INSERT INTO daily_analytics (organization_id, day, unique_contacts, updated_at)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(organization_id, day) DO UPDATE SET
                 unique_contacts = unique_contacts + 1,
                 updated_at = excluded.updated_at",
            params![organization_id.to_string(), day_key(day), ts_key(Utc::now())],
        )?;
    }
    Ok(first_today)
}

pub(crate) fn record_response(conn: &Connection, organization_id: Uuid, day: NaiveDate, secs: i64) -> Result<()> {
    adjust_responses(conn, organization_id, day, 1, secs.max(0))
}

/// Move the day's response counters by a signed delta.
fn adjust_responses(conn: &Connection, organization_id: Uuid, day: NaiveDate, count: i64, secs: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO daily_analytics (organization_id, day, responses, response_time_total_secs, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(organization_id, day) DO UPDATE SET
             responses = responses + excluded.responses,
             response_time_total_secs = response_time_total_secs + excluded.response_time_total_secs,
             updated_at = excluded.updated_at",
        params![
            organization_id.to_string(),
            day_key(day),
            count,
            secs,
            ts_key(Utc::now()),
        ],
    )?;
    Ok(())
}

fn get_daily(conn: &Connection, organization_id: Uuid, day: NaiveDate) -> Result<Option<DailyAnalytics>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {ANALYTICS_COLUMNS} FROM daily_analytics
                 WHERE organization_id = ?1 AND day = ?2"
            ),
            params![organization_id.to_string(), day_key(day)],
            row_to_daily,
        )
        .optional()?)
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

fn reconcile_in(conn: &Connection, organization_id: Uuid, day: NaiveDate) -> Result<ReconcileReport> {
    let org = organization_id.to_string();
    let key = day_key(day);
    let before = get_daily(conn, organization_id, day)?;

    let (total, sent, received, unique_contacts): (i64, i64, i64, i64) = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(direction = 'outgoing'), 0),
                COALESCE(SUM(direction = 'incoming'), 0),
                COUNT(DISTINCT contact_id)
         FROM messages
         WHERE organization_id = ?1 AND day = ?2",
        params![org, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )?;

    conn.execute(
        "DELETE FROM daily_contacts WHERE organization_id = ?1 AND day = ?2",
        params![org, key],
    )?;
    conn.execute(
        "INSERT INTO daily_contacts (organization_id, day, contact_id)
         SELECT DISTINCT organization_id, day, contact_id
         FROM messages
         WHERE organization_id = ?1 AND day = ?2",
        params![org, key],
    )?;

    let (responses, response_time_total_secs) = responses_on(conn, organization_id, day)?;

    let after = DailyAnalytics {
        organization_id,
        day,
        total,
        sent,
        received,
        unique_contacts,
        responses,
        response_time_total_secs,
        updated_at: now(),
    };

    conn.execute(
        "INSERT INTO daily_analytics (organization_id, day, total, sent, received, unique_contacts,
             responses, response_time_total_secs, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(organization_id, day) DO UPDATE SET
             total = excluded.total,
             sent = excluded.sent,
             received = excluded.received,
             unique_contacts = excluded.unique_contacts,
             responses = excluded.responses,
             response_time_total_secs = excluded.response_time_total_secs,
             updated_at = excluded.updated_at",
        params![
            org,
            key,
            after.total,
            after.sent,
            after.received,
            after.unique_contacts,
            after.responses,
            after.response_time_total_secs,
            ts_key(after.updated_at),
        ],
    )?;

    let drifted = match &before {
        Some(b) => !same_counters(b, &after),
        None => after.total != 0 || after.unique_contacts != 0 || after.responses != 0,
    };

    Ok(ReconcileReport {
        day,
        drifted,
        before,
        after,
    })
}

/// Total the responses whose outgoing message lands on `day`.
fn responses_on(conn: &Connection, organization_id: Uuid, day: NaiveDate) -> Result<(i64, i64)> {
    let outgoing = {
        let mut stmt = conn.prepare(
            "SELECT contact_id, timestamp, external_id
             FROM messages
             WHERE organization_id = ?1 AND day = ?2 AND direction = 'outgoing'",
        )?;
        let rows = stmt.query_map(params![organization_id.to_string(), day_key(day)], |row| {
            Ok((uuid_at(row, 0)?, position_at(row, 1)?))
        })?;
        let mut outgoing = Vec::new();
        for row in rows {
            outgoing.push(row?);
        }
        outgoing
    };

    let (mut responses, mut total_secs) = (0i64, 0i64);
    for (contact_id, position) in outgoing {
        if let Some(secs) = response_for(conn, contact_id, &position, None)? {
            responses += 1;
            total_secs += secs;
        }
    }
    Ok((responses, total_secs))
}

// ---------------------------------------------------------------------------
// Response matching
// ---------------------------------------------------------------------------

/// Where a message sits in its contact's conversation.
#[derive(Debug, Clone)]
struct Position {
    timestamp: DateTime<Utc>,
    external_id: String,
}

fn position_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Position> {
    Ok(Position {
        timestamp: ts_at(row, idx)?,
        external_id: row.get(idx + 1)?,
    })
}

/// Response time of the outgoing message at `out`: seconds since the first
/// incoming message after the previous outgoing one, or `None` when nothing
/// was waiting for a reply. `without` leaves one message out of the
/// conversation.
fn response_for(
    conn: &Connection,
    contact_id: Uuid,
    out: &Position,
    without: Option<&str>,
) -> Result<Option<i64>> {
    let contact = contact_id.to_string();
    let out_key = ts_key(out.timestamp);

    let previous: Option<Position> = conn
        .query_row(
            "SELECT timestamp, external_id FROM messages
             WHERE contact_id = ?1 AND direction = 'outgoing'
               AND (timestamp, external_id) < (?2, ?3)
               AND (?4 IS NULL OR external_id <> ?4)
             ORDER BY timestamp DESC, external_id DESC
             LIMIT 1",
            params![contact, out_key, out.external_id, without],
            |row| position_at(row, 0),
        )
        .optional()?;

    let (after_key, after_id) = match &previous {
        Some(p) => (Some(ts_key(p.timestamp)), Some(p.external_id.as_str())),
        None => (None, None),
    };

    let first_incoming: Option<DateTime<Utc>> = conn
        .query_row(
            "SELECT timestamp FROM messages
             WHERE contact_id = ?1 AND direction = 'incoming'
               AND (timestamp, external_id) < (?2, ?3)
               AND (?4 IS NULL OR (timestamp, external_id) > (?4, ?5))
               AND (?6 IS NULL OR external_id <> ?6)
             ORDER BY timestamp ASC, external_id ASC
             LIMIT 1",
            params![contact, out_key, out.external_id, after_key, after_id, without],
            |row| ts_at(row, 0),
        )
        .optional()?;

    Ok(first_incoming.map(|since| (out.timestamp - since).num_seconds().max(0)))
}

/// Bring the response counters in line after a message was stored for
/// `contact_id`. Runs inside the ingestion transaction, after the insert.
pub(crate) fn record_message_responses(
    conn: &Connection,
    organization_id: Uuid,
    contact_id: Uuid,
    event: &ChatEvent,
) -> Result<()> {
    let inserted = Position {
        timestamp: event.timestamp,
        external_id: event.external_id.clone(),
    };

    if event.direction == Direction::Outgoing {
        if let Some(secs) = response_for(conn, contact_id, &inserted, None)? {
            adjust_responses(conn, organization_id, event.timestamp.date_naive(), 1, secs)?;
        }
    }

    // The next outgoing message now answers a different stretch.
    let next: Option<Position> = conn
        .query_row(
            "SELECT timestamp, external_id FROM messages
             WHERE contact_id = ?1 AND direction = 'outgoing'
               AND (timestamp, external_id) > (?2, ?3)
             ORDER BY timestamp ASC, external_id ASC
             LIMIT 1",
            params![contact_id.to_string(), ts_key(inserted.timestamp), inserted.external_id],
            |row| position_at(row, 0),
        )
        .optional()?;

    if let Some(next) = next {
        let before = response_for(conn, contact_id, &next, Some(&event.external_id))?;
        let after = response_for(conn, contact_id, &next, None)?;
        if before != after {
            let count = i64::from(after.is_some()) - i64::from(before.is_some());
            let secs = after.unwrap_or(0) - before.unwrap_or(0);
            adjust_responses(conn, organization_id, next.timestamp.date_naive(), count, secs)?;
        }
    }
    Ok(())
}

fn same_counters(a: &DailyAnalytics, b: &DailyAnalytics) -> bool {
    a.total == b.total
        && a.sent == b.sent
        && a.received == b.received
        && a.unique_contacts == b.unique_contacts
        && a.responses == b.responses
        && a.response_time_total_secs == b.response_time_total_secs
}

fn row_to_daily(row: &rusqlite::Row<'_>) -> rusqlite::Result<DailyAnalytics> {
    Ok(DailyAnalytics {
        organization_id: uuid_at(row, 0)?,
        day: day_at(row, 1)?,
        total: row.get(2)?,
        sent: row.get(3)?,
        received: row.get(4)?,
        unique_contacts: row.get(5)?,
        responses: row.get(6)?,
        response_time_total_secs: row.get(7)?,
        updated_at: ts_at(row, 8)?,
    })
}

/// Parse a `YYYY-MM-DD` query value.
pub fn parse_day(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DAY_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewOrganization;

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

    fn day(s: &str) -> NaiveDate {
        parse_day(s).unwrap()
    }

    #[test]
    fn first_event_seeds_then_increments() {
        let (db, org) = setup();
        let d = day("2024-03-01");

        db.record_event(org, d, Direction::Incoming).unwrap();
        db.record_event(org, d, Direction::Outgoing).unwrap();
        db.record_event(org, d, Direction::Incoming).unwrap();

        let row = db.get_daily_analytics(org, d).unwrap().unwrap();
        assert_eq!((row.total, row.sent, row.received), (3, 1, 2));
    }

    #[test]
    fn range_query_is_inclusive_and_ordered() {
        let (db, org) = setup();
        for d in ["2024-03-03", "2024-03-01", "2024-03-02", "2024-03-04"] {
            db.record_event(org, day(d), Direction::Incoming).unwrap();
        }

        let rows = db
            .daily_analytics(org, day("2024-03-01"), day("2024-03-03"))
            .unwrap();
        let days: Vec<_> = rows.iter().map(|r| r.day).collect();
        assert_eq!(days, vec![day("2024-03-01"), day("2024-03-02"), day("2024-03-03")]);
    }

    #[test]
    fn unique_contacts_counted_once_per_day() {
        let (db, org) = setup();
        let d = day("2024-03-01");
        let contact = Uuid::new_v4();
        db.conn()
            .execute(
                "INSERT INTO contacts (id, organization_id, external_id, last_seen_at, created_at)
                 VALUES (?1, ?2, 'c', '2024-03-01T00:00:00Z', '2024-03-01T00:00:00Z')",
                params![contact.to_string(), org.to_string()],
            )
            .unwrap();

        assert!(db.record_contact_seen(org, d, contact).unwrap());
        assert!(!db.record_contact_seen(org, d, contact).unwrap());
        assert_eq!(db.get_daily_analytics(org, d).unwrap().unwrap().unique_contacts, 1);
    }

    #[test]
    fn responses_accumulate() {
        let (db, org) = setup();
        let d = day("2024-03-01");
        db.record_response(org, d, 60).unwrap();
        db.record_response(org, d, 120).unwrap();

        let row = db.get_daily_analytics(org, d).unwrap().unwrap();
        assert_eq!(row.responses, 2);
        assert_eq!(row.average_response_secs(), Some(90.0));
    }

    #[test]
    fn reconcile_zeroes_ghost_rows() {
        let (mut db, org) = setup();
        let d = day("2024-03-01");
        // Counter row with no backing messages.
        db.record_event(org, d, Direction::Incoming).unwrap();

        let reports = db.reconcile_organization(org).unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].drifted);
        assert_eq!(reports[0].after.total, 0);

        let again = db.reconcile_day(org, d).unwrap();
        assert!(!again.drifted);
    }

    #[test]
    fn parse_day_rejects_garbage() {
        assert!(parse_day("2024-02-30").is_none());
        assert!(parse_day("yesterday").is_none());
        assert_eq!(parse_day(" 2024-02-29 "), Some(day("2024-02-29")));
    }
}
