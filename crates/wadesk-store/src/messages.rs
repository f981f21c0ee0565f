use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use wadesk_shared::protocol::ChatEvent;
use wadesk_shared::{Direction, MessageType};

use crate::database::Database;
use crate::error::Result;
use crate::models::Message;
use crate::rows::{day_key, enum_at, ts_at, ts_key, uuid_at};

const MESSAGE_COLUMNS: &str = "id, organization_id, contact_id, external_id, content,
     message_type, direction, timestamp, ack, ingested_at";

impl Database {
    pub fn get_message_by_external_id(
        &self,
        organization_id: Uuid,
        external_id: &str,
    ) -> Result<Option<Message>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE organization_id = ?1 AND external_id = ?2"
                ),
                params![organization_id.to_string(), external_id],
                row_to_message,
            )
            .optional()?)
    }

    /// Messages exchanged with one contact, newest first.
    pub fn get_messages_for_contact(
        &self,
        organization_id: Uuid,
        contact_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE organization_id = ?1 AND contact_id = ?2
             ORDER BY timestamp DESC
             LIMIT ?3 OFFSET ?4"
        ))?;

        let rows = stmt.query_map(
            params![organization_id.to_string(), contact_id.to_string(), limit, offset],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn count_messages(&self, organization_id: Uuid) -> Result<i64> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE organization_id = ?1",
            params![organization_id.to_string()],
            |row| row.get(0),
        )?)
    }

    pub fn count_messages_for_day(&self, organization_id: Uuid, day: NaiveDate) -> Result<i64> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE organization_id = ?1 AND day = ?2",
            params![organization_id.to_string(), day_key(day)],
            |row| row.get(0),
        )?)
    }

    /// Record a delivery acknowledgement. Returns `false` when the message is
    /// not (yet) known.
    pub fn set_message_ack(&self, organization_id: Uuid, external_id: &str, ack: i64) -> Result<bool> {
        let updated = self.conn().execute(
            "UPDATE messages SET ack = ?3
             WHERE organization_id = ?1 AND external_id = ?2",
            params![organization_id.to_string(), external_id, ack],
        )?;
        Ok(updated > 0)
    }
}

/// Insert-or-ignore on (organization, external id). Returns the new row id,
/// or `None` when the message was already stored.
pub(crate) fn insert_message_if_new(
    conn: &Connection,
    organization_id: Uuid,
    contact_id: Uuid,
    event: &ChatEvent,
) -> Result<Option<Uuid>> {
    let id = Uuid::new_v4();
    let inserted = conn.execute(
        "INSERT INTO messages (id, organization_id, contact_id, external_id, content,
             message_type, direction, timestamp, day, ingested_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(organization_id, external_id) DO NOTHING",
        params![
            id.to_string(),
            organization_id.to_string(),
            contact_id.to_string(),
            event.external_id,
            event.body,
            event.message_type.as_str(),
            event.direction.as_str(),
            ts_key(event.timestamp),
            day_key(event.timestamp.date_naive()),
            ts_key(Utc::now()),
        ],
    )?;
    Ok((inserted == 1).then_some(id))
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_at(row, 0)?,
        organization_id: uuid_at(row, 1)?,
        contact_id: uuid_at(row, 2)?,
        external_id: row.get(3)?,
        content: row.get(4)?,
        message_type: enum_at(row, 5, MessageType::parse)?,
        direction: enum_at(row, 6, Direction::parse)?,
        timestamp: ts_at(row, 7)?,
        ack: row.get(8)?,
        ingested_at: ts_at(row, 9)?,
    })
}
