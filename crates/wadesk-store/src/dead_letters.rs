//! Webhook events whose persistence failed, kept for replay.

use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;
use crate::models::DeadLetter;
use crate::rows::{now, ts_at, ts_key, uuid_at};

impl Database {
    pub fn insert_dead_letter(&self, session: &str, event: &str, payload: &str, error: &str) -> Result<DeadLetter> {
        let letter = DeadLetter {
            id: Uuid::new_v4(),
            session: session.to_string(),
            event: event.to_string(),
            payload: payload.to_string(),
            error: error.to_string(),
            replayed: false,
            created_at: now(),
        };

        self.conn().execute(
            "INSERT INTO dead_letters (id, session, event, payload, error, replayed, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                letter.id.to_string(),
                letter.session,
                letter.event,
                letter.payload,
                letter.error,
                ts_key(letter.created_at),
            ],
        )?;
        Ok(letter)
    }

    /// Unreplayed dead letters, oldest first.
    pub fn pending_dead_letters(&self, limit: u32) -> Result<Vec<DeadLetter>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, session, event, payload, error, replayed, created_at
             FROM dead_letters
             WHERE replayed = 0
             ORDER BY created_at ASC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit], |row| {
            let replayed: i64 = row.get(5)?;
            Ok(DeadLetter {
                id: uuid_at(row, 0)?,
                session: row.get(1)?,
                event: row.get(2)?,
                payload: row.get(3)?,
                error: row.get(4)?,
                replayed: replayed != 0,
                created_at: ts_at(row, 6)?,
            })
        })?;

        let mut letters = Vec::new();
        for row in rows {
            letters.push(row?);
        }
        Ok(letters)
    }

    pub fn mark_dead_letter_replayed(&self, id: Uuid) -> Result<bool> {
        let updated = self.conn().execute(
            "UPDATE dead_letters SET replayed = 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(updated > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replayed_letters_leave_the_queue() {
        let db = Database::open_in_memory().unwrap();
        let a = db
            .insert_dead_letter("org-42", "message", "{}", "database is locked")
            .unwrap();
        db.insert_dead_letter("org-42", "message", "{}", "disk I/O error")
            .unwrap();

        assert_eq!(db.pending_dead_letters(10).unwrap().len(), 2);
        assert!(db.mark_dead_letter_replayed(a.id).unwrap());

        let pending = db.pending_dead_letters(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_ne!(pending[0].id, a.id);
    }
}
