//! Applying a chat message event to tenant storage.
//!
//! Contact upsert, message insert-or-ignore and the analytics counters all
//! happen in one `BEGIN IMMEDIATE` transaction. Counters only move when the
//! insert actually wrote a row, so redelivered events are no-ops.

use rusqlite::TransactionBehavior;
use uuid::Uuid;

use wadesk_shared::protocol::ChatEvent;

use crate::analytics::{record_contact_seen, record_event, record_message_responses};
use crate::contacts::upsert_contact;
use crate::database::Database;
use crate::error::Result;
use crate::messages::insert_message_if_new;
use crate::models::IngestOutcome;

impl Database {
    pub fn ingest_message(&mut self, organization_id: Uuid, event: &ChatEvent) -> Result<IngestOutcome> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (contact_id, contact_created) = upsert_contact(
            &tx,
            organization_id,
            &event.contact_id,
            event.contact_name.as_deref(),
            event.timestamp,
        )?;

        let Some(message_id) = insert_message_if_new(&tx, organization_id, contact_id, event)? else {
            // Commit anyway: last_seen_at may have advanced.
            tx.commit()?;
            return Ok(IngestOutcome::Duplicate);
        };

        let day = event.timestamp.date_naive();
        record_event(&tx, organization_id, day, event.direction)?;
        record_contact_seen(&tx, organization_id, day, contact_id)?;

        record_message_responses(&tx, organization_id, contact_id, event)?;

        tx.commit()?;

        Ok(IngestOutcome::Inserted {
            message_id,
            contact_created,
        })
    }
}
