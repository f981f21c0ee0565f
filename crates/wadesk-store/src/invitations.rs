//! Invitations: a pending offer of membership, addressed to an email and
//! redeemed with a one-time token.
//!
//! Only the BLAKE3 hash of the token is stored. The pending -> accepted
//! transition is guarded in SQL so a token is consumed at most once even if
//! two requests race.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use uuid::Uuid;

use wadesk_shared::invite::InviteToken;
use wadesk_shared::Role;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::memberships::{active_membership, upsert_membership};
use crate::models::{Invitation, InvitationStatus, Membership};
use crate::rows::{enum_at, now, ts_at, ts_key, uuid_at};

const INVITATION_COLUMNS: &str =
    "id, organization_id, email, role, status, invited_by, expires_at, created_at";

/// Result of [`Database::create_invitation`].
#[derive(Debug, Clone)]
pub enum InvitationCreated {
    /// A new invitation. The plaintext token is only available here.
    Created { invitation: Invitation, token: String },
    /// An unexpired pending invitation for the same email already exists.
    Existing(Invitation),
}

impl InvitationCreated {
    pub fn invitation(&self) -> &Invitation {
        match self {
            Self::Created { invitation, .. } | Self::Existing(invitation) => invitation,
        }
    }
}

/// Result of [`Database::accept_invitation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted(Membership),
    Expired,
    EmailMismatch,
    NotFound,
}

impl Database {
    /// Invite `email` into an organization.
    pub fn create_invitation(
        &mut self,
        organization_id: Uuid,
        email: &str,
        role: Role,
        invited_by: &str,
        ttl: Duration,
    ) -> Result<InvitationCreated> {
        let email = normalize_email(email);
        if !email.contains('@') {
            return Err(StoreError::Conflict(format!("invalid email `{email}`")));
        }
        let now = now();

        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = pending_for(&tx, organization_id, &email)? {
            if !existing.is_expired_at(now) {
                return Ok(InvitationCreated::Existing(existing));
            }
            // Free the partial unique index for the replacement.
            tx.execute(
                "DELETE FROM invitations WHERE id = ?1",
                params![existing.id.to_string()],
            )?;
        }

        let token = InviteToken::generate();
        let invitation = Invitation {
            id: Uuid::new_v4(),
            organization_id,
            email,
            role,
            status: InvitationStatus::Pending,
            invited_by: invited_by.to_string(),
            expires_at: now + ttl,
            created_at: now,
        };

        tx.execute(
            "INSERT INTO invitations (id, organization_id, email, role, token_hash, status,
                 invited_by, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                invitation.id.to_string(),
                invitation.organization_id.to_string(),
                invitation.email,
                invitation.role.as_str(),
                token.hash(),
                invitation.status.as_str(),
                invitation.invited_by,
                ts_key(invitation.expires_at),
                ts_key(invitation.created_at),
            ],
        )?;
        tx.commit()?;

        tracing::info!(
            org = %organization_id,
            invitation = %invitation.id,
            role = %invitation.role,
            "invitation created"
        );

        Ok(InvitationCreated::Created {
            invitation,
            token: token.plaintext().to_string(),
        })
    }

    /// Pending invitations of an organization, newest first. Expired ones are
    /// included; expiry only matters at acceptance time.
    pub fn list_pending_invitations(&self, organization_id: Uuid) -> Result<Vec<Invitation>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {INVITATION_COLUMNS}
             FROM invitations
             WHERE organization_id = ?1 AND status = 'pending'
             ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(params![organization_id.to_string()], row_to_invitation)?;

        let mut invitations = Vec::new();
        for row in rows {
            invitations.push(row?);
        }
        Ok(invitations)
    }

    /// Delete a pending invitation.
    pub fn revoke_invitation(&self, organization_id: Uuid, invitation_id: Uuid) -> Result<()> {
        let deleted = self.conn().execute(
            "DELETE FROM invitations
             WHERE id = ?1 AND organization_id = ?2 AND status = 'pending'",
            params![invitation_id.to_string(), organization_id.to_string()],
        )?;
        if deleted == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Redeem a token (already hashed) for the given identity.
    pub fn accept_invitation(
        &mut self,
        token_hash: &str,
        user_id: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<AcceptOutcome> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let invitation = tx
            .query_row(
                &format!(
                    "SELECT {INVITATION_COLUMNS} FROM invitations
                     WHERE token_hash = ?1 AND status = 'pending'"
                ),
                params![token_hash],
                row_to_invitation,
            )
            .optional()?;

        let Some(invitation) = invitation else {
            return Ok(AcceptOutcome::NotFound);
        };
        if invitation.is_expired_at(now) {
            return Ok(AcceptOutcome::Expired);
        }
        if invitation.email != normalize_email(email) {
            return Ok(AcceptOutcome::EmailMismatch);
        }

        let consumed = tx.execute(
            "UPDATE invitations SET status = 'accepted'
             WHERE id = ?1 AND status = 'pending'",
            params![invitation.id.to_string()],
        )?;
        if consumed != 1 {
            return Ok(AcceptOutcome::NotFound);
        }

        // An existing member keeps their role; the token is still spent.
        let membership = match active_membership(&tx, invitation.organization_id, user_id)? {
            Some(existing) => existing,
            None => upsert_membership(&tx, invitation.organization_id, user_id, invitation.role)?,
        };
        tx.commit()?;

        tracing::info!(
            org = %invitation.organization_id,
            user = user_id,
            role = %membership.role,
            "invitation accepted"
        );
        Ok(AcceptOutcome::Accepted(membership))
    }

    /// Whether any organization has an unexpired pending invitation for
    /// this email.
    pub fn has_pending_invitation(&self, email: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut stmt = self.conn().prepare(
            "SELECT expires_at FROM invitations
             WHERE email = ?1 AND status = 'pending'",
        )?;
        let rows = stmt.query_map(params![normalize_email(email)], |row| ts_at(row, 0))?;
        for expires_at in rows {
            if expires_at? > now {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn pending_for(conn: &Connection, organization_id: Uuid, email: &str) -> Result<Option<Invitation>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {INVITATION_COLUMNS} FROM invitations
                 WHERE organization_id = ?1 AND email = ?2 AND status = 'pending'"
            ),
            params![organization_id.to_string(), email],
            row_to_invitation,
        )
        .optional()?)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn row_to_invitation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Invitation> {
    Ok(Invitation {
        id: uuid_at(row, 0)?,
        organization_id: uuid_at(row, 1)?,
        email: row.get(2)?,
        role: enum_at(row, 3, Role::parse)?,
        status: enum_at(row, 4, InvitationStatus::parse)?,
        invited_by: row.get(5)?,
        expires_at: ts_at(row, 6)?,
        created_at: ts_at(row, 7)?,
    })
}
