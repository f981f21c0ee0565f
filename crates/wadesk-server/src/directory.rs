//! Organization directory: which tenant does this request act on?
//!
//! Authorization is re-derived from the membership table on every request.
//! An organization hint (`?org=` or `x-organization-id`, by id or slug) only
//! picks among the caller's own active memberships; a hint to anything else
//! silently falls back to the first membership.

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use wadesk_shared::identity::VerifiedIdentity;
use wadesk_shared::Role;
use wadesk_store::{Membership, Organization};

use crate::api::AppState;
use crate::auth::Identity;
use crate::db::SharedDatabase;
use crate::error::ServerError;

pub const ORG_HINT_HEADER: &str = "x-organization-id";

/// The organization a request acts on, and the caller's role in it.
#[derive(Debug, Clone, Serialize)]
pub struct Resolved {
    #[serde(skip)]
    pub identity: VerifiedIdentity,
    pub organization: Organization,
    pub membership: Membership,
}

impl Resolved {
    pub fn role(&self) -> Role {
        self.membership.role
    }
}

/// Resolve the caller's organization.
pub async fn resolve_membership(
    db: &SharedDatabase,
    identity: &VerifiedIdentity,
    hint: Option<&str>,
) -> Result<Resolved, ServerError> {
    let user_id = identity.user_id.clone();
    let email = identity.normalized_email();

    let (memberships, pending_invitation) = db
        .call(move |db| {
            let memberships = db.active_memberships_for_user(&user_id)?;
            let pending = memberships.is_empty() && db.has_pending_invitation(&email, Utc::now())?;
            Ok((memberships, pending))
        })
        .await?;

    let (organization, membership) =
        select_membership(memberships, hint).ok_or(ServerError::NoMembership { pending_invitation })?;

    Ok(Resolved {
        identity: identity.clone(),
        organization,
        membership,
    })
}

/// Pick the hinted membership if the caller holds it, else the first one.
fn select_membership(
    memberships: Vec<(Organization, Membership)>,
    hint: Option<&str>,
) -> Option<(Organization, Membership)> {
    let hint = hint.map(str::trim).filter(|h| !h.is_empty());
    if let Some(hint) = hint {
        let hinted = memberships.iter().position(|(org, _)| {
            org.id.to_string().eq_ignore_ascii_case(hint) || org.slug.eq_ignore_ascii_case(hint)
        });
        if let Some(idx) = hinted {
            return memberships.into_iter().nth(idx);
        }
        tracing::debug!(hint, "organization hint not held by caller, falling back");
    }
    memberships.into_iter().next()
}

/// Fail with `Forbidden` unless the caller holds one of `roles`.
pub fn require_role(resolved: &Resolved, roles: &[Role]) -> Result<(), ServerError> {
    if roles.contains(&resolved.role()) {
        Ok(())
    } else {
        Err(ServerError::Forbidden(format!(
            "role `{}` may not perform this action",
            resolved.role()
        )))
    }
}

/// Owners and admins.
pub const MANAGERS: &[Role] = &[Role::Owner, Role::Admin];

#[derive(Debug, Deserialize)]
struct OrgHint {
    org: Option<String>,
}

fn org_hint(parts: &Parts) -> Option<String> {
    if let Some(value) = parts
        .headers
        .get(ORG_HINT_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        return Some(value.to_string());
    }
    Query::<OrgHint>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(hint)| hint.org)
}

#[axum::async_trait]
impl FromRequestParts<AppState> for Resolved {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Identity(identity) = Identity::from_request_parts(parts, state).await?;
        let hint = org_hint(parts);
        resolve_membership(&state.db, &identity, hint.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use wadesk_store::{Database, NewOrganization};

    fn identity(user_id: &str, email: &str) -> VerifiedIdentity {
        VerifiedIdentity {
            user_id: user_id.into(),
            email: email.into(),
        }
    }

    fn seed() -> (SharedDatabase, Organization, Organization) {
        let mut db = Database::open_in_memory().unwrap();
        let (alpha, _) = db
            .create_organization_with_owner(
                &NewOrganization {
                    name: "Alpha".into(),
                    slug: "alpha".into(),
                    gateway_session_name: Some("alpha".into()),
                    ..Default::default()
                },
                "user-1",
            )
            .unwrap();
        let beta = db
            .create_organization(&NewOrganization {
                name: "Beta".into(),
                slug: "beta".into(),
                gateway_session_name: Some("beta".into()),
                ..Default::default()
            })
            .unwrap();
        db.add_membership(beta.id, "user-1", Role::Member).unwrap();
        (SharedDatabase::new(db), alpha, beta)
    }

    #[tokio::test]
    async fn no_hint_picks_first_membership() {
        let (db, alpha, _) = seed();
        let resolved = resolve_membership(&db, &identity("user-1", "a@x.io"), None)
            .await
            .unwrap();
        assert_eq!(resolved.organization.id, alpha.id);
        assert_eq!(resolved.role(), Role::Owner);
    }

    #[tokio::test]
    async fn hint_selects_held_organization() {
        let (db, _, beta) = seed();
        let by_slug = resolve_membership(&db, &identity("user-1", "a@x.io"), Some("beta"))
            .await
            .unwrap();
        assert_eq!(by_slug.organization.id, beta.id);

        let by_id = resolve_membership(&db, &identity("user-1", "a@x.io"), Some(&beta.id.to_string()))
            .await
            .unwrap();
        assert_eq!(by_id.membership.role, Role::Member);
    }

    #[tokio::test]
    async fn foreign_hint_falls_back() {
        let (db, alpha, _) = seed();
        let stranger_org = db
            .call(|db| {
                db.create_organization(&NewOrganization {
                    name: "Gamma".into(),
                    slug: "gamma".into(),
                    gateway_session_name: Some("gamma".into()),
                    ..Default::default()
                })
            })
            .await
            .unwrap();

        let resolved = resolve_membership(
            &db,
            &identity("user-1", "a@x.io"),
            Some(&stranger_org.id.to_string()),
        )
        .await
        .unwrap();
        assert_eq!(resolved.organization.id, alpha.id);
    }

    #[tokio::test]
    async fn no_membership_reports_pending_invitation() {
        let (db, alpha, _) = seed();

        let err = resolve_membership(&db, &identity("user-2", "bob@x.io"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServerError::NoMembership {
                pending_invitation: false
            }
        ));

        db.call(move |db| {
            db.create_invitation(alpha.id, "bob@x.io", Role::Member, "user-1", Duration::hours(1))
        })
        .await
        .unwrap();

        let err = resolve_membership(&db, &identity("user-2", "Bob@X.io"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServerError::NoMembership {
                pending_invitation: true
            }
        ));
    }

    #[tokio::test]
    async fn require_role_checks_membership_role() {
        let (db, _, _) = seed();
        let member = resolve_membership(&db, &identity("user-1", "a@x.io"), Some("beta"))
            .await
            .unwrap();
        assert!(matches!(
            require_role(&member, MANAGERS),
            Err(ServerError::Forbidden(_))
        ));
        assert!(require_role(&member, &[Role::Member]).is_ok());
    }
}
