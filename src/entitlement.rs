//! Entitlement granter: the single writer for tier, entitlement expiry, and
//! the entitlement version counter.
//!
//! Webhook ingestion, interactive verify/restore, and reconciliation all
//! converge here, so there is exactly one code path for tier transitions.
//! The version counter bumps only on an actual grant or revoke; a renewal
//! while already premium is an expiry refresh and leaves issued tokens
//! valid.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{Tier, User};

#[derive(Debug)]
pub struct EntitlementOutcome {
    pub user: User,
    /// Whether the tier actually changed (and entV was bumped).
    pub changed: bool,
}

/// Raise the user to premium with the given entitlement expiry (ms epoch).
pub fn grant(conn: &Connection, user_id: &str, valid_until: Option<i64>) -> Result<EntitlementOutcome> {
    transition(conn, user_id, Tier::Premium, valid_until)
}

/// Drop the user to free and clear the entitlement expiry.
pub fn revoke(conn: &Connection, user_id: &str) -> Result<EntitlementOutcome> {
    transition(conn, user_id, Tier::Free, None)
}

/// Update the entitlement expiry without a tier change. Never bumps the
/// entitlement version.
pub fn refresh_expiry(conn: &Connection, user_id: &str, valid_until: Option<i64>) -> Result<()> {
    if queries::update_user_valid_until(conn, user_id, valid_until)? {
        tracing::debug!(user_id, ?valid_until, "Refreshed entitlement expiry");
    }
    Ok(())
}

fn transition(
    conn: &Connection,
    user_id: &str,
    tier: Tier,
    valid_until: Option<i64>,
) -> Result<EntitlementOutcome> {
    let before = queries::get_user_by_id(conn, user_id)?
        .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))?;

    let after = queries::update_user_entitlement(conn, user_id, tier, valid_until)?
        .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))?;

    let changed = before.tier != after.tier;
    tracing::info!(
        user_id,
        before_tier = %before.tier,
        after_tier = %after.tier,
        before_ent_v = before.entitlement_version,
        after_ent_v = after.entitlement_version,
        ?valid_until,
        changed,
        "Entitlement transition"
    );

    Ok(EntitlementOutcome { user: after, changed })
}
