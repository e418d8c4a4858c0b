//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to
/// rusqlite errors instead of panicking on corrupted data.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const USER_COLS: &str = "id, email, is_guest, tier, subscription_valid_until, \
     entitlement_version, app_account_token, created_at, updated_at";

pub const SUBSCRIPTION_COLS: &str = "id, user_id, is_orphaned, app_account_token, \
     original_transaction_id, environment, product_id, subscription_group_id, status, \
     auto_renew_enabled, expires_at, last_renewal_at, last_webhook_at, \
     last_notification_uuid, created_at, updated_at";

pub const WEBHOOK_LOG_COLS: &str = "id, notification_uuid, notification_type, subtype, \
     original_transaction_id, signed_date, processed_at";

// ============ FromRow Implementations ============

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            is_guest: row.get::<_, i32>(2)? != 0,
            tier: parse_enum(row, 3, "tier")?,
            subscription_valid_until: row.get(4)?,
            entitlement_version: row.get(5)?,
            app_account_token: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

impl FromRow for Subscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Subscription {
            id: row.get(0)?,
            user_id: row.get(1)?,
            is_orphaned: row.get::<_, i32>(2)? != 0,
            app_account_token: row.get(3)?,
            original_transaction_id: row.get(4)?,
            environment: row.get(5)?,
            product_id: row.get(6)?,
            subscription_group_id: row.get(7)?,
            status: parse_enum(row, 8, "status")?,
            auto_renew_enabled: row.get::<_, i32>(9)? != 0,
            expires_at: row.get(10)?,
            last_renewal_at: row.get(11)?,
            last_webhook_at: row.get(12)?,
            last_notification_uuid: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }
}

impl FromRow for WebhookLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(WebhookLog {
            id: row.get(0)?,
            notification_uuid: row.get(1)?,
            notification_type: row.get(2)?,
            subtype: row.get(3)?,
            original_transaction_id: row.get(4)?,
            signed_date: row.get(5)?,
            processed_at: row.get(6)?,
        })
    }
}
