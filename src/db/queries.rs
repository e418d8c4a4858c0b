use chrono::Utc;
use rusqlite::{params, types::Value, Connection};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::*;

use super::from_row::{query_all, query_one, FromRow, SUBSCRIPTION_COLS, USER_COLS, WEBHOOK_LOG_COLS};

fn now() -> i64 {
    Utc::now().timestamp()
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Builder for dynamic UPDATE statements with optional fields, keyed by an
/// arbitrary column. Combines multiple field updates into a single query.
struct UpdateBuilder {
    table: &'static str,
    key_column: &'static str,
    key: String,
    fields: Vec<(&'static str, Value)>,
}

impl UpdateBuilder {
    fn new(table: &'static str, key_column: &'static str, key: &str) -> Self {
        Self {
            table,
            key_column,
            key: key.to_string(),
            fields: Vec::new(),
        }
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Execute the update and return the updated entity via RETURNING.
    /// Returns None if no row matched or there was nothing to update.
    fn execute_returning<T: super::from_row::FromRow>(
        mut self,
        conn: &Connection,
        returning_cols: &str,
    ) -> Result<Option<T>> {
        if self.fields.is_empty() {
            return Ok(None);
        }
        self.fields.push(("updated_at", now().into()));
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.key.into());
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ? RETURNING {}",
            self.table,
            sets.join(", "),
            self.key_column,
            returning_cols
        );
        use rusqlite::OptionalExtension;
        conn.query_row(&sql, rusqlite::params_from_iter(values), T::from_row)
            .optional()
            .map_err(Into::into)
    }
}

// ============ Users ============

pub fn create_user(conn: &Connection, input: &CreateUser) -> Result<User> {
    let id = gen_id();
    let ts = now();
    conn.execute(
        "INSERT INTO users (id, email, is_guest, tier, entitlement_version, app_account_token, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'free', 1, ?4, ?5, ?5)",
        params![id, input.email, input.is_guest as i32, input.app_account_token, ts],
    )?;
    get_user_by_id(conn, &id)?.ok_or_else(|| AppError::Internal("User vanished after insert".into()))
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {USER_COLS} FROM users WHERE id = ?1"),
        &[&id],
    )
}

pub fn find_user_by_app_account_token(conn: &Connection, token: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {USER_COLS} FROM users WHERE app_account_token = ?1"),
        &[&token],
    )
}

/// Set tier and entitlement expiry, bumping the entitlement version only
/// when the tier actually changes. The bump condition is evaluated inside
/// the UPDATE so concurrent writers cannot double-bump.
pub fn update_user_entitlement(
    conn: &Connection,
    user_id: &str,
    tier: Tier,
    valid_until: Option<i64>,
) -> Result<Option<User>> {
    use rusqlite::OptionalExtension;
    conn.query_row(
        &format!(
            "UPDATE users
             SET tier = ?2,
                 subscription_valid_until = ?3,
                 entitlement_version = entitlement_version
                     + (CASE WHEN tier = ?2 THEN 0 ELSE 1 END),
                 updated_at = ?4
             WHERE id = ?1
             RETURNING {USER_COLS}"
        ),
        params![user_id, tier.to_string(), valid_until, now()],
        User::from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Pure expiry refresh: never touches tier or the entitlement version.
pub fn update_user_valid_until(
    conn: &Connection,
    user_id: &str,
    valid_until: Option<i64>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE users SET subscription_valid_until = ?2, updated_at = ?3 WHERE id = ?1",
        params![user_id, valid_until, now()],
    )?;
    Ok(affected > 0)
}

// ============ Subscriptions ============

pub fn get_subscription_by_original_transaction_id(
    conn: &Connection,
    original_transaction_id: &str,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {SUBSCRIPTION_COLS} FROM user_subscriptions WHERE original_transaction_id = ?1"
        ),
        &[&original_transaction_id],
    )
}

pub fn create_subscription(conn: &Connection, input: &CreateSubscription) -> Result<Subscription> {
    let id = gen_id();
    let ts = now();
    conn.execute(
        "INSERT INTO user_subscriptions (
            id, user_id, is_orphaned, app_account_token, original_transaction_id,
            environment, product_id, subscription_group_id, status,
            auto_renew_enabled, expires_at, last_renewal_at, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
        params![
            id,
            input.user_id,
            input.user_id.is_none() as i32,
            input.app_account_token,
            input.original_transaction_id,
            input.environment,
            input.product_id,
            input.subscription_group_id,
            input.status.to_string(),
            input.auto_renew_enabled as i32,
            input.expires_at,
            input.last_renewal_at,
            ts,
        ],
    )?;
    get_subscription_by_original_transaction_id(conn, &input.original_transaction_id)?
        .ok_or_else(|| AppError::Internal("Subscription vanished after insert".into()))
}

/// Apply a partial update to a subscription by original transaction id.
pub fn apply_subscription_patch(
    conn: &Connection,
    original_transaction_id: &str,
    patch: &SubscriptionPatch,
) -> Result<Option<Subscription>> {
    let mut builder = UpdateBuilder::new(
        "user_subscriptions",
        "original_transaction_id",
        original_transaction_id,
    )
    .set_opt("status", patch.status.map(|s| s.to_string()))
    .set_opt("expires_at", patch.expires_at)
    .set_opt(
        "auto_renew_enabled",
        patch.auto_renew_enabled.map(|b| b as i32),
    )
    .set_opt("last_renewal_at", patch.last_renewal_at)
    .set_opt("last_webhook_at", patch.last_webhook_at)
    .set_opt(
        "last_notification_uuid",
        patch.last_notification_uuid.clone(),
    );
    if let Some(user_id) = &patch.user_id {
        builder = builder.set("user_id", user_id.clone()).set("is_orphaned", 0);
    }
    builder.execute_returning(conn, SUBSCRIPTION_COLS)
}

/// Find-or-create a subscription by original transaction id, then apply a
/// partial update. All three producers (webhook, interactive verify,
/// reconciliation) go through here, so the ownership-conflict check cannot
/// be bypassed: a patch may not move a subscription from one user to
/// another.
pub fn upsert_subscription(
    conn: &Connection,
    input: &CreateSubscription,
    patch: &SubscriptionPatch,
) -> Result<Subscription> {
    match get_subscription_by_original_transaction_id(conn, &input.original_transaction_id)? {
        Some(existing) => {
            if let (Some(patch_user), Some(owner)) = (&patch.user_id, &existing.user_id) {
                if patch_user != owner {
                    return Err(AppError::SubscriptionConflict(format!(
                        "transaction {} is linked to another account",
                        existing.original_transaction_id
                    )));
                }
            }
            apply_subscription_patch(conn, &input.original_transaction_id, patch)?
                .ok_or_else(|| AppError::Internal("Subscription vanished during update".into()))
        }
        None => {
            let created = create_subscription(conn, input)?;
            Ok(apply_subscription_patch(conn, &input.original_transaction_id, patch)?
                .unwrap_or(created))
        }
    }
}

pub fn link_subscription_to_user(
    conn: &Connection,
    original_transaction_id: &str,
    user_id: &str,
) -> Result<Option<Subscription>> {
    use rusqlite::OptionalExtension;
    conn.query_row(
        &format!(
            "UPDATE user_subscriptions
             SET user_id = ?2, is_orphaned = 0, updated_at = ?3
             WHERE original_transaction_id = ?1
             RETURNING {SUBSCRIPTION_COLS}"
        ),
        params![original_transaction_id, user_id, now()],
        Subscription::from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// All subscriptions the reconciliation loop must check: every non-terminal
/// status, oldest expiry first.
pub fn subscriptions_for_reconciliation(conn: &Connection) -> Result<Vec<Subscription>> {
    query_all(
        conn,
        &format!(
            "SELECT {SUBSCRIPTION_COLS} FROM user_subscriptions
             WHERE status IN ('active', 'grace_period', 'billing_retry')
             ORDER BY expires_at ASC"
        ),
        &[],
    )
}

// ============ Webhook log ============

/// Record a notification as processed. Returns false when the uuid was
/// already present: the UNIQUE constraint resolves races between concurrent
/// deliveries, and a rejected insert is treated as "already processed".
pub fn try_record_webhook(conn: &Connection, input: &CreateWebhookLog) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_log (
            id, notification_uuid, notification_type, subtype,
            original_transaction_id, signed_date, processed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            gen_id(),
            input.notification_uuid,
            input.notification_type,
            input.subtype,
            input.original_transaction_id,
            input.signed_date,
            now(),
        ],
    )?;
    Ok(affected > 0)
}

pub fn get_webhook_log(conn: &Connection, notification_uuid: &str) -> Result<Option<WebhookLog>> {
    query_one(
        conn,
        &format!("SELECT {WEBHOOK_LOG_COLS} FROM webhook_log WHERE notification_uuid = ?1"),
        &[&notification_uuid],
    )
}

/// Delete webhook log rows older than the retention window. Has no effect
/// on subscription state.
pub fn prune_webhook_logs(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - retention_days * 86400;
    let deleted = conn.execute(
        "DELETE FROM webhook_log WHERE processed_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}

// ============ Refresh tokens ============

pub fn store_refresh_token(
    conn: &Connection,
    user_id: &str,
    token_hash: &str,
    expires_at: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![gen_id(), user_id, token_hash, expires_at, now()],
    )?;
    Ok(())
}
