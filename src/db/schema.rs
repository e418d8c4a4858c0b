use rusqlite::Connection;

/// Initialize the database schema.
///
/// Instants that originate from Apple payloads (expiry, renewal, webhook
/// times) are stored as Unix epoch milliseconds; row bookkeeping
/// (created_at/updated_at) is epoch seconds.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Users (entitlement-relevant fields only; identity lives elsewhere)
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT UNIQUE,
            is_guest INTEGER NOT NULL DEFAULT 0,
            tier TEXT NOT NULL DEFAULT 'free' CHECK (tier IN ('free', 'premium')),
            subscription_valid_until INTEGER,
            entitlement_version INTEGER NOT NULL DEFAULT 1,
            app_account_token TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_users_app_account_token ON users(app_account_token);

        -- Subscriptions: one row per purchase lineage (original transaction).
        -- Never hard-deleted; user deletion leaves the row orphaned.
        CREATE TABLE IF NOT EXISTS user_subscriptions (
            id TEXT PRIMARY KEY,
            user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
            is_orphaned INTEGER NOT NULL DEFAULT 0,
            app_account_token TEXT,
            original_transaction_id TEXT NOT NULL UNIQUE,
            environment TEXT NOT NULL,
            product_id TEXT NOT NULL,
            subscription_group_id TEXT,
            status TEXT NOT NULL CHECK (status IN ('active', 'billing_retry', 'grace_period', 'expired', 'revoked')),
            auto_renew_enabled INTEGER NOT NULL DEFAULT 1,
            expires_at INTEGER NOT NULL,
            last_renewal_at INTEGER,
            last_webhook_at INTEGER,
            last_notification_uuid TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON user_subscriptions(user_id);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_token ON user_subscriptions(app_account_token);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_status ON user_subscriptions(status, expires_at);

        -- Webhook dedup log. The UNIQUE notification_uuid is the idempotency
        -- gate: duplicates are resolved by the failed insert, not by a
        -- check-then-insert in application code.
        CREATE TABLE IF NOT EXISTS webhook_log (
            id TEXT PRIMARY KEY,
            notification_uuid TEXT NOT NULL UNIQUE,
            notification_type TEXT NOT NULL,
            subtype TEXT,
            original_transaction_id TEXT NOT NULL,
            signed_date INTEGER,
            processed_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_log_processed ON webhook_log(processed_at);

        -- Refresh tokens (hashes only)
        CREATE TABLE IF NOT EXISTS refresh_tokens (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            token_hash TEXT NOT NULL UNIQUE,
            expires_at INTEGER NOT NULL,
            revoked_at INTEGER,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user ON refresh_tokens(user_id);
        "#,
    )?;
    Ok(())
}
