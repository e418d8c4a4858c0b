mod from_row;
pub mod queries;
mod schema;

pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::appstore::AppStoreClient;
use crate::jwt::TokenKeys;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// App Store Server API client (reconciliation only).
    pub app_store: Arc<AppStoreClient>,
    /// "Production" or "Sandbox"; receipts from the other environment are
    /// rejected on the interactive verify path.
    pub expected_environment: String,
    /// Static key protecting the admin reconcile trigger.
    pub admin_api_key: Option<String>,
    pub token_keys: TokenKeys,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}
