use std::env;

/// Credentials for the App Store Server API service token. This signing key
/// is distinct from anything used for receipt verification.
#[derive(Debug, Clone)]
pub struct AppStoreCredentials {
    pub issuer_id: String,
    pub key_id: String,
    /// PKCS#8 PEM; escaped newlines from .env files are unescaped at load.
    pub private_key: String,
    pub bundle_id: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub dev_mode: bool,
    /// Environment receipts must come from: "Production" unless dev mode.
    pub expected_environment: String,
    /// Secret for first-party access tokens (HS256).
    pub jwt_secret: String,
    /// Key for POST /admin/subscriptions/reconcile. Unset disables the route.
    pub admin_api_key: Option<String>,
    pub app_store: AppStoreCredentials,
    /// Requests per minute per IP for the interactive verify/restore
    /// endpoints.
    pub rate_limit_rpm: u32,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("TIMBRE_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let expected_environment = if dev_mode {
            "Sandbox".to_string()
        } else {
            "Production".to_string()
        };

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "timbre.db".to_string()),
            dev_mode,
            expected_environment,
            jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| {
                tracing::warn!("JWT_SECRET not set, using an ephemeral dev secret");
                uuid::Uuid::new_v4().to_string()
            }),
            admin_api_key: env::var("ADMIN_API_KEY").ok(),
            app_store: AppStoreCredentials {
                issuer_id: env::var("APPLE_ISSUER_ID").unwrap_or_default(),
                key_id: env::var("APPLE_KEY_ID").unwrap_or_default(),
                private_key: env::var("APPLE_PRIVATE_KEY")
                    .unwrap_or_default()
                    .replace("\\n", "\n"),
                bundle_id: env::var("APPLE_BUNDLE_ID").unwrap_or_default(),
            },
            rate_limit_rpm: env::var("RATE_LIMIT_RPM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
