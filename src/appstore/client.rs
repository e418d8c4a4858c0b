//! App Store Server API client used by the reconciliation loop.
//!
//! Authenticates with a short-lived self-signed ES256 service token (a
//! separate signing key from receipt verification). The token is cached and
//! regenerated before its 20-minute expiry.

use std::sync::Mutex;
use std::time::Duration as StdDuration;

use jwt_simple::prelude::*;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::AppStoreCredentials;
use crate::error::{AppError, Result};

const PRODUCTION_BASE_URL: &str = "https://api.storekit.itunes.apple.com";
const SANDBOX_BASE_URL: &str = "https://api.storekit-sandbox.itunes.apple.com";

/// Service token lifetime. Apple rejects tokens valid for more than 20
/// minutes; regenerate one minute early to stay clear of clock skew.
const TOKEN_LIFETIME_SECS: u64 = 20 * 60;
const TOKEN_REFRESH_MARGIN_SECS: u64 = 60;

/// Outbound request timeout so one hanging call cannot stall a
/// reconciliation batch.
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    data: Vec<SubscriptionGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionGroup {
    #[serde(default)]
    last_transactions: Vec<LastTransaction>,
}

/// The most recent transaction Apple reports for a subscription group.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastTransaction {
    /// Numeric status code, see `appstore::status::status_from_code`.
    pub status: i64,
    pub signed_transaction_info: Option<String>,
    pub signed_renewal_info: Option<String>,
}

pub struct AppStoreClient {
    client: reqwest::Client,
    credentials: AppStoreCredentials,
    cached_token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    token: String,
    expires_at: u64,
}

impl AppStoreClient {
    pub fn new(credentials: AppStoreCredentials) -> Self {
        let client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            credentials,
            cached_token: Mutex::new(None),
        }
    }

    /// Fetch the current subscription status for an original transaction id.
    ///
    /// Returns `Ok(None)` when Apple reports 404 or an empty group: absence
    /// of information, not evidence of revocation.
    pub async fn subscription_status(
        &self,
        original_transaction_id: &str,
        environment: &str,
    ) -> Result<Option<LastTransaction>> {
        let base = if environment == "Production" {
            PRODUCTION_BASE_URL
        } else {
            SANDBOX_BASE_URL
        };
        let url = format!("{base}/inApps/v1/subscriptions/{original_transaction_id}");

        let token = self.service_token()?;
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("App Store API request failed: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "App Store API error: {}",
                response.status()
            )));
        }

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse App Store response: {e}")))?;

        Ok(body
            .data
            .into_iter()
            .next()
            .and_then(|group| group.last_transactions.into_iter().next()))
    }

    /// A bearer token for the App Store Server API, cached until shortly
    /// before expiry.
    fn service_token(&self) -> Result<String> {
        let now = Clock::now_since_epoch().as_secs();

        let mut cached = self
            .cached_token
            .lock()
            .map_err(|_| AppError::Internal("service token cache poisoned".into()))?;
        if let Some(entry) = cached.as_ref() {
            if now + TOKEN_REFRESH_MARGIN_SECS < entry.expires_at {
                return Ok(entry.token.clone());
            }
        }

        let key_pair = ES256KeyPair::from_pem(&self.credentials.private_key)
            .map_err(|e| AppError::Internal(format!("Invalid App Store signing key: {e}")))?
            .with_key_id(&self.credentials.key_id);

        let claims = Claims::create(Duration::from_secs(TOKEN_LIFETIME_SECS))
            .with_issuer(&self.credentials.issuer_id)
            .with_audience("appstoreconnect-v1")
            .with_subject(&self.credentials.bundle_id);

        let token = key_pair
            .sign(claims)
            .map_err(|e| AppError::Internal(format!("Failed to sign service token: {e}")))?;

        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at: now + TOKEN_LIFETIME_SECS,
        });

        Ok(token)
    }
}
