use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use base64::Engine;
use jwt_simple::prelude::*;
use rusqlite::Connection;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::User;

use super::AccessClaims;

const ACCESS_TOKEN_TTL_SECS: u64 = 900;
const REFRESH_TOKEN_TTL_DAYS: i64 = 7;
const REFRESH_TOKEN_BYTES: usize = 32;

/// Signing/verification keys for first-party tokens.
#[derive(Clone)]
pub struct TokenKeys {
    access_key: HS256Key,
}

impl TokenKeys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            access_key: HS256Key::from_bytes(secret.as_bytes()),
        }
    }
}

/// Access/refresh pair returned to the client after verify/restore.
#[derive(Debug, Serialize)]
pub struct IssuedTokens {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
    #[serde(rename = "expiresIn")]
    pub expires_in: u64,
}

pub fn sign_access_token(keys: &TokenKeys, user: &User) -> Result<String> {
    let claims = Claims::with_custom_claims(
        AccessClaims::for_user(user),
        Duration::from_secs(ACCESS_TOKEN_TTL_SECS),
    )
    .with_issuer("timbre")
    .with_subject(&user.id);

    keys.access_key
        .authenticate(claims)
        .map_err(|e| AppError::Internal(format!("Failed to sign access token: {e}")))
}

pub fn verify_access_token(keys: &TokenKeys, token: &str) -> Result<JWTClaims<AccessClaims>> {
    keys.access_key
        .verify_token::<AccessClaims>(token, None)
        .map_err(|_| AppError::Unauthorized)
}

fn hash_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Issue a fresh access/refresh pair, persisting only the refresh hash.
pub fn issue_tokens(conn: &Connection, keys: &TokenKeys, user: &User) -> Result<IssuedTokens> {
    let access_token = sign_access_token(keys, user)?;

    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    use rand::RngCore;
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let refresh_token = BASE64_URL.encode(bytes);

    let expires_at = chrono::Utc::now().timestamp() + REFRESH_TOKEN_TTL_DAYS * 86400;
    queries::store_refresh_token(conn, &user.id, &hash_refresh_token(&refresh_token), expires_at)?;

    Ok(IssuedTokens {
        access_token,
        refresh_token,
        expires_in: ACCESS_TOKEN_TTL_SECS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tier;

    fn test_user(tier: Tier, ent_v: i64) -> User {
        User {
            id: "user-1".into(),
            email: Some("singer@example.com".into()),
            is_guest: false,
            tier,
            subscription_valid_until: Some(1_900_000_000_000),
            entitlement_version: ent_v,
            app_account_token: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn access_token_round_trips_entitlement_claims() {
        let keys = TokenKeys::from_secret("test-secret-key");
        let user = test_user(Tier::Premium, 4);

        let token = sign_access_token(&keys, &user).unwrap();
        let verified = verify_access_token(&keys, &token).unwrap();

        assert_eq!(verified.subject.as_deref(), Some("user-1"));
        assert_eq!(verified.custom.tier, Tier::Premium);
        assert_eq!(verified.custom.ent_v, 4);
        // subValidUntil is carried in seconds
        assert_eq!(verified.custom.sub_valid_until, Some(1_900_000_000));
    }

    #[test]
    fn rejects_token_signed_with_other_key() {
        let keys = TokenKeys::from_secret("test-secret-key");
        let other = TokenKeys::from_secret("other-secret");
        let token = sign_access_token(&keys, &test_user(Tier::Free, 1)).unwrap();
        assert!(verify_access_token(&other, &token).is_err());
    }
}
