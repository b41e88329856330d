// services/token_cache.rs
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::{DateTime, Duration, Utc};
use reqwest::{header, Client};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::errors::AppError;

/// Refresh this long before the provider-reported expiry, so a token handed
/// out near the end of its window is still valid for the request that uses it.
const EXPIRY_MARGIN_SECS: i64 = 60;
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3599;

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    // Daraja reports this as a string, e.g. "3599"
    expires_in: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// OAuth bearer token cache for the Daraja API. The mutex serializes the
/// check-then-refresh path so concurrent cache misses perform one exchange.
pub struct TokenCache {
    cached: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        TokenCache {
            cached: Mutex::new(None),
        }
    }

    pub async fn get_access_token(
        &self,
        client: &Client,
        config: &AppConfig,
    ) -> Result<String, AppError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.token.clone());
            }
        }

        info!("Requesting new M-Pesa access token");
        let token = Self::exchange(client, config).await?;
        let access_token = token.token.clone();
        *cached = Some(token);

        Ok(access_token)
    }

    async fn exchange(client: &Client, config: &AppConfig) -> Result<CachedToken, AppError> {
        let auth_string = format!(
            "{}:{}",
            config.mpesa_consumer_key, config.mpesa_consumer_secret
        );
        let encoded_auth = base64.encode(auth_string);

        let (auth_url, _, _) = config.mpesa_urls();

        let response = client
            .get(&auth_url)
            .header(header::AUTHORIZATION, format!("Basic {}", encoded_auth))
            .send()
            .await
            .map_err(|e| AppError::AuthError(format!("token exchange failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Failed to get access token: {} - {}", status, body);
            return Err(AppError::AuthError(format!("M-Pesa auth failed: {}", status)));
        }

        let auth_response: AuthResponse = response
            .json()
            .await
            .map_err(|e| AppError::AuthError(format!("malformed auth response: {}", e)))?;

        let lifetime_secs = auth_response
            .expires_in
            .parse::<i64>()
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);

        info!("M-Pesa access token obtained");
        Ok(CachedToken {
            token: auth_response.access_token,
            expires_at: expiry_from(Utc::now(), lifetime_secs),
        })
    }
}

fn expiry_from(now: DateTime<Utc>, lifetime_secs: i64) -> DateTime<Utc> {
    now + Duration::seconds(lifetime_secs - EXPIRY_MARGIN_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_keeps_a_one_minute_margin() {
        let now = Utc::now();
        let expires_at = expiry_from(now, 3599);
        assert_eq!(expires_at, now + Duration::seconds(3539));
    }

    #[test]
    fn token_is_fresh_until_expiry() {
        let now = Utc::now();
        let token = CachedToken {
            token: "abc".to_string(),
            expires_at: expiry_from(now, 3599),
        };

        assert!(token.is_fresh(now));
        assert!(token.is_fresh(now + Duration::seconds(3538)));
        assert!(!token.is_fresh(now + Duration::seconds(3539)));
        assert!(!token.is_fresh(now + Duration::hours(2)));
    }

    #[tokio::test]
    async fn fresh_cached_token_is_returned_without_a_network_call() {
        // Seed the cache directly; the endpoint in this config is unreachable,
        // so any refresh attempt would surface as an AuthError.
        let cache = TokenCache::new();
        {
            let mut cached = cache.cached.lock().await;
            *cached = Some(CachedToken {
                token: "cached-token".to_string(),
                expires_at: Utc::now() + Duration::hours(1),
            });
        }

        let config = AppConfig {
            mpesa_consumer_key: "key".to_string(),
            mpesa_consumer_secret: "secret".to_string(),
            mpesa_short_code: "174379".to_string(),
            mpesa_passkey: "passkey".to_string(),
            mpesa_callback_url: "https://example.com/callback".to_string(),
            mpesa_environment: "sandbox".to_string(),
        };
        let client = Client::new();

        let token = cache.get_access_token(&client, &config).await.unwrap();
        assert_eq!(token, "cached-token");

        let again = cache.get_access_token(&client, &config).await.unwrap();
        assert_eq!(again, "cached-token");
    }
}
