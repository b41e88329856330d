// config.rs
use anyhow::{anyhow, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mpesa_consumer_key: String,
    pub mpesa_consumer_secret: String,
    pub mpesa_short_code: String,
    pub mpesa_passkey: String,
    pub mpesa_callback_url: String,
    pub mpesa_environment: String,
}

impl AppConfig {
    /// Fails with the missing variable's name instead of panicking, so a
    /// misconfigured gateway degrades to "disabled" even in release builds,
    /// where panics abort the process.
    pub fn try_from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |key: &str| get(key).ok_or_else(|| anyhow!("{} must be set", key));

        Ok(AppConfig {
            mpesa_consumer_key: require("MPESA_CONSUMER_KEY")?,
            mpesa_consumer_secret: require("MPESA_CONSUMER_SECRET")?,
            mpesa_short_code: require("MPESA_SHORT_CODE")?,
            mpesa_passkey: require("MPESA_PASSKEY")?,
            mpesa_callback_url: require("MPESA_CALLBACK_URL")?,
            mpesa_environment: get("MPESA_ENVIRONMENT").unwrap_or_else(|| "sandbox".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.mpesa_environment == "production"
    }

    /// (auth_url, stk_push_url, stk_query_url) for the configured environment.
    pub fn mpesa_urls(&self) -> (String, String, String) {
        let base_url = if self.is_production() {
            "https://api.safaricom.co.ke"
        } else {
            "https://sandbox.safaricom.co.ke"
        };

        let auth_url = format!("{}/oauth/v1/generate?grant_type=client_credentials", base_url);
        let stk_url = format!("{}/mpesa/stkpush/v1/processrequest", base_url);
        let query_url = format!("{}/mpesa/stkpushquery/v1/query", base_url);

        (auth_url, stk_url, query_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn full_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("MPESA_CONSUMER_KEY", "key"),
            ("MPESA_CONSUMER_SECRET", "secret"),
            ("MPESA_SHORT_CODE", "174379"),
            ("MPESA_PASSKEY", "passkey"),
            ("MPESA_CALLBACK_URL", "https://example.com/api/payments/callback"),
            ("MPESA_ENVIRONMENT", "sandbox"),
        ])
    }

    fn lookup<'a>(vars: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| vars.get(key).map(|value| value.to_string())
    }

    fn test_config(environment: &str) -> AppConfig {
        let mut vars = full_vars();
        vars.insert("MPESA_ENVIRONMENT", match environment {
            "production" => "production",
            _ => "sandbox",
        });
        AppConfig::from_lookup(lookup(&vars)).unwrap()
    }

    #[test]
    fn loads_all_required_variables() {
        let vars = full_vars();
        let config = AppConfig::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.mpesa_short_code, "174379");
        assert_eq!(config.mpesa_callback_url, "https://example.com/api/payments/callback");
        assert!(!config.is_production());
    }

    #[test]
    fn missing_variable_is_an_error_not_a_panic() {
        let mut vars = full_vars();
        vars.remove("MPESA_PASSKEY");

        let err = AppConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(err.to_string().contains("MPESA_PASSKEY"));
    }

    #[test]
    fn environment_defaults_to_sandbox() {
        let mut vars = full_vars();
        vars.remove("MPESA_ENVIRONMENT");

        let config = AppConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.mpesa_environment, "sandbox");
    }

    #[test]
    fn sandbox_urls_use_sandbox_host() {
        let (auth, stk, query) = test_config("sandbox").mpesa_urls();
        assert!(auth.starts_with("https://sandbox.safaricom.co.ke/oauth/"));
        assert!(stk.starts_with("https://sandbox.safaricom.co.ke/mpesa/stkpush/"));
        assert!(query.starts_with("https://sandbox.safaricom.co.ke/mpesa/stkpushquery/"));
    }

    #[test]
    fn production_urls_use_live_host() {
        let config = test_config("production");
        assert!(config.is_production());
        let (auth, _, _) = config.mpesa_urls();
        assert!(auth.starts_with("https://api.safaricom.co.ke/"));
    }
}
