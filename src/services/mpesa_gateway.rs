// services/mpesa_gateway.rs
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::services::token_cache::TokenCache;

#[derive(Debug, Serialize)]
struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    business_short_code: String,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "TransactionType")]
    transaction_type: String,
    #[serde(rename = "Amount")]
    amount: String,
    #[serde(rename = "PartyA")]
    party_a: String,
    #[serde(rename = "PartyB")]
    party_b: String,
    #[serde(rename = "PhoneNumber")]
    phone_number: String,
    #[serde(rename = "CallBackURL")]
    callback_url: String,
    #[serde(rename = "AccountReference")]
    account_reference: String,
    #[serde(rename = "TransactionDesc")]
    transaction_desc: String,
}

#[derive(Debug, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: String,
}

#[derive(Debug, Serialize)]
struct StkQueryRequest {
    #[serde(rename = "BusinessShortCode")]
    business_short_code: String,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
}

/// The Daraja request signature: a `YYYYMMDDHHmmss` timestamp and the base64
/// of `shortcode + passkey + timestamp`. The provider recomputes and validates
/// this server-side, so the derivation must match bit-for-bit.
pub fn signature(
    short_code: &str,
    passkey: &str,
    now: DateTime<Utc>,
) -> (String, String) {
    let timestamp = now.format("%Y%m%d%H%M%S").to_string();
    let password = base64.encode(format!("{}{}{}", short_code, passkey, timestamp));
    (timestamp, password)
}

/// Rewrites a leading-zero Kenyan subscriber number to international form.
/// Numbers that match neither pattern pass through unchanged; the caller owns
/// supplying a valid subscriber number.
pub fn format_phone_number(phone: &str) -> String {
    let phone = phone.trim();
    if phone.starts_with("254") && phone.len() == 12 {
        return phone.to_string();
    }
    if phone.starts_with("07") && phone.len() == 10 {
        return format!("254{}", &phone[1..]);
    }
    if phone.starts_with('7') && phone.len() == 9 {
        return format!("254{}", phone);
    }
    phone.to_string()
}

pub struct MpesaGateway {
    config: AppConfig,
    client: Client,
    token_cache: TokenCache,
}

impl MpesaGateway {
    pub fn new(config: AppConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::gateway(format!("failed to create HTTP client: {}", e)))?;

        Ok(MpesaGateway {
            config,
            client,
            token_cache: TokenCache::new(),
        })
    }

    pub async fn get_access_token(&self) -> Result<String, AppError> {
        self.token_cache
            .get_access_token(&self.client, &self.config)
            .await
    }

    /// Issues the STK push. A single signed POST, no retries; a non-2xx
    /// response is the caller's problem.
    pub async fn initiate_stk_push(
        &self,
        phone_number: &str,
        amount: i64,
        account_reference: &str,
        transaction_desc: &str,
    ) -> Result<StkPushResponse, AppError> {
        let access_token = self.get_access_token().await?;
        let formatted_phone = format_phone_number(phone_number);
        let (timestamp, password) = signature(
            &self.config.mpesa_short_code,
            &self.config.mpesa_passkey,
            Utc::now(),
        );

        let (_, stk_url, _) = self.config.mpesa_urls();

        let stk_request = StkPushRequest {
            business_short_code: self.config.mpesa_short_code.clone(),
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount: amount.to_string(),
            party_a: formatted_phone.clone(),
            party_b: self.config.mpesa_short_code.clone(),
            phone_number: formatted_phone,
            callback_url: self.config.mpesa_callback_url.clone(),
            account_reference: account_reference.to_string(),
            transaction_desc: transaction_desc.to_string(),
        };

        let response = self
            .client
            .post(&stk_url)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&stk_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("STK push failed: {} - {}", status, body);
            return Err(AppError::gateway(format!("STK push failed: {}", status)));
        }

        let stk_response: StkPushResponse = response
            .json()
            .await
            .map_err(|e| AppError::gateway(format!("malformed STK push response: {}", e)))?;

        info!("STK push accepted: {}", stk_response.checkout_request_id);
        Ok(stk_response)
    }

    /// Queries the provider's view of a push. Returned raw; interpreting the
    /// payload is the caller's job, and nothing local is mutated here.
    pub async fn query_status(
        &self,
        checkout_request_id: &str,
    ) -> Result<serde_json::Value, AppError> {
        let access_token = self.get_access_token().await?;
        let (timestamp, password) = signature(
            &self.config.mpesa_short_code,
            &self.config.mpesa_passkey,
            Utc::now(),
        );

        let (_, _, query_url) = self.config.mpesa_urls();

        let query_request = StkQueryRequest {
            business_short_code: self.config.mpesa_short_code.clone(),
            password,
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        let response = self
            .client
            .post(&query_url)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&query_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("STK query failed: {} - {}", status, body);
            return Err(AppError::gateway(format!("STK query failed: {}", status)));
        }

        let payload = response
            .json()
            .await
            .map_err(|e| AppError::gateway(format!("malformed STK query response: {}", e)))?;

        Ok(payload)
    }
}
