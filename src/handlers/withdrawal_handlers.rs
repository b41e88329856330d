// handlers/withdrawal_handlers.rs
use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use validator::Validate;

use crate::errors::{AppError, Result};
use crate::models::callback::StkCallbackEnvelope;
use crate::models::earnings::EarningsResponse;
use crate::services::withdrawal_service::{StatusReport, WithdrawalService};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct WithdrawalRequest {
    #[validate(length(min = 1, message = "user_id is required"))]
    pub user_id: String,
    #[validate(range(min = 100, message = "Minimum withdrawal is KES 100"))]
    pub amount: i64,
    #[validate(length(min = 9, message = "mpesa_number is required"))]
    pub mpesa_number: String,
}

#[derive(Debug, Serialize)]
pub struct WithdrawalResponse {
    pub success: bool,
    pub message: String,
    pub checkout_request_id: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub checkout_request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: Option<String>,
}

fn withdrawal_service(state: &AppState) -> Result<&WithdrawalService> {
    state
        .withdrawals
        .as_deref()
        .ok_or_else(|| AppError::ServiceUnavailable("M-Pesa service is not available".to_string()))
}

pub async fn initiate_withdrawal(
    State(state): State<AppState>,
    Json(request): Json<WithdrawalRequest>,
) -> Result<Json<WithdrawalResponse>> {
    info!(
        "Withdrawal request: user {} - KES {}",
        request.user_id, request.amount
    );
    request.validate()?;

    let service = withdrawal_service(&state)?;
    let receipt = service
        .withdraw(&request.user_id, request.amount, &request.mpesa_number)
        .await?;

    Ok(Json(WithdrawalResponse {
        success: true,
        message: "Withdrawal initiated. Please complete the payment on your phone.".to_string(),
        checkout_request_id: receipt.checkout_request_id,
    }))
}

/// Daraja result webhook. Acknowledges delivery once processing completes,
/// whatever the business outcome; only an unknown CheckoutRequestID is a 404.
pub async fn payment_callback(
    State(state): State<AppState>,
    Json(payload): Json<StkCallbackEnvelope>,
) -> Result<Json<serde_json::Value>> {
    let callback = &payload.body.stk_callback;
    info!(
        "M-Pesa callback for {}: ResultCode {}",
        callback.checkout_request_id, callback.result_code
    );

    let service = withdrawal_service(&state)?;
    service.handle_callback(callback).await?;

    Ok(Json(json!({ "success": true })))
}

pub async fn payment_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<serde_json::Value>> {
    let checkout_request_id = query
        .checkout_request_id
        .ok_or_else(|| AppError::validation("checkout_request_id is required"))?;

    let service = withdrawal_service(&state)?;
    match service.check_status(&checkout_request_id).await? {
        StatusReport::Terminal(transaction) => Ok(Json(json!(transaction))),
        StatusReport::Pending {
            transaction,
            mpesa_status,
        } => Ok(Json(json!({
            "status": transaction.status,
            "mpesa_status": mpesa_status,
        }))),
    }
}

pub async fn get_transactions(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<serde_json::Value>> {
    let user_id = query
        .user_id
        .ok_or_else(|| AppError::validation("user_id is required"))?;

    let service = withdrawal_service(&state)?;
    let transactions = service.list_transactions(&user_id).await?;
    let count = transactions.len();

    Ok(Json(json!({
        "transactions": transactions,
        "count": count,
    })))
}

pub async fn get_earnings(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<EarningsResponse>> {
    let user_id = query
        .user_id
        .ok_or_else(|| AppError::validation("user_id is required"))?;

    let service = withdrawal_service(&state)?;
    let earnings = service.get_earnings(&user_id).await?;

    Ok(Json(earnings.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(user_id: &str, amount: i64, mpesa_number: &str) -> WithdrawalRequest {
        WithdrawalRequest {
            user_id: user_id.to_string(),
            amount,
            mpesa_number: mpesa_number.to_string(),
        }
    }

    #[test]
    fn rejects_amount_below_minimum() {
        assert!(request("user-1", 99, "0712345678").validate().is_err());
        assert!(request("user-1", 100, "0712345678").validate().is_ok());
    }

    #[test]
    fn rejects_missing_fields() {
        assert!(request("", 200, "0712345678").validate().is_err());
        assert!(request("user-1", 200, "").validate().is_err());
    }
}
