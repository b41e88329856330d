// models/transaction.rs
use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

pub const TRANSACTIONS_COLLECTION: &str = "withdrawal_transactions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Withdrawal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Initiated,
    PendingConfirmation,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }

    /// Wire value, matches the serde rename above. Used in `doc!` filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Initiated => "initiated",
            TransactionStatus::PendingConfirmation => "pending_confirmation",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalTransaction {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub user_id: String,
    pub transaction_type: TransactionType,
    /// Whole KES, no sub-unit handling.
    pub amount: i64,
    /// Destination number as submitted by the user, before normalization.
    pub mpesa_number: String,

    pub status: TransactionStatus,

    // Provider correlation ids, present once the gateway accepts the push
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_request_id: Option<String>,

    // Populated on a successful callback only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpesa_receipt_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_phone_number: Option<String>,

    // Populated on failure only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl WithdrawalTransaction {
    pub fn new(user_id: &str, amount: i64, mpesa_number: &str) -> Self {
        WithdrawalTransaction {
            id: Some(ObjectId::new()),
            user_id: user_id.to_string(),
            transaction_type: TransactionType::Withdrawal,
            amount,
            mpesa_number: mpesa_number.to_string(),
            status: TransactionStatus::Initiated,
            checkout_request_id: None,
            merchant_request_id: None,
            mpesa_receipt_number: None,
            confirmed_phone_number: None,
            failure_reason: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
            failed_at: None,
        }
    }
}
