// services/withdrawal_service.rs
//
// The withdrawal workflow: balance-checked initiation, STK push, callback
// finalization, and on-demand status reconciliation against the gateway.
use chrono::Utc;
use futures_util::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId},
    Collection, Database,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::errors::{AppError, Result};
use crate::models::callback::StkCallback;
use crate::models::earnings::{
    release_reservation, reserve_funds, settle_withdrawal, UserEarnings, EARNINGS_COLLECTION,
};
use crate::models::transaction::{
    TransactionStatus, WithdrawalTransaction, TRANSACTIONS_COLLECTION,
};
use crate::services::mpesa_gateway::MpesaGateway;

pub const MIN_WITHDRAWAL_KES: i64 = 100;

const TRANSACTION_DESC: &str = "Pillar Page withdrawal";

#[derive(Debug)]
pub struct WithdrawalReceipt {
    pub checkout_request_id: String,
    pub customer_message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    Completed,
    Failed,
    /// The transaction was already terminal; the delivery was acknowledged
    /// without re-applying any ledger effect.
    Duplicate,
}

#[derive(Debug)]
pub enum StatusReport {
    /// Terminal locally; the gateway is not contacted.
    Terminal(WithdrawalTransaction),
    /// Still in flight; the provider's raw view rides along for the caller to
    /// interpret. Nothing local is mutated on this path.
    Pending {
        transaction: WithdrawalTransaction,
        mpesa_status: serde_json::Value,
    },
}

/// Terminal transition decided for a provider callback against the locally
/// stored status. The decision is pure; `handle_callback` applies it with a
/// checked-and-set store update.
#[derive(Debug, PartialEq, Eq)]
enum Finalization {
    Complete { confirmed_amount: i64 },
    Fail,
    /// Already terminal locally: acknowledge, apply no ledger effect.
    AlreadyTerminal,
}

fn finalize(
    status: TransactionStatus,
    held_amount: i64,
    callback: &StkCallback,
) -> Finalization {
    if status.is_terminal() {
        return Finalization::AlreadyTerminal;
    }

    if callback.is_success() {
        let confirmed_amount = callback
            .callback_metadata
            .as_ref()
            .and_then(|metadata| metadata.amount())
            .unwrap_or(held_amount);
        Finalization::Complete { confirmed_amount }
    } else {
        Finalization::Fail
    }
}

pub struct WithdrawalService {
    db: Database,
    gateway: Arc<MpesaGateway>,
}

impl WithdrawalService {
    pub fn new(db: Database, gateway: Arc<MpesaGateway>) -> Self {
        WithdrawalService { db, gateway }
    }

    fn transactions(&self) -> Collection<WithdrawalTransaction> {
        self.db.collection(TRANSACTIONS_COLLECTION)
    }

    fn earnings(&self) -> Collection<UserEarnings> {
        self.db.collection(EARNINGS_COLLECTION)
    }

    /// Initiates a withdrawal. Preconditions are checked in order and reject
    /// with no side effect; funds are reserved (`available -> pending`) with a
    /// conditional atomic update before the push, and credited back if the
    /// gateway rejects it.
    pub async fn withdraw(
        &self,
        user_id: &str,
        amount: i64,
        mpesa_number: &str,
    ) -> Result<WithdrawalReceipt> {
        if user_id.is_empty() || mpesa_number.is_empty() {
            return Err(AppError::validation("user_id and mpesa_number are required"));
        }
        if amount < MIN_WITHDRAWAL_KES {
            return Err(AppError::validation(format!(
                "Minimum withdrawal is KES {}",
                MIN_WITHDRAWAL_KES
            )));
        }

        let ledger = self
            .earnings()
            .find_one(doc! { "user_id": user_id })
            .await?
            .ok_or_else(|| AppError::LedgerNotFound(user_id.to_string()))?;

        if !ledger.can_withdraw(amount) {
            return Err(AppError::InsufficientBalance {
                requested: amount,
                available: ledger.available,
            });
        }

        let tx = WithdrawalTransaction::new(user_id, amount, mpesa_number);
        let tx_id = tx.id.unwrap_or_else(ObjectId::new);
        self.transactions().insert_one(&tx).await?;
        info!("Withdrawal {} initiated for user {}", tx_id.to_hex(), user_id);

        // The filter re-checks the balance at debit time, closing the
        // check-then-act window against concurrent withdrawals.
        let reserved = self
            .earnings()
            .find_one_and_update(
                doc! { "user_id": user_id, "available": { "$gte": amount } },
                reserve_funds(amount, Utc::now()),
            )
            .await?;

        if reserved.is_none() {
            warn!(
                "Concurrent withdrawal drained balance for user {}; rejecting {}",
                user_id,
                tx_id.to_hex()
            );
            self.mark_failed(tx_id, "balance changed during initiation")
                .await?;

            // Re-read so the rejection reports the balance as it stands now,
            // not the stale pre-check value or a placeholder.
            let available = self
                .get_earnings(user_id)
                .await
                .map(|ledger| ledger.available)
                .unwrap_or_default();
            return Err(AppError::InsufficientBalance {
                requested: amount,
                available,
            });
        }

        let account_reference = tx_id.to_hex();
        match self
            .gateway
            .initiate_stk_push(mpesa_number, amount, &account_reference, TRANSACTION_DESC)
            .await
        {
            Ok(push) => {
                self.transactions()
                    .update_one(
                        doc! { "_id": tx_id },
                        doc! { "$set": {
                            "status": TransactionStatus::PendingConfirmation.as_str(),
                            "checkout_request_id": &push.checkout_request_id,
                            "merchant_request_id": &push.merchant_request_id,
                        }},
                    )
                    .await?;

                info!(
                    "Withdrawal {} pending confirmation ({})",
                    tx_id.to_hex(),
                    push.checkout_request_id
                );
                Ok(WithdrawalReceipt {
                    checkout_request_id: push.checkout_request_id,
                    customer_message: push.customer_message,
                })
            }
            Err(e) => {
                error!("STK push for withdrawal {} failed: {}", tx_id.to_hex(), e);

                // Compensating credit: the push never reached the customer, so
                // the reservation is returned in full.
                self.earnings()
                    .update_one(
                        doc! { "user_id": user_id },
                        release_reservation(amount, Utc::now()),
                    )
                    .await?;
                self.mark_failed(tx_id, &e.to_string()).await?;

                Err(e)
            }
        }
    }

    /// Finalizes a transaction from the provider's asynchronous result. The
    /// terminal transition is a checked-and-set update whose filter only
    /// matches non-terminal statuses, so redelivered callbacks are no-ops.
    pub async fn handle_callback(&self, callback: &StkCallback) -> Result<CallbackOutcome> {
        let checkout_request_id = callback.checkout_request_id.as_str();

        let tx = self
            .transactions()
            .find_one(doc! { "checkout_request_id": checkout_request_id })
            .await?
            .ok_or_else(|| AppError::TransactionNotFound(checkout_request_id.to_string()))?;

        let non_terminal = doc! { "$in": [
            TransactionStatus::Initiated.as_str(),
            TransactionStatus::PendingConfirmation.as_str(),
        ]};

        match finalize(tx.status, tx.amount, callback) {
            Finalization::AlreadyTerminal => {
                info!(
                    "Duplicate callback for {} ignored (already {})",
                    checkout_request_id,
                    tx.status.as_str()
                );
                Ok(CallbackOutcome::Duplicate)
            }
            Finalization::Complete { confirmed_amount } => {
                let metadata = callback.callback_metadata.as_ref();
                let mut set = doc! {
                    "status": TransactionStatus::Completed.as_str(),
                    "completed_at": Utc::now().to_rfc3339(),
                };
                if let Some(receipt) = metadata.and_then(|m| m.receipt_number()) {
                    set.insert("mpesa_receipt_number", receipt);
                }
                if let Some(phone) = metadata.and_then(|m| m.phone_number()) {
                    set.insert("confirmed_phone_number", phone);
                }

                let transitioned = self
                    .transactions()
                    .find_one_and_update(
                        doc! { "checkout_request_id": checkout_request_id, "status": non_terminal },
                        doc! { "$set": set },
                    )
                    .await?;

                if transitioned.is_none() {
                    return Ok(CallbackOutcome::Duplicate);
                }

                // Settle: the in-flight hold becomes a confirmed payout.
                self.earnings()
                    .update_one(
                        doc! { "user_id": &tx.user_id },
                        settle_withdrawal(tx.amount, confirmed_amount, Utc::now()),
                    )
                    .await?;

                info!(
                    "Withdrawal {} completed, KES {} paid out to user {}",
                    checkout_request_id, confirmed_amount, tx.user_id
                );
                Ok(CallbackOutcome::Completed)
            }
            Finalization::Fail => {
                let transitioned = self
                    .transactions()
                    .find_one_and_update(
                        doc! { "checkout_request_id": checkout_request_id, "status": non_terminal },
                        doc! { "$set": {
                            "status": TransactionStatus::Failed.as_str(),
                            "failure_reason": &callback.result_desc,
                            "failed_at": Utc::now().to_rfc3339(),
                        }},
                    )
                    .await?;

                if transitioned.is_none() {
                    return Ok(CallbackOutcome::Duplicate);
                }

                // The hold is released back to the withdrawable balance.
                self.earnings()
                    .update_one(
                        doc! { "user_id": &tx.user_id },
                        release_reservation(tx.amount, Utc::now()),
                    )
                    .await?;

                warn!(
                    "Withdrawal {} failed for user {}: {}",
                    checkout_request_id, tx.user_id, callback.result_desc
                );
                Ok(CallbackOutcome::Failed)
            }
        }
    }

    /// On-demand reconciliation. Terminal transactions answer locally;
    /// otherwise the gateway is queried and its payload surfaced unchanged.
    /// Finalization authority stays with the callback handler.
    pub async fn check_status(&self, checkout_request_id: &str) -> Result<StatusReport> {
        let tx = self
            .transactions()
            .find_one(doc! { "checkout_request_id": checkout_request_id })
            .await?
            .ok_or_else(|| AppError::TransactionNotFound(checkout_request_id.to_string()))?;

        if tx.status.is_terminal() {
            return Ok(StatusReport::Terminal(tx));
        }

        let mpesa_status = self.gateway.query_status(checkout_request_id).await?;
        Ok(StatusReport::Pending {
            transaction: tx,
            mpesa_status,
        })
    }

    /// Withdrawal history for a user, newest first.
    pub async fn list_transactions(&self, user_id: &str) -> Result<Vec<WithdrawalTransaction>> {
        let cursor = self
            .transactions()
            .find(doc! { "user_id": user_id })
            .await?;
        let mut transactions: Vec<WithdrawalTransaction> = cursor.try_collect().await?;

        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(transactions)
    }

    pub async fn get_earnings(&self, user_id: &str) -> Result<UserEarnings> {
        self.earnings()
            .find_one(doc! { "user_id": user_id })
            .await?
            .ok_or_else(|| AppError::LedgerNotFound(user_id.to_string()))
    }

    async fn mark_failed(&self, tx_id: ObjectId, error: &str) -> Result<()> {
        self.transactions()
            .update_one(
                doc! { "_id": tx_id },
                doc! { "$set": {
                    "status": TransactionStatus::Failed.as_str(),
                    "error": error,
                    "failed_at": Utc::now().to_rfc3339(),
                }},
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    // Connecting is lazy in the MongoDB driver, and the short server-selection
    // timeout turns any accidental store access into a fast test failure.
    async fn service_without_backends() -> WithdrawalService {
        let client = mongodb::Client::with_uri_str(
            "mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=100&connectTimeoutMS=100",
        )
        .await
        .unwrap();

        let config = AppConfig {
            mpesa_consumer_key: "key".to_string(),
            mpesa_consumer_secret: "secret".to_string(),
            mpesa_short_code: "174379".to_string(),
            mpesa_passkey: "passkey".to_string(),
            mpesa_callback_url: "https://example.com/api/payments/callback".to_string(),
            mpesa_environment: "sandbox".to_string(),
        };
        let gateway = Arc::new(MpesaGateway::new(config).unwrap());

        WithdrawalService::new(client.database("pillardb_test"), gateway)
    }

    #[tokio::test]
    async fn withdraw_rejects_below_minimum_before_any_store_access() {
        let service = service_without_backends().await;

        let err = service.withdraw("user-1", 99, "0712345678").await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn withdraw_rejects_missing_fields_before_any_store_access() {
        let service = service_without_backends().await;

        let err = service.withdraw("", 200, "0712345678").await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));

        let err = service.withdraw("user-1", 200, "").await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    use crate::models::callback::{CallbackItem, CallbackMetadata};
    use serde_json::json;

    fn stk_callback(result_code: i32, metadata: Option<CallbackMetadata>) -> StkCallback {
        StkCallback {
            merchant_request_id: "29115-34620561-1".to_string(),
            checkout_request_id: "ws_CO_191220191020363925".to_string(),
            result_code,
            result_desc: if result_code == 0 {
                "The service request is processed successfully.".to_string()
            } else {
                "Insufficient funds".to_string()
            },
            callback_metadata: metadata,
        }
    }

    fn success_metadata(amount: i64) -> CallbackMetadata {
        CallbackMetadata {
            items: vec![
                CallbackItem {
                    name: "Amount".to_string(),
                    value: json!(amount),
                },
                CallbackItem {
                    name: "MpesaReceiptNumber".to_string(),
                    value: json!("ABC123"),
                },
            ],
        }
    }

    #[test]
    fn first_success_delivery_settles_the_confirmed_amount() {
        let callback = stk_callback(0, Some(success_metadata(200)));

        let decision = finalize(TransactionStatus::PendingConfirmation, 200, &callback);
        assert_eq!(
            decision,
            Finalization::Complete {
                confirmed_amount: 200
            }
        );
    }

    #[test]
    fn redelivered_success_callback_applies_no_ledger_effect() {
        let callback = stk_callback(0, Some(success_metadata(200)));

        // First delivery completes the transaction...
        assert_eq!(
            finalize(TransactionStatus::PendingConfirmation, 200, &callback),
            Finalization::Complete {
                confirmed_amount: 200
            }
        );

        // ...so the same payload against the now-terminal status settles
        // nothing: total_withdrawn is only credited in the Complete arm.
        assert_eq!(
            finalize(TransactionStatus::Completed, 200, &callback),
            Finalization::AlreadyTerminal
        );
    }

    #[test]
    fn failure_callback_releases_the_hold_once() {
        let callback = stk_callback(1, None);

        assert_eq!(
            finalize(TransactionStatus::PendingConfirmation, 200, &callback),
            Finalization::Fail
        );

        // Redelivery after the failure was recorded reverses nothing further.
        assert_eq!(
            finalize(TransactionStatus::Failed, 200, &callback),
            Finalization::AlreadyTerminal
        );
    }

    #[test]
    fn success_without_metadata_falls_back_to_the_held_amount() {
        let callback = stk_callback(0, None);

        assert_eq!(
            finalize(TransactionStatus::PendingConfirmation, 350, &callback),
            Finalization::Complete {
                confirmed_amount: 350
            }
        );
    }

    #[test]
    fn callbacks_finalize_transactions_still_marked_initiated() {
        // A push whose acceptance write lost a race with the callback is
        // still finalizable from the initiated state.
        let callback = stk_callback(0, Some(success_metadata(200)));
        assert_eq!(
            finalize(TransactionStatus::Initiated, 200, &callback),
            Finalization::Complete {
                confirmed_amount: 200
            }
        );
    }
}
