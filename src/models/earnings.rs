// models/earnings.rs
use chrono::{DateTime, Utc};
use mongodb::bson::{doc, oid::ObjectId, Document};
use serde::{Deserialize, Serialize};

pub const EARNINGS_COLLECTION: &str = "user_earnings";

/// Running ledger, one document per user. All amounts are whole KES.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEarnings {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub user_id: String,

    /// Lifetime gross earnings. Not mutated by the withdrawal flow.
    pub total: i64,
    /// Currently withdrawable balance. Never negative.
    pub available: i64,
    /// In flight: debited from available, not yet confirmed by the provider.
    pub pending: i64,
    /// Lifetime confirmed payouts.
    pub total_withdrawn: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_withdrawal_attempt: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_withdrawal: Option<DateTime<Utc>>,

    pub updated_at: DateTime<Utc>,
}

impl UserEarnings {
    pub fn can_withdraw(&self, amount: i64) -> bool {
        amount > 0 && amount <= self.available
    }
}

// Ledger update documents live next to the model so the debit/credit pairs
// stay visibly balanced.

/// Moves a withdrawal amount from `available` into `pending`. Applied with an
/// `available >= amount` filter so the pair is atomic against the balance.
pub fn reserve_funds(amount: i64, now: DateTime<Utc>) -> Document {
    doc! {
        "$inc": { "available": -amount, "pending": amount },
        "$set": {
            "last_withdrawal_attempt": now.to_rfc3339(),
            "updated_at": now.to_rfc3339(),
        },
    }
}

/// Returns a reservation in full, either because the gateway rejected the
/// push or because the provider reported the payment failed.
pub fn release_reservation(amount: i64, now: DateTime<Utc>) -> Document {
    doc! {
        "$inc": { "available": amount, "pending": -amount },
        "$set": { "updated_at": now.to_rfc3339() },
    }
}

/// Converts the in-flight hold into a confirmed payout. `held` is the amount
/// reserved at initiation; `confirmed` is the amount the provider reported.
pub fn settle_withdrawal(held: i64, confirmed: i64, now: DateTime<Utc>) -> Document {
    doc! {
        "$inc": { "pending": -held, "total_withdrawn": confirmed },
        "$set": {
            "last_withdrawal": now.to_rfc3339(),
            "updated_at": now.to_rfc3339(),
        },
    }
}

/// Public ledger view returned by the earnings endpoint.
#[derive(Debug, Serialize)]
pub struct EarningsResponse {
    pub user_id: String,
    pub total: i64,
    pub available: i64,
    pub pending: i64,
    pub total_withdrawn: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_withdrawal: Option<DateTime<Utc>>,
}

impl From<UserEarnings> for EarningsResponse {
    fn from(earnings: UserEarnings) -> Self {
        EarningsResponse {
            user_id: earnings.user_id,
            total: earnings.total,
            available: earnings.available,
            pending: earnings.pending,
            total_withdrawn: earnings.total_withdrawn,
            last_withdrawal: earnings.last_withdrawal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(available: i64, pending: i64) -> UserEarnings {
        UserEarnings {
            id: None,
            user_id: "user-1".to_string(),
            total: 1000,
            available,
            pending,
            total_withdrawn: 0,
            last_withdrawal_attempt: None,
            last_withdrawal: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn can_withdraw_up_to_available() {
        let earnings = ledger(500, 0);
        assert!(earnings.can_withdraw(500));
        assert!(earnings.can_withdraw(100));
        assert!(!earnings.can_withdraw(501));
        assert!(!earnings.can_withdraw(0));
        assert!(!earnings.can_withdraw(-100));
    }

    #[test]
    fn pending_funds_are_not_withdrawable() {
        let earnings = ledger(300, 200);
        assert!(!earnings.can_withdraw(400));
        assert!(earnings.can_withdraw(300));
    }

    fn inc_value(update: &Document, field: &str) -> i64 {
        update
            .get_document("$inc")
            .unwrap()
            .get_i64(field)
            .unwrap()
    }

    #[test]
    fn reservation_moves_available_into_pending() {
        let update = reserve_funds(200, Utc::now());
        assert_eq!(inc_value(&update, "available"), -200);
        assert_eq!(inc_value(&update, "pending"), 200);
    }

    #[test]
    fn release_exactly_reverses_a_reservation() {
        let now = Utc::now();
        let reserve = reserve_funds(200, now);
        let release = release_reservation(200, now);

        for field in ["available", "pending"] {
            assert_eq!(inc_value(&reserve, field) + inc_value(&release, field), 0);
        }
    }

    #[test]
    fn settlement_drains_pending_and_credits_total_withdrawn() {
        let update = settle_withdrawal(200, 200, Utc::now());
        assert_eq!(inc_value(&update, "pending"), -200);
        assert_eq!(inc_value(&update, "total_withdrawn"), 200);
        // Settlement never touches the withdrawable balance.
        assert!(update.get_document("$inc").unwrap().get("available").is_none());
    }
}
