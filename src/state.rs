use mongodb::Database;
use std::sync::Arc;

use crate::services::withdrawal_service::WithdrawalService;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    // None when the M-Pesa gateway could not be configured at startup;
    // payment handlers answer 503 in that case.
    pub withdrawals: Option<Arc<WithdrawalService>>,
}

impl AppState {
    pub fn new(db: Database) -> Self {
        AppState {
            db,
            withdrawals: None,
        }
    }

    pub fn with_withdrawals(mut self, withdrawals: Arc<WithdrawalService>) -> Self {
        self.withdrawals = Some(withdrawals);
        self
    }
}
