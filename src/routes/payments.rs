use axum::{
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use crate::handlers::withdrawal_handlers;
use crate::state::AppState;

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        // Health
        .route("/health", get(payments_health))
        // Withdrawal workflow
        .route("/withdraw", post(withdrawal_handlers::initiate_withdrawal))
        .route("/callback", post(withdrawal_handlers::payment_callback))
        .route("/status", get(withdrawal_handlers::payment_status))
        // History and ledger
        .route("/transactions", get(withdrawal_handlers::get_transactions))
        .route("/earnings", get(withdrawal_handlers::get_earnings))
}

async fn payments_health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "payments",
        "timestamp": Utc::now().to_rfc3339(),
        "features": ["withdraw", "stk-push", "callback", "status", "earnings"]
    }))
}
