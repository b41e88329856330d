use anyhow::Context;
use axum::extract::State;
use axum::{http::Method, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

mod config;
mod database;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use database::connection::get_db_client;
use services::mpesa_gateway::MpesaGateway;
use services::withdrawal_service::WithdrawalService;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let db = get_db_client().await;
    let app_state = initialize_app_state(db).await;

    let app = build_router(app_state);
    start_server(app).await
}

async fn initialize_app_state(db: mongodb::Database) -> AppState {
    let mut app_state = AppState::new(db.clone());

    tracing::info!("🔧 Attempting to initialize M-Pesa gateway...");
    let config = match config::AppConfig::try_from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Failed to load M-Pesa config: {}", e);
            tracing::warn!("Withdrawal service will be disabled");
            return app_state;
        }
    };
    tracing::info!("📱 Short code: {}", config.mpesa_short_code);
    tracing::info!("🌐 Environment: {}", config.mpesa_environment);

    match MpesaGateway::new(config) {
        Ok(gateway) => {
            let gateway = Arc::new(gateway);

            // Probe the credentials once; a gateway that cannot authenticate
            // is left disabled rather than failing every withdrawal later.
            match gateway.get_access_token().await {
                Ok(_) => {
                    let withdrawals = Arc::new(WithdrawalService::new(db, gateway));
                    app_state = app_state.with_withdrawals(withdrawals);
                    tracing::info!("✅ M-Pesa gateway initialized and ready");
                }
                Err(e) => {
                    tracing::error!("❌ Failed to get M-Pesa access token: {}", e);
                    tracing::warn!("Withdrawal service will be disabled");
                }
            }
        }
        Err(e) => {
            tracing::error!("❌ Failed to build M-Pesa gateway: {}", e);
            tracing::warn!("Withdrawal service will be disabled");
        }
    }

    app_state
}

fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_check))
        .route("/api/health", get(api_health_check))
        .nest("/api/payments", routes::payments::payment_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

async fn start_server(app: Router) -> anyhow::Result<()> {
    let port = std::env::var("PORT").unwrap_or_else(|_| "10000".to_string());
    let addr = SocketAddr::from(([0, 0, 0, 0], port.parse().unwrap_or(10000)));

    tracing::info!("🚀 Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .await
        .context("server error")?;

    Ok(())
}

async fn root_handler() -> &'static str {
    "🚀 Pillar Page Payments API"
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn api_health_check(State(state): State<AppState>) -> Json<Value> {
    use mongodb::bson::doc;

    let db_status = match state.db.run_command(doc! {"ping": 1}).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    Json(json!({
        "status": "healthy",
        "database": db_status,
        "mpesa": state.withdrawals.is_some(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
