use axum::{middleware::from_fn, routing::get, routing::post, Router};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

mod auth;
mod config;
mod database;
mod directory;
mod error;
mod external;
mod handlers;
mod middleware;
mod services;

#[tokio::main]
async fn main() {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    let config = crate::config::config();
    tracing::info!("Starting UAR API in {:?} mode", config.environment);

    if let Err(e) = crate::database::manager::DatabaseManager::migrate().await {
        tracing::warn!("migrations not applied: {}", e);
    }

    let app = app();

    // Allow tests or deployments to override port via env
    let port = std::env::var("UAR_API_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(3000);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {}", bind_addr, e));

    tracing::info!("UAR API listening on http://{}", bind_addr);

    axum::serve(listener, app).await.expect("server");
}

fn app() -> Router {
    Router::new()
        // Public
        .route("/", get(root))
        .route("/health", get(health))
        // Authenticated API
        .merge(api_routes())
        // Global middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router {
    use handlers::{approvals, requests, sync};

    Router::new()
        // Request submission and the requester's own view
        .route("/api/requests", post(requests::request_post).get(requests::request_list))
        .route("/api/requests/:code", get(requests::request_get))
        // Approver queue, decision, history
        .route("/api/approvals/pending", get(approvals::pending_get))
        .route("/api/approvals/history", get(approvals::history_get))
        .route("/api/approvals/:id", post(approvals::action_post))
        // Outbox maintenance
        .route("/api/sync/retry", post(sync::retry_post))
        .layer(from_fn(middleware::jwt_auth_middleware))
}

async fn root() -> axum::response::Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    axum::response::Json(json!({
        "success": true,
        "data": {
            "name": "UAR API",
            "version": version,
            "description": "User Access Review portal backend",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "requests": "/api/requests[/:code] (protected)",
                "approvals": "/api/approvals/pending, /api/approvals/:id, /api/approvals/history (protected)",
                "sync": "/api/sync/retry (protected)",
            }
        }
    }))
}

async fn health() -> impl axum::response::IntoResponse {
    let now = chrono::Utc::now();

    match crate::database::manager::DatabaseManager::health_check().await {
        Ok(_) => (
            axum::http::StatusCode::OK,
            axum::response::Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok"
                }
            })),
        ),
        Err(e) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            axum::response::Json(json!({
                "success": false,
                "error": "database unavailable",
                "data": {
                    "status": "degraded",
                    "timestamp": now,
                    "database_error": e.to_string()
                }
            })),
        ),
    }
}
