use {
    axum::{
        Json,
        Router,
        extract::State,
        response::IntoResponse,
        routing::{delete, get, post},
    },
    serde_json::json,
    tokio::net::TcpListener,
    tower_http::cors::{Any, CorsLayer},
    tracing::info,
};

use crate::{instance, message, state::AppState};

/// Build the gateway router (shared between production startup and tests).
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/instance/create", post(instance::create))
        .route("/api/instance/list", get(instance::list))
        .route("/api/instance/{session_id}/qr", get(instance::qr))
        .route("/api/instance/{session_id}/status", get(instance::status))
        .route("/api/instance/{session_id}", delete(instance::remove))
        .route("/api/message/send-text", post(message::send_text))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until ctrl-c.
pub async fn start_gateway(bind: &str, port: u16, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("{bind}:{port}")).await?;
    info!(bind, port, "wagate gateway listening");

    axum::serve(listener, build_app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "sessions": state.registry().len(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
