//! Instance lifecycle endpoints: create, QR, status, list, delete.

use {
    axum::{
        Json,
        extract::{Path, State},
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::error,
};

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceRequest {
    pub session_id: Option<String>,
    pub instance_name: Option<String>,
    pub webhook_secret: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateInstanceRequest>,
) -> Result<Json<Value>, ApiError> {
    let (Some(session_id), Some(instance_name)) = (
        req.session_id.filter(|s| !s.is_empty()),
        req.instance_name.filter(|s| !s.is_empty()),
    ) else {
        return Err(ApiError::bad_request("sessionId and instanceName required"));
    };

    let session = state
        .supervisor
        .connect(
            &session_id,
            &instance_name,
            req.webhook_secret.as_deref().unwrap_or(""),
        )
        .await
        .map_err(|e| {
            error!(session_id = %session_id, error = %e, "failed to create instance");
            ApiError::internal(e.to_string())
        })?;

    Ok(Json(json!({
        "success": true,
        "sessionId": session.session_id,
        "instanceName": session.instance_name,
        "isConnected": session.is_connected,
    })))
}

pub async fn qr(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = state
        .registry()
        .get(&session_id)
        .ok_or_else(|| ApiError::not_found("Session not found"))?;

    Ok(Json(json!({
        "qrCode": session.qr_code,
        "isConnected": session.is_connected,
        "phoneNumber": session.phone_number,
        "pushName": session.push_name,
    })))
}

pub async fn status(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    let Some(session) = state.registry().get(&session_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Session not found", "status": "not_found" })),
        )
            .into_response();
    };

    Json(json!({
        "status": session.status(),
        "isConnected": session.is_connected,
        "phoneNumber": session.phone_number,
        "pushName": session.push_name,
    }))
    .into_response()
}

pub async fn list(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "sessions": state.registry().list() }))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.registry().delete(&session_id).await {
        return Err(ApiError::not_found("Session not found"));
    }
    Ok(Json(json!({ "success": true })))
}
