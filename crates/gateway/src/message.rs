//! Message sending endpoints.

use {
    axum::{Json, extract::State},
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::error,
};

use wagate_common::jid;

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTextRequest {
    pub session_id: Option<String>,
    pub phone: Option<String>,
    pub message: Option<String>,
}

pub async fn send_text(
    State(state): State<AppState>,
    Json(req): Json<SendTextRequest>,
) -> Result<Json<Value>, ApiError> {
    let (Some(session_id), Some(phone), Some(message)) = (
        req.session_id.filter(|s| !s.is_empty()),
        req.phone.filter(|s| !s.is_empty()),
        req.message,
    ) else {
        return Err(ApiError::bad_request("sessionId, phone and message required"));
    };

    let connection = state
        .registry()
        .get(&session_id)
        .filter(|session| session.is_connected)
        .and_then(|session| session.connection)
        .ok_or_else(|| ApiError::bad_request("Session not connected"))?;

    let to = jid::normalize_recipient(&phone);
    connection.send_text(&to, &message).await.map_err(|e| {
        error!(session_id = %session_id, to = %to, error = %e, "failed to send message");
        ApiError::internal(e.to_string())
    })?;

    Ok(Json(json!({ "success": true, "to": to })))
}
