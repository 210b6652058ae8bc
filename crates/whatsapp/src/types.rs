//! Wire messages exchanged with the Baileys sidecar over its local
//! WebSocket, one JSON object per frame.

use serde::{Deserialize, Serialize};

use crate::client::InboundMessage;

/// Commands sent to the sidecar.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarCommand {
    /// Open (or resume) the connection for an instance, using the multi-file
    /// auth state under `auth_dir`.
    Login { instance: String, auth_dir: String },
    /// Unlink the instance and drop its connection.
    Logout { instance: String },
    /// Flush pending credential updates for an instance to disk.
    PersistCreds { instance: String },
    /// Send a text message; acknowledged with a `send_result`.
    SendText {
        request_id: String,
        instance: String,
        to: String,
        text: String,
    },
}

/// Events received from the sidecar.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarEvent {
    CredsUpdate {
        instance: String,
    },
    Qr {
        instance: String,
        code: String,
    },
    Open {
        instance: String,
        jid: String,
        name: Option<String>,
    },
    Close {
        instance: String,
        status_code: Option<u16>,
    },
    MessagesUpsert {
        instance: String,
        live: bool,
        messages: Vec<InboundMessage>,
    },
    MessagesUpdate {
        instance: String,
        updates: serde_json::Value,
    },
    SendResult {
        request_id: String,
        success: bool,
        error: Option<String>,
    },
}
