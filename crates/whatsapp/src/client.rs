//! Contract for the external WhatsApp Web protocol client.
//!
//! Everything behind these traits is opaque: credential files, framing,
//! reconnect handshakes. The supervisor only consumes the typed event queue
//! and the small set of operations a connection supports.

use std::{path::Path, sync::Arc};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio::sync::mpsc,
};

use wagate_common::Result;

/// Typed event queue for one connection.
pub type EventReceiver = mpsc::Receiver<ConnectionEvent>;
pub type EventSender = mpsc::Sender<ConnectionEvent>;

/// Key identifying one message within a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    pub remote_jid: String,
    pub from_me: bool,
    pub id: String,
}

/// One inbound message as surfaced by the protocol client.
///
/// `message` is the raw content object; it is passed through to the webhook
/// receiver without interpretation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub key: MessageKey,
    pub message: serde_json::Value,
    pub message_timestamp: i64,
    pub push_name: Option<String>,
}

/// Lifecycle and traffic events emitted by one connection, in emission order.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Credential material changed. Must be persisted before any other
    /// handling — losing this write loses the ability to reconnect without a
    /// fresh pairing.
    CredsUpdate,
    /// A pairing code was produced for an unpaired instance.
    Qr { code: String },
    /// The connection is open and ready to send.
    Open { jid: String, name: Option<String> },
    /// The connection closed, with the protocol status code when known.
    Close { status_code: Option<u16> },
    /// A batch of inbound messages. `live` is false for history syncs.
    MessagesUpsert {
        live: bool,
        messages: Vec<InboundMessage>,
    },
    /// Delivery/read status updates, passed through verbatim.
    MessagesUpdate { updates: serde_json::Value },
}

/// Disconnect reason derived from the close status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    LoggedOut,
    ConnectionLost,
    ConnectionClosed,
    ConnectionReplaced,
    BadSession,
    RestartRequired,
    Other(u16),
    Unknown,
}

impl DisconnectReason {
    pub fn from_code(code: Option<u16>) -> Self {
        match code {
            Some(401) => Self::LoggedOut,
            Some(408) => Self::ConnectionLost,
            Some(428) => Self::ConnectionClosed,
            Some(440) => Self::ConnectionReplaced,
            Some(500) => Self::BadSession,
            Some(515) => Self::RestartRequired,
            Some(code) => Self::Other(code),
            None => Self::Unknown,
        }
    }

    /// Terminal disconnects mean the account unlinked this device; the
    /// session must not be recreated automatically.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

/// One live protocol connection. Exclusively owned by its session.
#[async_trait]
pub trait WaConnection: Send + Sync {
    /// Send a plain text message to a JID.
    async fn send_text(&self, to: &str, text: &str) -> Result<()>;

    /// Unlink this device from the account.
    async fn logout(&self) -> Result<()>;

    /// Flush updated credential material to the connection's auth directory.
    async fn save_credentials(&self) -> Result<()>;
}

/// Entry point into the protocol client.
#[async_trait]
pub trait WaClient: Send + Sync {
    /// Open a connection using the multi-file auth state under `auth_dir`,
    /// returning the connection handle together with its event queue.
    async fn connect(&self, auth_dir: &Path) -> Result<(Arc<dyn WaConnection>, EventReceiver)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logged_out_is_the_only_terminal_reason() {
        assert!(DisconnectReason::from_code(Some(401)).is_terminal());
        assert!(!DisconnectReason::from_code(Some(428)).is_terminal());
        assert!(!DisconnectReason::from_code(Some(515)).is_terminal());
        assert!(!DisconnectReason::from_code(Some(999)).is_terminal());
        assert!(!DisconnectReason::from_code(None).is_terminal());
    }

    #[test]
    fn inbound_message_wire_shape() {
        let msg: InboundMessage = serde_json::from_value(serde_json::json!({
            "key": { "remoteJid": "1555@s.whatsapp.net", "fromMe": false, "id": "ABC" },
            "message": { "conversation": "hi" },
            "messageTimestamp": 1722950000,
            "pushName": "Alice",
        }))
        .expect("deserialize");
        assert_eq!(msg.key.remote_jid, "1555@s.whatsapp.net");
        assert_eq!(msg.push_name.as_deref(), Some("Alice"));
    }
}
