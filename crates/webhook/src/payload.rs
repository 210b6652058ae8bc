use std::fmt;

use serde::{Serialize, Serializer};

/// Event categories relayed to the webhook receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEvent {
    QrUpdate,
    ConnectionUpdate,
    MessagesUpsert,
    MessagesUpdate,
}

impl WebhookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QrUpdate => "qr.update",
            Self::ConnectionUpdate => "connection.update",
            Self::MessagesUpsert => "messages.upsert",
            Self::MessagesUpdate => "messages.update",
        }
    }
}

impl fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for WebhookEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Envelope POSTed to the webhook receiver.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub event: WebhookEvent,
    pub session_id: String,
    pub instance_name: String,
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_uses_camel_case_wire_names() {
        let payload = WebhookPayload {
            event: WebhookEvent::QrUpdate,
            session_id: "s1".into(),
            instance_name: "inst1".into(),
            data: serde_json::json!({ "qrCode": "data:image/png;base64,AAAA" }),
        };
        let value = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(value["event"], "qr.update");
        assert_eq!(value["sessionId"], "s1");
        assert_eq!(value["instanceName"], "inst1");
        assert_eq!(value["data"]["qrCode"], "data:image/png;base64,AAAA");
    }
}
