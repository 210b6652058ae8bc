use {
    async_trait::async_trait,
    serde_json::Value,
    tracing::{debug, warn},
};

use crate::payload::{WebhookEvent, WebhookPayload};

/// Sink for protocol events — the supervisor emits through this seam so tests
/// can substitute a recording implementation.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    /// Relay one event. Never fails; delivery problems are the sink's to log.
    async fn notify(&self, event: WebhookEvent, session_id: &str, instance_name: &str, data: Value);
}

/// HTTP webhook relay. At-most-once: a single POST per event, no retries.
pub struct WebhookRelay {
    url: Option<String>,
    http: reqwest::Client,
}

impl WebhookRelay {
    pub fn new(url: Option<String>) -> Self {
        Self {
            url,
            http: reqwest::Client::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }
}

#[async_trait]
impl WebhookSink for WebhookRelay {
    async fn notify(&self, event: WebhookEvent, session_id: &str, instance_name: &str, data: Value) {
        let Some(url) = self.url.as_deref() else {
            warn!(event = %event, session_id, "no webhook url configured, dropping event");
            return;
        };

        let payload = WebhookPayload {
            event,
            session_id: session_id.to_string(),
            instance_name: instance_name.to_string(),
            data,
        };

        match self.http.post(url).json(&payload).send().await {
            Ok(resp) => {
                debug!(event = %event, session_id, status = %resp.status(), "webhook sent");
            },
            Err(e) => {
                warn!(event = %event, session_id, error = %e, "webhook delivery failed");
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn posts_envelope_to_configured_url() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJson(json!({
                "event": "connection.update",
                "sessionId": "s1",
                "instanceName": "inst1",
                "data": { "connection": "open", "isConnected": true },
            })))
            .with_status(200)
            .create_async()
            .await;

        let relay = WebhookRelay::new(Some(format!("{}/hook", server.url())));
        relay
            .notify(
                WebhookEvent::ConnectionUpdate,
                "s1",
                "inst1",
                json!({ "connection": "open", "isConnected": true }),
            )
            .await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_url_drops_event() {
        let relay = WebhookRelay::new(None);
        assert!(!relay.is_configured());
        // Must return without attempting delivery.
        relay
            .notify(WebhookEvent::QrUpdate, "s1", "inst1", json!({}))
            .await;
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        // Nothing listens on this port; notify must still return cleanly.
        let relay = WebhookRelay::new(Some("http://127.0.0.1:9/hook".into()));
        relay
            .notify(WebhookEvent::MessagesUpdate, "s1", "inst1", json!({ "updates": [] }))
            .await;
    }
}
