//! Per-session connection supervision.
//!
//! The supervisor drives one session from creation through repeated
//! connect/disconnect cycles: it opens the protocol connection, owns the
//! single consumer task draining that connection's event queue, mutates the
//! registry entry, and relays every observed event through the webhook sink.

use std::{sync::Arc, time::Duration};

use {serde_json::json, tracing::{debug, info, warn}};

use {
    wagate_common::{Error, Result, jid},
    wagate_webhook::{WebhookEvent, WebhookSink},
};

use crate::{
    client::{ConnectionEvent, DisconnectReason, EventReceiver, WaClient, WaConnection},
    qr,
    registry::{Session, SessionRegistry},
};

/// Delay before re-establishing a dropped (non-terminal) connection. No
/// backoff growth, no retry cap: at-least-once forever, for a long-lived
/// background service.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

struct Inner {
    registry: Arc<SessionRegistry>,
    client: Arc<dyn WaClient>,
    sink: Arc<dyn WebhookSink>,
    reconnect_delay: Duration,
}

/// Cheaply cloneable supervisor handle; clones share all state.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    inner: Arc<Inner>,
}

impl ConnectionSupervisor {
    pub fn new(
        registry: Arc<SessionRegistry>,
        client: Arc<dyn WaClient>,
        sink: Arc<dyn WebhookSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                client,
                sink,
                reconnect_delay: RECONNECT_DELAY,
            }),
        }
    }

    /// Override the reconnect delay (tests use milliseconds).
    pub fn with_reconnect_delay(self, reconnect_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Arc::clone(&self.inner.registry),
                client: Arc::clone(&self.inner.client),
                sink: Arc::clone(&self.inner.sink),
                reconnect_delay,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    /// Create a session and open its connection.
    ///
    /// Idempotent: an existing session for `session_id` is returned unchanged
    /// without opening a second connection. The registry entry is created
    /// before the first await so a concurrent connect for the same ID
    /// short-circuits even while the first attempt is still settling.
    pub async fn connect(
        &self,
        session_id: &str,
        instance_name: &str,
        webhook_secret: &str,
    ) -> Result<Session> {
        if let Some(existing) = self.inner.registry.get(session_id) {
            debug!(session_id, "session already exists");
            return Ok(existing);
        }

        self.inner
            .registry
            .insert(Session::new(session_id, instance_name, webhook_secret));
        info!(session_id, instance_name, "creating session");

        let auth_dir = self.inner.registry.auth_dir(instance_name);
        let (connection, events) = match self.inner.client.connect(&auth_dir).await {
            Ok(pair) => pair,
            Err(e) => {
                self.inner.registry.remove(session_id);
                return Err(e);
            },
        };
        self.inner
            .registry
            .set_connection(session_id, Arc::clone(&connection));

        let supervisor = self.clone();
        let sid = session_id.to_string();
        let instance = instance_name.to_string();
        let secret = webhook_secret.to_string();
        tokio::spawn(async move {
            supervisor
                .run_events(sid, instance, secret, connection, events)
                .await;
        });

        self.inner
            .registry
            .get(session_id)
            .ok_or_else(|| Error::message("session closed during connect"))
    }

    /// Single consumer for one connection's event queue. Applies each event
    /// to the registry, then relays it; per-session ordering follows the
    /// order the connection emitted the events.
    async fn run_events(
        &self,
        session_id: String,
        instance_name: String,
        webhook_secret: String,
        connection: Arc<dyn WaConnection>,
        mut events: EventReceiver,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::CredsUpdate => {
                    if let Err(e) = connection.save_credentials().await {
                        warn!(session_id = %session_id, error = %e, "failed to persist credentials");
                    }
                },
                ConnectionEvent::Qr { code } => {
                    let data_url = match qr::render_data_url(&code) {
                        Ok(url) => url,
                        Err(e) => {
                            warn!(session_id = %session_id, error = %e, "failed to render pairing code");
                            continue;
                        },
                    };
                    self.inner.registry.set_qr(&session_id, data_url.clone());
                    info!(session_id = %session_id, "qr code generated");
                    self.notify(
                        WebhookEvent::QrUpdate,
                        &session_id,
                        &instance_name,
                        json!({ "qrCode": data_url }),
                    )
                    .await;
                },
                ConnectionEvent::Open { jid, name } => {
                    let phone_number = jid::phone_from_jid(&jid);
                    self.inner.registry.mark_connected(
                        &session_id,
                        Some(phone_number.clone()),
                        name.clone(),
                    );
                    info!(session_id = %session_id, phone_number = %phone_number, "connected");
                    self.notify(
                        WebhookEvent::ConnectionUpdate,
                        &session_id,
                        &instance_name,
                        json!({
                            "connection": "open",
                            "isConnected": true,
                            "phoneNumber": phone_number,
                            "pushName": name,
                        }),
                    )
                    .await;
                },
                ConnectionEvent::Close { status_code } => {
                    let reason = DisconnectReason::from_code(status_code);
                    self.inner.registry.mark_disconnected(&session_id);
                    warn!(session_id = %session_id, ?reason, "disconnected");
                    self.notify(
                        WebhookEvent::ConnectionUpdate,
                        &session_id,
                        &instance_name,
                        json!({
                            "connection": "close",
                            "isConnected": false,
                            "statusCode": status_code,
                        }),
                    )
                    .await;

                    // Stale entries must not outlive the connection; status
                    // queries report "not found" until a reconnect lands.
                    self.inner.registry.remove(&session_id);

                    if !reason.is_terminal() {
                        let supervisor = self.clone();
                        let sid = session_id.clone();
                        let instance = instance_name.clone();
                        let secret = webhook_secret.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(supervisor.inner.reconnect_delay).await;
                            if let Err(e) = supervisor.connect(&sid, &instance, &secret).await {
                                warn!(session_id = %sid, error = %e, "reconnect failed");
                            }
                        });
                    }
                    break;
                },
                ConnectionEvent::MessagesUpsert { live, messages } => {
                    if !live {
                        continue;
                    }
                    for message in messages {
                        if jid::is_status_broadcast(&message.key.remote_jid) {
                            continue;
                        }
                        debug!(session_id = %session_id, from = %message.key.remote_jid, "inbound message");
                        self.notify(
                            WebhookEvent::MessagesUpsert,
                            &session_id,
                            &instance_name,
                            json!({ "messages": [message] }),
                        )
                        .await;
                    }
                },
                ConnectionEvent::MessagesUpdate { updates } => {
                    self.notify(
                        WebhookEvent::MessagesUpdate,
                        &session_id,
                        &instance_name,
                        json!({ "updates": updates }),
                    )
                    .await;
                },
            }
        }
    }

    async fn notify(
        &self,
        event: WebhookEvent,
        session_id: &str,
        instance_name: &str,
        data: serde_json::Value,
    ) {
        self.inner
            .sink
            .notify(event, session_id, instance_name, data)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use {async_trait::async_trait, serde_json::Value, tokio::sync::mpsc};

    use super::*;
    use crate::client::{EventSender, InboundMessage, MessageKey};

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(WebhookEvent, String, Value)>>,
    }

    impl RecordingSink {
        fn events_named(&self, event: WebhookEvent) -> Vec<Value> {
            self.events
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .filter(|(e, _, _)| *e == event)
                .map(|(_, _, data)| data.clone())
                .collect()
        }
    }

    #[async_trait]
    impl WebhookSink for RecordingSink {
        async fn notify(&self, event: WebhookEvent, session_id: &str, _instance: &str, data: Value) {
            self.events
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((event, session_id.to_string(), data));
        }
    }

    #[derive(Default)]
    struct FakeConnection {
        sent: Mutex<Vec<(String, String)>>,
        saves: AtomicUsize,
        logouts: AtomicUsize,
    }

    #[async_trait]
    impl WaConnection for FakeConnection {
        async fn send_text(&self, to: &str, text: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((to.to_string(), text.to_string()));
            Ok(())
        }

        async fn logout(&self) -> Result<()> {
            self.logouts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn save_credentials(&self) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeClient {
        connects: AtomicUsize,
        sessions: Mutex<Vec<(Arc<FakeConnection>, EventSender)>>,
    }

    impl FakeClient {
        fn connect_count(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        fn last(&self) -> (Arc<FakeConnection>, EventSender) {
            let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            let (conn, tx) = sessions.last().expect("no connection opened");
            (Arc::clone(conn), tx.clone())
        }
    }

    #[async_trait]
    impl WaClient for FakeClient {
        async fn connect(
            &self,
            _auth_dir: &std::path::Path,
        ) -> Result<(Arc<dyn WaConnection>, EventReceiver)> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(16);
            let conn = Arc::new(FakeConnection::default());
            self.sessions
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((Arc::clone(&conn), tx));
            Ok((conn, rx))
        }
    }

    fn harness() -> (ConnectionSupervisor, Arc<FakeClient>, Arc<RecordingSink>) {
        let registry = Arc::new(SessionRegistry::new(
            std::env::temp_dir().join("wagate-supervisor-tests"),
        ));
        let client = Arc::new(FakeClient::default());
        let sink = Arc::new(RecordingSink::default());
        let supervisor = ConnectionSupervisor::new(
            registry,
            Arc::clone(&client) as Arc<dyn WaClient>,
            Arc::clone(&sink) as Arc<dyn WebhookSink>,
        )
        .with_reconnect_delay(Duration::from_millis(20));
        (supervisor, client, sink)
    }

    /// Poll until `predicate` holds or two seconds pass.
    async fn wait_for(mut predicate: impl FnMut() -> bool) {
        for _ in 0..200 {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let (supervisor, client, _sink) = harness();

        supervisor.connect("s1", "inst1", "secret").await.expect("first");
        supervisor.connect("s1", "inst1", "secret").await.expect("second");

        assert_eq!(supervisor.registry().len(), 1);
        assert_eq!(client.connect_count(), 1);
    }

    #[tokio::test]
    async fn pairing_then_open_updates_session_and_relays() {
        let (supervisor, client, sink) = harness();
        supervisor.connect("s1", "inst1", "").await.expect("connect");
        let (_conn, tx) = client.last();

        let session = supervisor.registry().get("s1").expect("present");
        assert!(!session.is_connected);
        assert!(session.qr_code.is_none());
        assert_eq!(session.status(), "connecting");

        tx.send(ConnectionEvent::Qr { code: "pair-me".into() })
            .await
            .expect("send");
        wait_for(|| supervisor.registry().get("s1").is_some_and(|s| s.qr_code.is_some())).await;
        assert_eq!(supervisor.registry().get("s1").expect("present").status(), "waiting_qr");
        let qr_events = sink.events_named(WebhookEvent::QrUpdate);
        assert_eq!(qr_events.len(), 1);
        assert!(
            qr_events[0]["qrCode"]
                .as_str()
                .expect("qrCode")
                .starts_with("data:image/png;base64,")
        );

        tx.send(ConnectionEvent::Open {
            jid: "1555@s.whatsapp.net".into(),
            name: Some("Alice".into()),
        })
        .await
        .expect("send");
        wait_for(|| supervisor.registry().get("s1").is_some_and(|s| s.is_connected)).await;

        let session = supervisor.registry().get("s1").expect("present");
        assert!(session.qr_code.is_none());
        assert_eq!(session.phone_number.as_deref(), Some("1555"));
        assert_eq!(session.push_name.as_deref(), Some("Alice"));
        assert_eq!(session.status(), "connected");

        let open_events = sink.events_named(WebhookEvent::ConnectionUpdate);
        assert_eq!(open_events.len(), 1);
        assert_eq!(open_events[0]["connection"], "open");
        assert_eq!(open_events[0]["isConnected"], true);
        assert_eq!(open_events[0]["phoneNumber"], "1555");
        assert_eq!(open_events[0]["pushName"], "Alice");
    }

    #[tokio::test]
    async fn creds_update_persists_before_anything_else() {
        let (supervisor, client, _sink) = harness();
        supervisor.connect("s1", "inst1", "").await.expect("connect");
        let (conn, tx) = client.last();

        tx.send(ConnectionEvent::CredsUpdate).await.expect("send");
        wait_for(|| conn.saves.load(Ordering::SeqCst) == 1).await;
    }

    #[tokio::test]
    async fn logged_out_close_is_terminal() {
        let (supervisor, client, sink) = harness();
        supervisor.connect("s1", "inst1", "").await.expect("connect");
        let (_conn, tx) = client.last();

        tx.send(ConnectionEvent::Close { status_code: Some(401) })
            .await
            .expect("send");
        wait_for(|| supervisor.registry().get("s1").is_none()).await;

        // Well past the reconnect delay: still gone, no second connection.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(supervisor.registry().get("s1").is_none());
        assert_eq!(client.connect_count(), 1);

        let close_events = sink.events_named(WebhookEvent::ConnectionUpdate);
        assert_eq!(close_events.len(), 1);
        assert_eq!(close_events[0]["connection"], "close");
        assert_eq!(close_events[0]["statusCode"], 401);
    }

    #[tokio::test]
    async fn non_terminal_close_reconnects_exactly_once() {
        let (supervisor, client, _sink) = harness();
        supervisor.connect("s1", "inst1", "hook-secret").await.expect("connect");
        let (_conn, tx) = client.last();

        tx.send(ConnectionEvent::Close { status_code: Some(428) })
            .await
            .expect("send");

        wait_for(|| client.connect_count() == 2).await;
        wait_for(|| supervisor.registry().get("s1").is_some()).await;

        let session = supervisor.registry().get("s1").expect("recreated");
        assert_eq!(session.instance_name, "inst1");
        assert_eq!(session.webhook_secret, "hook-secret");
        assert!(!session.is_connected);

        // One reconnect only — no runaway retries from a single close.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.connect_count(), 2);
    }

    #[tokio::test]
    async fn live_messages_relay_and_broadcast_is_skipped() {
        let (supervisor, client, sink) = harness();
        supervisor.connect("s1", "inst1", "").await.expect("connect");
        let (_conn, tx) = client.last();

        let message = |jid: &str, text: &str| InboundMessage {
            key: MessageKey {
                remote_jid: jid.into(),
                from_me: false,
                id: "MSG1".into(),
            },
            message: json!({ "conversation": text }),
            message_timestamp: 1_722_950_000,
            push_name: Some("Bob".into()),
        };

        tx.send(ConnectionEvent::MessagesUpsert {
            live: false,
            messages: vec![message("1555@s.whatsapp.net", "history")],
        })
        .await
        .expect("send");
        tx.send(ConnectionEvent::MessagesUpsert {
            live: true,
            messages: vec![
                message("status@broadcast", "ignored"),
                message("1555@s.whatsapp.net", "hello"),
            ],
        })
        .await
        .expect("send");

        wait_for(|| !sink.events_named(WebhookEvent::MessagesUpsert).is_empty()).await;
        let upserts = sink.events_named(WebhookEvent::MessagesUpsert);
        assert_eq!(upserts.len(), 1);
        let relayed = &upserts[0]["messages"][0];
        assert_eq!(relayed["key"]["remoteJid"], "1555@s.whatsapp.net");
        assert_eq!(relayed["message"]["conversation"], "hello");
        assert_eq!(relayed["pushName"], "Bob");
    }

    #[tokio::test]
    async fn status_updates_pass_through() {
        let (supervisor, client, sink) = harness();
        supervisor.connect("s1", "inst1", "").await.expect("connect");
        let (_conn, tx) = client.last();

        tx.send(ConnectionEvent::MessagesUpdate {
            updates: json!([{ "key": { "id": "MSG1" }, "update": { "status": 3 } }]),
        })
        .await
        .expect("send");

        wait_for(|| !sink.events_named(WebhookEvent::MessagesUpdate).is_empty()).await;
        let updates = sink.events_named(WebhookEvent::MessagesUpdate);
        assert_eq!(updates[0]["updates"][0]["update"]["status"], 3);
    }
}
