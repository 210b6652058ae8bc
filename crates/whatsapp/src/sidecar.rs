//! WebSocket client for the Baileys sidecar.
//!
//! A single socket multiplexes every instance the sidecar carries. The
//! client demultiplexes inbound frames into per-instance event queues and
//! correlates send commands with their acknowledgements.

use std::{
    collections::HashMap,
    path::Path,
    sync::{
        Arc, Mutex as StdMutex, RwLock as StdRwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    futures::{
        SinkExt, StreamExt,
        stream::{SplitSink, SplitStream},
    },
    tokio::{
        net::TcpStream,
        sync::{Mutex, mpsc, oneshot},
    },
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
    tracing::{debug, info, warn},
    uuid::Uuid,
};

use wagate_common::{Error, Result};

use crate::{
    client::{ConnectionEvent, EventReceiver, EventSender, WaClient, WaConnection},
    process::{SidecarProcess, SidecarSettings, find_sidecar_dir, start_sidecar},
    types::{SidecarCommand, SidecarEvent},
};

pub const DEFAULT_SIDECAR_PORT: u16 = 3459;

const CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);
const SEND_ACK_TIMEOUT: Duration = Duration::from_secs(30);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type SendAck = (bool, Option<String>);

/// State shared between the client, its connections, and the read loop.
struct Shared {
    /// Per-instance event queues.
    routes: StdRwLock<HashMap<String, EventSender>>,
    /// In-flight send commands awaiting acknowledgement.
    pending: StdMutex<HashMap<String, oneshot::Sender<SendAck>>>,
    writer: Mutex<Option<WsSink>>,
    connected: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            routes: StdRwLock::new(HashMap::new()),
            pending: StdMutex::new(HashMap::new()),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    async fn send_command(&self, command: &SidecarCommand) -> Result<()> {
        let frame = serde_json::to_string(command)?;
        let mut writer = self.writer.lock().await;
        let Some(ws) = writer.as_mut() else {
            return Err(Error::message("sidecar is not connected"));
        };
        ws.send(Message::text(frame))
            .await
            .map_err(|e| Error::external("sidecar send", e))
    }

    fn register_route(&self, instance: String, tx: EventSender) {
        self.routes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(instance, tx);
    }

    fn route_for(&self, instance: &str) -> Option<EventSender> {
        self.routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(instance)
            .cloned()
    }

    fn drop_route(&self, instance: &str) {
        self.routes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(instance);
    }

    fn take_routes(&self) -> Vec<EventSender> {
        self.routes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, tx)| tx)
            .collect()
    }

    fn register_pending(&self, request_id: String, tx: oneshot::Sender<SendAck>) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id, tx);
    }

    fn take_pending(&self, request_id: &str) -> Option<oneshot::Sender<SendAck>> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(request_id)
    }
}

/// Client for the sidecar; implements the protocol-client contract.
pub struct SidecarClient {
    shared: Arc<Shared>,
    settings: SidecarSettings,
    process: Mutex<Option<SidecarProcess>>,
    connect_guard: Mutex<()>,
}

impl SidecarClient {
    pub fn new(settings: SidecarSettings) -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            settings,
            process: Mutex::new(None),
            connect_guard: Mutex::new(()),
        }
    }

    /// Close the socket and stop the sidecar process (when we started it).
    pub async fn shutdown(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        *self.shared.writer.lock().await = None;
        let mut process = self.process.lock().await;
        if let Some(proc) = process.as_mut() {
            proc.stop().await;
        }
        *process = None;
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.shared.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let _guard = self.connect_guard.lock().await;
        if self.shared.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        if self.settings.auto_start {
            self.ensure_process_running().await?;
        }

        let ws = connect_with_retry(self.settings.port, CONNECT_ATTEMPTS).await?;
        let (sink, stream) = ws.split();
        *self.shared.writer.lock().await = Some(sink);
        self.shared.connected.store(true, Ordering::SeqCst);
        tokio::spawn(read_loop(Arc::clone(&self.shared), stream));

        info!(port = self.settings.port, "connected to whatsapp sidecar");
        Ok(())
    }

    async fn ensure_process_running(&self) -> Result<()> {
        let mut process = self.process.lock().await;

        if let Some(proc) = process.as_mut() {
            if proc.is_running() {
                return Ok(());
            }
            warn!("sidecar process died, restarting");
        }

        let dir = find_sidecar_dir(self.settings.sidecar_dir.as_deref())?;
        *process = Some(start_sidecar(&dir, self.settings.port).await?);
        Ok(())
    }
}

#[async_trait]
impl WaClient for SidecarClient {
    async fn connect(&self, auth_dir: &Path) -> Result<(Arc<dyn WaConnection>, EventReceiver)> {
        let instance = auth_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::message("auth dir carries no instance name"))?;

        self.ensure_connected().await?;

        let (tx, rx) = mpsc::channel(64);
        self.shared.register_route(instance.clone(), tx);
        self.shared
            .send_command(&SidecarCommand::Login {
                instance: instance.clone(),
                auth_dir: auth_dir.display().to_string(),
            })
            .await?;

        let connection = SidecarConnection {
            shared: Arc::clone(&self.shared),
            instance,
        };
        Ok((Arc::new(connection), rx))
    }
}

/// One instance's connection, backed by the shared socket.
struct SidecarConnection {
    shared: Arc<Shared>,
    instance: String,
}

#[async_trait]
impl WaConnection for SidecarConnection {
    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.shared.register_pending(request_id.clone(), tx);

        let command = SidecarCommand::SendText {
            request_id: request_id.clone(),
            instance: self.instance.clone(),
            to: to.to_string(),
            text: text.to_string(),
        };
        if let Err(e) = self.shared.send_command(&command).await {
            self.shared.take_pending(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(SEND_ACK_TIMEOUT, rx).await {
            Ok(Ok((true, _))) => Ok(()),
            Ok(Ok((false, error))) => Err(Error::message(
                error.unwrap_or_else(|| "send rejected by sidecar".into()),
            )),
            Ok(Err(_)) => Err(Error::message("sidecar dropped the send acknowledgement")),
            Err(_) => {
                self.shared.take_pending(&request_id);
                Err(Error::message("timed out waiting for send acknowledgement"))
            },
        }
    }

    async fn logout(&self) -> Result<()> {
        self.shared
            .send_command(&SidecarCommand::Logout {
                instance: self.instance.clone(),
            })
            .await
    }

    async fn save_credentials(&self) -> Result<()> {
        self.shared
            .send_command(&SidecarCommand::PersistCreds {
                instance: self.instance.clone(),
            })
            .await
    }
}

async fn connect_with_retry(
    port: u16,
    attempts: u32,
) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>> {
    let url = format!("ws://127.0.0.1:{port}");
    let mut last_error = None;
    for attempt in 1..=attempts {
        match connect_async(url.as_str()).await {
            Ok((ws, _response)) => return Ok(ws),
            Err(e) => {
                debug!(attempt, error = %e, "sidecar not reachable yet");
                last_error = Some(e);
            },
        }
        tokio::time::sleep(CONNECT_RETRY_DELAY).await;
    }
    Err(match last_error {
        Some(e) => Error::external(format!("sidecar unreachable at {url}"), e),
        None => Error::message(format!("sidecar unreachable at {url}")),
    })
}

/// Drain the socket, routing each frame to its instance's queue.
async fn read_loop(shared: Arc<Shared>, mut stream: WsStream) {
    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "sidecar socket error");
                break;
            },
        };
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let event: SidecarEvent = match serde_json::from_str(text.as_str()) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "unparseable sidecar frame");
                continue;
            },
        };
        dispatch(&shared, event).await;
    }

    shared.connected.store(false, Ordering::SeqCst);
    *shared.writer.lock().await = None;

    // The sidecar took every connection with it; surface a close on each
    // queue so supervisors run their reconnect policy.
    warn!("sidecar connection lost");
    for tx in shared.take_routes() {
        let _ = tx.send(ConnectionEvent::Close { status_code: None }).await;
    }
}

async fn dispatch(shared: &Arc<Shared>, event: SidecarEvent) {
    match event {
        SidecarEvent::SendResult {
            request_id,
            success,
            error,
        } => {
            if let Some(tx) = shared.take_pending(&request_id) {
                let _ = tx.send((success, error));
            }
        },
        SidecarEvent::CredsUpdate { instance } => {
            forward(shared, &instance, ConnectionEvent::CredsUpdate).await;
        },
        SidecarEvent::Qr { instance, code } => {
            forward(shared, &instance, ConnectionEvent::Qr { code }).await;
        },
        SidecarEvent::Open {
            instance,
            jid,
            name,
        } => {
            forward(shared, &instance, ConnectionEvent::Open { jid, name }).await;
        },
        SidecarEvent::Close {
            instance,
            status_code,
        } => {
            forward(shared, &instance, ConnectionEvent::Close { status_code }).await;
            shared.drop_route(&instance);
        },
        SidecarEvent::MessagesUpsert {
            instance,
            live,
            messages,
        } => {
            forward(
                shared,
                &instance,
                ConnectionEvent::MessagesUpsert { live, messages },
            )
            .await;
        },
        SidecarEvent::MessagesUpdate { instance, updates } => {
            forward(shared, &instance, ConnectionEvent::MessagesUpdate { updates }).await;
        },
    }
}

async fn forward(shared: &Arc<Shared>, instance: &str, event: ConnectionEvent) {
    let Some(tx) = shared.route_for(instance) else {
        debug!(instance, "event for unknown instance");
        return;
    };
    if tx.send(event).await.is_err() {
        shared.drop_route(instance);
    }
}
