//! In-memory session registry.
//!
//! One entry per caller-chosen session ID. The registry is explicitly
//! constructed and injected (never static) so tests can run independent
//! instances side by side. Interior state sits behind a `std::sync::RwLock`
//! that is never held across an await point.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use {serde::Serialize, tracing::warn};

use crate::client::WaConnection;

/// Registry entry tracking one logical connection attempt/lifetime.
#[derive(Clone)]
pub struct Session {
    pub session_id: String,
    pub instance_name: String,
    pub webhook_secret: String,
    /// Handle into the protocol client; `None` until the connection attempt
    /// has produced one.
    pub connection: Option<Arc<dyn WaConnection>>,
    /// Last pairing code rendered as a data URL; cleared once connected.
    pub qr_code: Option<String>,
    pub is_connected: bool,
    pub phone_number: Option<String>,
    pub push_name: Option<String>,
}

impl Session {
    pub fn new(
        session_id: impl Into<String>,
        instance_name: impl Into<String>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            instance_name: instance_name.into(),
            webhook_secret: webhook_secret.into(),
            connection: None,
            qr_code: None,
            is_connected: false,
            phone_number: None,
            push_name: None,
        }
    }

    /// Derived status for the HTTP surface.
    pub fn status(&self) -> &'static str {
        if self.is_connected {
            "connected"
        } else if self.qr_code.is_some() {
            "waiting_qr"
        } else {
            "connecting"
        }
    }
}

/// Listing view of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub instance_name: String,
    pub is_connected: bool,
    pub phone_number: Option<String>,
}

/// Mapping from session ID to session state, plus the on-disk credential
/// root the protocol client stores its auth files under.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    sessions_root: PathBuf,
}

impl SessionRegistry {
    pub fn new(sessions_root: impl Into<PathBuf>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            sessions_root: sessions_root.into(),
        }
    }

    pub fn sessions_root(&self) -> &Path {
        &self.sessions_root
    }

    /// Credential directory for an instance: `<sessions_root>/<instance_name>`.
    pub fn auth_dir(&self, instance_name: &str) -> PathBuf {
        self.sessions_root.join(instance_name)
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.read().get(session_id).cloned()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.read().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Register a session. Existing entries for the same ID are left alone —
    /// creation is idempotent and the first registration wins.
    pub fn insert(&self, session: Session) {
        self.write()
            .entry(session.session_id.clone())
            .or_insert(session);
    }

    pub fn set_connection(&self, session_id: &str, connection: Arc<dyn WaConnection>) {
        if let Some(session) = self.write().get_mut(session_id) {
            session.connection = Some(connection);
        }
    }

    pub fn set_qr(&self, session_id: &str, qr_code: String) {
        if let Some(session) = self.write().get_mut(session_id) {
            session.qr_code = Some(qr_code);
        }
    }

    pub fn mark_connected(
        &self,
        session_id: &str,
        phone_number: Option<String>,
        push_name: Option<String>,
    ) {
        if let Some(session) = self.write().get_mut(session_id) {
            session.is_connected = true;
            session.qr_code = None;
            session.phone_number = phone_number;
            session.push_name = push_name;
        }
    }

    pub fn mark_disconnected(&self, session_id: &str) {
        if let Some(session) = self.write().get_mut(session_id) {
            session.is_connected = false;
        }
    }

    pub fn remove(&self, session_id: &str) -> Option<Session> {
        self.write().remove(session_id)
    }

    /// Summaries of all sessions, ordered by session ID.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .read()
            .values()
            .map(|s| SessionSummary {
                session_id: s.session_id.clone(),
                instance_name: s.instance_name.clone(),
                is_connected: s.is_connected,
                phone_number: s.phone_number.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        summaries
    }

    /// Tear a session down: best-effort logout, best-effort removal of the
    /// instance's credential directory, then drop the entry.
    ///
    /// Returns false when the session is unknown; no logout or filesystem
    /// operation happens in that case.
    pub async fn delete(&self, session_id: &str) -> bool {
        let Some(session) = self.get(session_id) else {
            return false;
        };

        if let Some(conn) = &session.connection
            && let Err(e) = conn.logout().await
        {
            warn!(session_id, error = %e, "logout failed during session delete");
        }

        let auth_dir = self.auth_dir(&session.instance_name);
        if let Err(e) = tokio::fs::remove_dir_all(&auth_dir).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(session_id, path = %auth_dir.display(), error = %e, "failed to remove credential directory");
        }

        self.remove(session_id);
        true
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }
}
