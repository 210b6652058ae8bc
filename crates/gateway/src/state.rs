use std::sync::Arc;

use wagate_whatsapp::{ConnectionSupervisor, SessionRegistry};

/// Shared app state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: ConnectionSupervisor,
}

impl AppState {
    pub fn new(supervisor: ConnectionSupervisor) -> Self {
        Self { supervisor }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.supervisor.registry()
    }
}
