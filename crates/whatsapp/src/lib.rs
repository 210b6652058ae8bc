//! WhatsApp Web session management for wagate.
//!
//! The protocol itself (handshake, encryption, multi-device state) lives in
//! Baileys, running as a Node.js sidecar process. This crate owns everything
//! around it: the client contract, the in-memory session registry, the
//! per-session connection supervisor, and the sidecar process/transport.

pub mod client;
pub mod process;
pub mod qr;
pub mod registry;
pub mod sidecar;
pub mod supervisor;
pub mod types;

pub use {
    client::{ConnectionEvent, DisconnectReason, InboundMessage, MessageKey, WaClient, WaConnection},
    process::{SidecarProcess, SidecarSettings, find_sidecar_dir, start_sidecar},
    registry::{Session, SessionRegistry, SessionSummary},
    sidecar::{DEFAULT_SIDECAR_PORT, SidecarClient},
    supervisor::ConnectionSupervisor,
};
