//! HTTP API for wagate.
//!
//! A stateless mapping layer: each handler validates its inputs and delegates
//! to the session registry or the connection supervisor. No authentication is
//! performed here — that is a deployment-environment responsibility.

pub mod error;
pub mod instance;
pub mod message;
pub mod server;
pub mod state;

pub use {
    server::{build_app, start_gateway},
    state::AppState,
};
