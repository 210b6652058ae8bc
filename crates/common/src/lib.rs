//! Shared error definitions and WhatsApp addressing helpers used across all
//! wagate crates.

pub mod error;
pub mod jid;

pub use error::{Error, Result};
