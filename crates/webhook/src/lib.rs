//! Outbound webhook notifications for protocol events.
//!
//! One-way, fire-and-forget: events are serialized into a small envelope and
//! POSTed to an externally configured receiver. Delivery is best-effort —
//! failures are logged and swallowed, never surfaced to callers.

pub mod payload;
pub mod relay;

pub use {
    payload::{WebhookEvent, WebhookPayload},
    relay::{WebhookRelay, WebhookSink},
};
