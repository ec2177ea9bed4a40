//! Best-effort delivery of inbound events to per-account webhooks.
//!
//! Each account owns one [`WebhookQueue`] drained by a single worker, so events
//! for an account arrive in receipt order while accounts never wait on each
//! other. Failed deliveries are logged and dropped.

pub mod dispatcher;
pub mod payload;

pub use {
    dispatcher::{DeliveryOutcome, WebhookDispatcher, WebhookQueue},
    payload::{WebhookMedia, WebhookPayload},
};
