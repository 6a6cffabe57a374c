//! # Webhook Re-entry
//!
//! Signed HTTP-style deliveries of step messages. The transport is the
//! caller's; this module only verifies the body and hands it to the engine.

pub mod webhook;

pub use webhook::{SignatureVerifier, SigningKeys, WebhookError, WebhookHandler, SIGNATURE_HEADER};
