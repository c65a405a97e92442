/// Inbound payment provider callbacks
pub mod payment;

pub use payment::{PaymentWebhookHandler, SignatureVerifier, WebhookOutcome};
