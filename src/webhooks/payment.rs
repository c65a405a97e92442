use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use tracing::{error, info, instrument, warn};

use crate::{entities::PaymentStatus, errors::ServiceError, services::orders::OrderService};

type HmacSha256 = Hmac<Sha256>;

/// Name of the header carrying `t=<unix>,v1=<hex>` signatures.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

pub const EVENT_PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const EVENT_PAYMENT_FAILED: &str = "payment_intent.payment_failed";

/// Verifies `t=<timestamp>,v1=<signature>` headers: HMAC-SHA256 over
/// `"{t}.{payload}"` with the shared secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
    tolerance: Duration,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>, tolerance: Duration) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
        }
    }

    /// Hex HMAC for `timestamp` and `payload`.
    pub fn sign(&self, timestamp: i64, payload: &[u8]) -> Result<String, ServiceError> {
        Ok(hex::encode(self.mac(timestamp, payload)?))
    }

    /// Accepts the header when its timestamp is within tolerance of `now`
    /// and any `v1` entry matches.
    pub fn verify(&self, payload: &[u8], header: &str, now: i64) -> Result<(), ServiceError> {
        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| ServiceError::InvalidSignature("missing or malformed timestamp".into()))?;
        if candidates.is_empty() {
            return Err(ServiceError::InvalidSignature("no v1 signature".into()));
        }

        if (now - timestamp).unsigned_abs() > self.tolerance.as_secs() {
            return Err(ServiceError::InvalidSignature(
                "timestamp outside tolerance".into(),
            ));
        }

        let expected = self.mac(timestamp, payload)?;
        let matched = candidates
            .iter()
            .filter_map(|candidate| hex::decode(candidate).ok())
            .any(|candidate| constant_time_eq(&expected, &candidate));

        if matched {
            Ok(())
        } else {
            Err(ServiceError::InvalidSignature("signature mismatch".into()))
        }
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<Vec<u8>, ServiceError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| ServiceError::InternalError(format!("invalid webhook secret: {}", e)))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.iter().zip(b) {
        res |= x ^ y;
    }
    res == 0
}

#[derive(Debug, Deserialize)]
struct ProviderEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: ProviderEventData,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderEventData {
    #[serde(default)]
    object: Value,
}

impl ProviderEvent {
    fn order_ref(&self) -> Option<String> {
        match self.data.object.get("metadata")?.get("order_id")? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// What happened to an authenticated webhook. Every variant means the
/// provider should be told the delivery succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied {
        order_id: String,
        status: PaymentStatus,
    },
    MissingOrderId {
        event_type: String,
    },
    Ignored {
        event_type: String,
    },
    UpdateFailed {
        order_id: String,
        reason: String,
    },
}

/// Reconciles provider callbacks against orders.
///
/// Succeeded/failed events overwrite the order's payment status, so
/// duplicate and out-of-order deliveries are safe to apply; the last one
/// processed wins. After authentication nothing is surfaced as an error:
/// internal failures are logged and reported through [`WebhookOutcome`].
#[derive(Clone)]
pub struct PaymentWebhookHandler {
    orders: OrderService,
    verifier: SignatureVerifier,
    max_body_bytes: usize,
}

impl PaymentWebhookHandler {
    pub fn new(orders: OrderService, verifier: SignatureVerifier, max_body_bytes: usize) -> Self {
        Self {
            orders,
            verifier,
            max_body_bytes,
        }
    }

    /// # Errors
    ///
    /// * `ValidationError` - body too large or not a JSON event
    /// * `InvalidSignature` - header missing, stale or not matching
    #[instrument(skip(self, payload, signature_header), fields(bytes = payload.len()))]
    pub async fn handle_webhook_event(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookOutcome, ServiceError> {
        if payload.len() > self.max_body_bytes {
            warn!("Webhook body of {} bytes rejected", payload.len());
            return Err(ServiceError::ValidationError(format!(
                "webhook body exceeds {} bytes",
                self.max_body_bytes
            )));
        }

        let header = signature_header
            .ok_or_else(|| ServiceError::InvalidSignature("missing signature header".into()))?;
        self.verifier
            .verify(payload, header, Utc::now().timestamp())
            .map_err(|e| {
                warn!("Webhook signature rejected: {}", e);
                e
            })?;

        let event: ProviderEvent = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::ValidationError(format!("malformed webhook event: {}", e)))?;

        let status = match event.event_type.as_str() {
            EVENT_PAYMENT_SUCCEEDED => PaymentStatus::Successful,
            EVENT_PAYMENT_FAILED => PaymentStatus::Failed,
            other => {
                info!(event_type = other, "Unhandled webhook event type");
                return Ok(WebhookOutcome::Ignored {
                    event_type: other.to_string(),
                });
            }
        };

        let Some(order_id) = event.order_ref() else {
            warn!(
                event_id = event.id.as_deref().unwrap_or("-"),
                event_type = %event.event_type,
                "Webhook event has no order_id metadata"
            );
            return Ok(WebhookOutcome::MissingOrderId {
                event_type: event.event_type,
            });
        };

        match self
            .orders
            .update_payment_status_by_order_id(&order_id, status)
            .await
        {
            Ok(()) => Ok(WebhookOutcome::Applied { order_id, status }),
            Err(e) => {
                error!(order_id = %order_id, "Failed to apply webhook payment status: {}", e);
                Ok(WebhookOutcome::UpdateFailed {
                    order_id,
                    reason: e.to_string(),
                })
            }
        }
    }
}
