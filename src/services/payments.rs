use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, instrument};

use crate::{config::PaymentConfig, errors::ServiceError};

/// Parameters for one hosted-checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    pub order_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// Handle returned by the provider for a hosted checkout page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSession {
    pub session_id: String,
    pub url: String,
}

/// Outbound half of the payment provider boundary.
///
/// Implementations must embed `order_id` as metadata on the resulting payment
/// intent; that metadata is the only link between an inbound webhook and the
/// internal order. Failures are returned as-is and never retried here.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<PaymentSession, ServiceError>;
}

/// Converts a decimal amount into the smallest currency unit (cents).
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .filter(|minor| *minor >= 0)
        .ok_or_else(|| ServiceError::ValidationError(format!("Invalid amount: {}", amount)))
}

#[derive(Debug, Deserialize)]
struct StripeSessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    message: Option<String>,
}

/// Stripe Checkout Sessions client.
#[derive(Clone)]
pub struct StripeCheckoutGateway {
    client: reqwest::Client,
    api_base_url: String,
    secret_key: String,
}

impl StripeCheckoutGateway {
    pub fn new(
        api_base_url: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }

    pub fn from_config(config: &PaymentConfig) -> Result<Self, ServiceError> {
        Self::new(
            config.api_base_url.clone(),
            config.secret_key.clone(),
            config.request_timeout(),
        )
    }

    fn session_params(request: &CheckoutSessionRequest) -> Result<Vec<(String, String)>, ServiceError> {
        let unit_amount = to_minor_units(request.amount)?;
        let order_id = request.order_id.to_string();

        Ok(vec![
            ("mode".into(), "payment".into()),
            ("payment_method_types[0]".into(), "card".into()),
            ("success_url".into(), request.success_url.clone()),
            ("cancel_url".into(), request.cancel_url.clone()),
            (
                "line_items[0][price_data][currency]".into(),
                request.currency.clone(),
            ),
            (
                "line_items[0][price_data][product_data][name]".into(),
                format!("Order #{}", request.order_id),
            ),
            (
                "line_items[0][price_data][unit_amount]".into(),
                unit_amount.to_string(),
            ),
            ("line_items[0][quantity]".into(), "1".into()),
            ("metadata[order_id]".into(), order_id.clone()),
            ("payment_intent_data[metadata][order_id]".into(), order_id),
        ])
    }
}

#[async_trait]
impl PaymentGateway for StripeCheckoutGateway {
    #[instrument(skip(self), fields(order_id = request.order_id))]
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<PaymentSession, ServiceError> {
        let params = Self::session_params(request)?;

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base_url))
            .basic_auth(&self.secret_key, Some(""))
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                error!("Checkout session request failed: {}", e);
                ServiceError::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<StripeErrorEnvelope>(&body)
                .ok()
                .and_then(|envelope| envelope.error.message)
                .unwrap_or(body);
            error!(%status, "Payment provider rejected checkout session: {}", message);
            return Err(ServiceError::ExternalGatewayError(format!(
                "provider returned {}: {}",
                status, message
            )));
        }

        let session: StripeSessionResponse = response.json().await.map_err(|e| {
            ServiceError::ExternalGatewayError(format!("unreadable provider response: {}", e))
        })?;

        let url = session.url.ok_or_else(|| {
            ServiceError::ExternalGatewayError(format!(
                "checkout session {} has no redirect url",
                session.id
            ))
        })?;

        info!(session_id = %session.id, "Checkout session created");
        Ok(PaymentSession {
            session_id: session.id,
            url,
        })
    }
}
