use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{BillingError, PaymentStatus};

#[derive(Debug, Clone, Serialize)]
pub struct ChargeRequest {
    pub order_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
}

/// What the gateway reports back for a charge. Checkout flows usually answer
/// PENDING with a redirect URL and confirm later through the callback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentResult {
    pub order_id: Uuid,
    pub status: PaymentStatus,
    pub checkout_url: Option<String>,
    pub reference: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: ChargeRequest) -> Result<PaymentResult, BillingError>;
}

/// Card-processor client speaking a minimal JSON API:
/// `POST {base_url}/charges` with a bearer API key.
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpPaymentGateway {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.payment_gateway_url.trim_end_matches('/').to_string(),
            api_key: config.payment_gateway_api_key.clone(),
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn charge(&self, request: ChargeRequest) -> Result<PaymentResult, BillingError> {
        let url = format!("{}/charges", self.base_url);
        debug!("Charging {} {} for order {}", request.amount, request.currency, request.order_id);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| BillingError::Gateway(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BillingError::Gateway(e.to_string()))?;

        if !status.is_success() {
            error!("Payment gateway rejected order {}: {} - {}", request.order_id, status, body);
            return Err(BillingError::Gateway(format!("HTTP {}: {}", status, body)));
        }

        let result: PaymentResult = serde_json::from_str(&body)
            .map_err(|e| BillingError::Gateway(format!("Failed to parse charge response: {}", e)))?;

        if result.order_id != request.order_id {
            return Err(BillingError::Gateway(format!(
                "gateway answered for order {} instead of {}",
                result.order_id, request.order_id
            )));
        }

        info!("Order {} charged, gateway status {}", result.order_id, result.status);
        Ok(result)
    }
}

/// Used when no processor is configured: nothing is charged and the payment
/// waits for an explicit confirmation.
#[derive(Debug, Default)]
pub struct OfflineGateway;

#[async_trait]
impl PaymentGateway for OfflineGateway {
    async fn charge(&self, request: ChargeRequest) -> Result<PaymentResult, BillingError> {
        debug!("Offline gateway leaves order {} pending", request.order_id);
        Ok(PaymentResult {
            order_id: request.order_id,
            status: PaymentStatus::Pending,
            checkout_url: None,
            reference: None,
        })
    }
}
