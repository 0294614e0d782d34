use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use shared_utils::money::ensure_non_negative;

use crate::models::{BillingError, Payment, PaymentStatus, PaymentType};
use crate::services::gateway::{ChargeRequest, PaymentGateway};
use crate::services::ledger::PaymentLedger;

#[derive(Debug, Clone, Serialize)]
pub struct PaymentReceipt {
    pub payment: Payment,
    pub checkout_url: Option<String>,
}

pub struct PaymentService {
    ledger: Arc<dyn PaymentLedger>,
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
}

impl PaymentService {
    pub fn new(ledger: Arc<dyn PaymentLedger>, gateway: Arc<dyn PaymentGateway>, currency: &str) -> Self {
        Self {
            ledger,
            gateway,
            currency: currency.to_string(),
        }
    }

    /// Records a PENDING payment and hands it to the gateway. Zero amounts
    /// complete immediately without a charge.
    #[instrument(skip(self, description))]
    pub async fn open_payment(
        &self,
        payer_id: Uuid,
        session_id: Option<Uuid>,
        amount: Decimal,
        payment_type: PaymentType,
        description: String,
        now: DateTime<Utc>,
    ) -> Result<PaymentReceipt, BillingError> {
        let amount = ensure_non_negative(amount)?;
        let payment = self
            .ledger
            .insert_payment(Payment::pending(payer_id, session_id, amount, &self.currency, payment_type, now))
            .await?;

        if amount.is_zero() {
            let payment = self
                .ledger
                .settle_payment(payment.order_id, PaymentStatus::Completed, Some("free".to_string()), now)
                .await?;
            return Ok(PaymentReceipt {
                payment,
                checkout_url: None,
            });
        }

        let charge = ChargeRequest {
            order_id: payment.order_id,
            amount,
            currency: self.currency.clone(),
            description,
        };

        let result = match self.gateway.charge(charge).await {
            Ok(result) => result,
            Err(err) => {
                warn!("Charge for order {} failed: {}", payment.order_id, err);
                self.ledger
                    .settle_payment(payment.order_id, PaymentStatus::Failed, None, now)
                    .await?;
                return Err(err);
            }
        };

        let payment = if result.status.is_settled() {
            self.ledger
                .settle_payment(payment.order_id, result.status, None, now)
                .await?
        } else {
            payment
        };

        info!("Opened {:?} payment {} ({})", payment_type, payment.order_id, payment.status);
        Ok(PaymentReceipt {
            payment,
            checkout_url: result.checkout_url,
        })
    }

    /// Gateway callback: settles a PENDING payment once.
    #[instrument(skip(self))]
    pub async fn confirm_payment(
        &self,
        order_id: Uuid,
        success: bool,
        payment_method: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Payment, BillingError> {
        let status = if success {
            PaymentStatus::Completed
        } else {
            PaymentStatus::Failed
        };

        let payment = self
            .ledger
            .settle_payment(order_id, status, payment_method, now)
            .await?;

        info!("Payment {} settled as {}", order_id, payment.status);
        Ok(payment)
    }

    pub async fn record_donation(
        &self,
        payer_id: Uuid,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<PaymentReceipt, BillingError> {
        if amount <= Decimal::ZERO {
            return Err(BillingError::InvalidAmount(format!(
                "donation amount {} must be positive",
                amount
            )));
        }

        self.open_payment(payer_id, None, amount, PaymentType::Donation, "Donation".to_string(), now)
            .await
    }

    pub async fn get_payment(&self, order_id: Uuid) -> Result<Payment, BillingError> {
        self.ledger
            .get_payment(order_id)
            .await?
            .ok_or(BillingError::PaymentNotFound(order_id))
    }

    /// The completed charge for the session itself, if any.
    pub async fn completed_session_payment(&self, session_id: Uuid) -> Result<Option<Payment>, BillingError> {
        Ok(self
            .ledger
            .payments_for_session(session_id)
            .await?
            .into_iter()
            .find(|p| p.payment_type == PaymentType::Session && p.is_completed()))
    }

    /// True while a session charge is still waiting on the gateway.
    pub async fn has_open_session_payment(&self, session_id: Uuid) -> Result<bool, BillingError> {
        Ok(self
            .ledger
            .payments_for_session(session_id)
            .await?
            .iter()
            .any(|p| p.payment_type == PaymentType::Session && p.status != PaymentStatus::Failed))
    }
}
