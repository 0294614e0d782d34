use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{BillingError, Payment, PaymentStatus};

/// Append-mostly record of payments. A payment's status moves out of
/// PENDING exactly once, and its amount never changes afterwards.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    async fn insert_payment(&self, payment: Payment) -> Result<Payment, BillingError>;

    async fn get_payment(&self, order_id: Uuid) -> Result<Option<Payment>, BillingError>;

    /// Compare-and-set from PENDING to `status`.
    async fn settle_payment(
        &self,
        order_id: Uuid,
        status: PaymentStatus,
        payment_method: Option<String>,
        settled_at: DateTime<Utc>,
    ) -> Result<Payment, BillingError>;

    async fn payments_for_session(&self, session_id: Uuid) -> Result<Vec<Payment>, BillingError>;

    async fn completed_payments(&self) -> Result<Vec<Payment>, BillingError>;
}

#[derive(Default)]
pub struct InMemoryPaymentLedger {
    payments: RwLock<HashMap<Uuid, Payment>>,
}

impl InMemoryPaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentLedger for InMemoryPaymentLedger {
    async fn insert_payment(&self, payment: Payment) -> Result<Payment, BillingError> {
        self.payments
            .write()
            .await
            .insert(payment.order_id, payment.clone());
        Ok(payment)
    }

    async fn get_payment(&self, order_id: Uuid) -> Result<Option<Payment>, BillingError> {
        Ok(self.payments.read().await.get(&order_id).cloned())
    }

    async fn settle_payment(
        &self,
        order_id: Uuid,
        status: PaymentStatus,
        payment_method: Option<String>,
        settled_at: DateTime<Utc>,
    ) -> Result<Payment, BillingError> {
        let mut payments = self.payments.write().await;
        let payment = payments
            .get_mut(&order_id)
            .ok_or(BillingError::PaymentNotFound(order_id))?;

        if payment.status.is_settled() {
            return Err(BillingError::PaymentAlreadySettled {
                order_id,
                status: payment.status,
            });
        }

        payment.status = status;
        if payment_method.is_some() {
            payment.payment_method = payment_method;
        }
        if status == PaymentStatus::Completed {
            payment.completed_at = Some(settled_at);
        }
        Ok(payment.clone())
    }

    async fn payments_for_session(&self, session_id: Uuid) -> Result<Vec<Payment>, BillingError> {
        let mut payments: Vec<Payment> = self
            .payments
            .read()
            .await
            .values()
            .filter(|p| p.session_id == Some(session_id))
            .cloned()
            .collect();
        payments.sort_by_key(|p| (p.created_at, p.order_id));
        Ok(payments)
    }

    async fn completed_payments(&self) -> Result<Vec<Payment>, BillingError> {
        Ok(self
            .payments
            .read()
            .await
            .values()
            .filter(|p| p.is_completed())
            .cloned()
            .collect())
    }
}

const PAYMENTS: &str = "/rest/v1/payments";

pub struct SupabasePaymentLedger {
    supabase: Arc<SupabaseClient>,
}

impl SupabasePaymentLedger {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl PaymentLedger for SupabasePaymentLedger {
    async fn insert_payment(&self, payment: Payment) -> Result<Payment, BillingError> {
        let row = serde_json::to_value(&payment).map_err(|e| BillingError::Database(e.to_string()))?;
        let stored: Payment = self.supabase.insert("payments", row).await?;
        debug!("Recorded {:?} payment {}", stored.payment_type, stored.order_id);
        Ok(stored)
    }

    async fn get_payment(&self, order_id: Uuid) -> Result<Option<Payment>, BillingError> {
        let path = format!("{}?order_id=eq.{}", PAYMENTS, order_id);
        let mut rows: Vec<Payment> = self.supabase.request(Method::GET, &path, None).await?;
        Ok(rows.pop())
    }

    async fn settle_payment(
        &self,
        order_id: Uuid,
        status: PaymentStatus,
        payment_method: Option<String>,
        settled_at: DateTime<Utc>,
    ) -> Result<Payment, BillingError> {
        let path = format!("{}?order_id=eq.{}&status=eq.PENDING", PAYMENTS, order_id);
        let mut patch = json!({ "status": status });
        if let Some(method) = payment_method {
            patch["payment_method"] = json!(method);
        }
        if status == PaymentStatus::Completed {
            patch["completed_at"] = json!(settled_at);
        }

        let mut updated: Vec<Payment> = self
            .supabase
            .mutate_returning(Method::PATCH, &path, patch)
            .await?;

        match updated.pop() {
            Some(payment) => Ok(payment),
            None => match self.get_payment(order_id).await? {
                Some(existing) => Err(BillingError::PaymentAlreadySettled {
                    order_id,
                    status: existing.status,
                }),
                None => Err(BillingError::PaymentNotFound(order_id)),
            },
        }
    }

    async fn payments_for_session(&self, session_id: Uuid) -> Result<Vec<Payment>, BillingError> {
        let path = format!(
            "{}?session_id=eq.{}&order=created_at.asc,order_id.asc",
            PAYMENTS, session_id
        );
        Ok(self.supabase.request(Method::GET, &path, None).await?)
    }

    async fn completed_payments(&self) -> Result<Vec<Payment>, BillingError> {
        let path = format!("{}?status=eq.COMPLETED", PAYMENTS);
        Ok(self.supabase.request(Method::GET, &path, None).await?)
    }
}
