use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use billing_cell::models::{BillingError, PaymentType};
use billing_cell::services::{PaymentLedger, RevenueInputs, RevenueSource};
use shared_utils::time::ReportWindow;

use crate::models::SessionError;
use crate::services::store::SessionStore;

fn to_billing(err: SessionError) -> BillingError {
    match err {
        SessionError::Billing(inner) => inner,
        other => BillingError::Database(other.to_string()),
    }
}

/// Feeds the revenue report from the payment ledger and the session store.
/// Session payments are dated by the session they paid for, so the source
/// also resolves every referenced session's schedule.
pub struct SessionRevenueSource {
    ledger: Arc<dyn PaymentLedger>,
    store: Arc<dyn SessionStore>,
}

impl SessionRevenueSource {
    pub fn new(ledger: Arc<dyn PaymentLedger>, store: Arc<dyn SessionStore>) -> Self {
        Self { ledger, store }
    }
}

#[async_trait]
impl RevenueSource for SessionRevenueSource {
    async fn collect(&self, window: &ReportWindow) -> Result<RevenueInputs, BillingError> {
        let payments = self.ledger.completed_payments().await?;

        let mut session_ids: Vec<Uuid> = payments
            .iter()
            .filter(|p| p.payment_type == PaymentType::Session)
            .filter_map(|p| p.session_id)
            .collect();
        session_ids.sort();
        session_ids.dedup();

        let session_times: HashMap<Uuid, _> = self
            .store
            .get_sessions(&session_ids)
            .await
            .map_err(to_billing)?
            .into_iter()
            .map(|s| (s.id, s.scheduled_at))
            .collect();

        let refunds = self.store.completed_refunds().await.map_err(to_billing)?;

        debug!(
            "Collected {} payments, {} sessions and {} refunds for {} - {}",
            payments.len(),
            session_times.len(),
            refunds.len(),
            window.start,
            window.end
        );

        Ok(RevenueInputs {
            payments,
            session_times,
            refunds,
        })
    }
}
