use std::collections::HashMap;
use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use billing_cell::models::{BillingError, Payment, PaymentStatus, PaymentType};
use billing_cell::services::{RevenueInputs, RevenueService, RevenueSource};
use shared_utils::time::ReportWindow;

struct FixedSource {
    inputs: RevenueInputs,
}

#[async_trait]
impl RevenueSource for FixedSource {
    async fn collect(&self, _window: &ReportWindow) -> Result<RevenueInputs, BillingError> {
        Ok(self.inputs.clone())
    }
}

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

fn session_payment(session_id: Uuid, amount: Decimal) -> Payment {
    Payment {
        order_id: Uuid::new_v4(),
        session_id: Some(session_id),
        payer_id: Uuid::new_v4(),
        amount,
        currency: "EGP".to_string(),
        status: PaymentStatus::Completed,
        payment_method: Some("card".to_string()),
        payment_type: PaymentType::Session,
        created_at: at(2025, 8, 20, 9),
        completed_at: Some(at(2025, 8, 20, 9)),
    }
}

fn service() -> RevenueService {
    let mut session_times = HashMap::new();
    let mut payments = Vec::new();

    // Two sessions share a start time so ordering relies on the id tie-break.
    for (amount, when) in [
        (dec!(400), at(2025, 9, 3, 10)),
        (dec!(600), at(2025, 9, 3, 10)),
        (dec!(250), at(2025, 9, 28, 16)),
    ] {
        let session_id = Uuid::new_v4();
        session_times.insert(session_id, when);
        payments.push(session_payment(session_id, amount));
    }

    RevenueService::new(Arc::new(FixedSource {
        inputs: RevenueInputs {
            payments,
            session_times,
            refunds: Vec::new(),
        },
    }))
}

#[tokio::test]
async fn closed_month_report_is_reproducible() {
    let service = service();

    let first = service.monthly_report("2025-09", at(2025, 10, 15, 12)).await.unwrap();
    let second = service.monthly_report("2025-09", at(2026, 1, 2, 8)).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(first.transaction_count, 3);
    assert_eq!(first.total_commission, dec!(125.00));
    assert_eq!(first.net_revenue, dec!(125.00));
    assert!(first.is_closed);
}

#[tokio::test]
async fn current_month_is_cut_at_now() {
    let report = service()
        .monthly_report("2025-09", at(2025, 9, 15, 0))
        .await
        .unwrap();

    assert!(!report.is_closed);
    assert_eq!(report.period_end, at(2025, 9, 15, 0));
    assert_eq!(report.transaction_count, 2);
    assert_eq!(report.therapy_revenue, dec!(1000));
}

#[tokio::test]
async fn future_and_malformed_months_are_rejected() {
    let service = service();
    let now = at(2025, 9, 15, 0);

    assert_matches!(
        service.monthly_report("2025-10", now).await,
        Err(BillingError::InvalidPeriod(_))
    );
    assert_matches!(
        service.monthly_report("2025-13", now).await,
        Err(BillingError::InvalidPeriod(_))
    );
    assert_matches!(
        service.monthly_report("Sept 2025", now).await,
        Err(BillingError::InvalidPeriod(_))
    );
}
