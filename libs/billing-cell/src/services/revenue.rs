use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use shared_utils::money::sum;
use shared_utils::time::{MonthKey, ReportWindow};

use crate::models::{
    BillingError, CancelRefund, Payment, PaymentType, RefundStatus, RevenueReport,
    RevenueTransaction, TransactionKind,
};
use crate::services::calculator::platform_commission;

/// Raw records a report is folded from.
#[derive(Debug, Clone, Default)]
pub struct RevenueInputs {
    pub payments: Vec<Payment>,
    /// `scheduled_at` of every session referenced by a session payment.
    pub session_times: HashMap<Uuid, DateTime<Utc>>,
    pub refunds: Vec<CancelRefund>,
}

/// Supplies report inputs. May over-fetch; the aggregator applies the window.
#[async_trait]
pub trait RevenueSource: Send + Sync {
    async fn collect(&self, window: &ReportWindow) -> Result<RevenueInputs, BillingError>;
}

pub struct RevenueService {
    source: Arc<dyn RevenueSource>,
}

impl RevenueService {
    pub fn new(source: Arc<dyn RevenueSource>) -> Self {
        Self { source }
    }

    #[instrument(skip(self))]
    pub async fn monthly_report(&self, month: &str, now: DateTime<Utc>) -> Result<RevenueReport, BillingError> {
        let month = MonthKey::parse(month)?;
        let window = month.window(now)?;
        let inputs = self.source.collect(&window).await?;

        let report = build_report(month, window, &inputs);
        info!(
            "Revenue report {}: {} transactions, net {}",
            report.month, report.transaction_count, report.net_revenue
        );
        Ok(report)
    }
}

fn payment_line(
    payment: &Payment,
    session_times: &HashMap<Uuid, DateTime<Utc>>,
) -> Result<RevenueTransaction, String> {
    if payment.amount < Decimal::ZERO {
        return Err(format!("negative amount {}", payment.amount));
    }

    let (kind, occurred_at, commission) = match payment.payment_type {
        PaymentType::Session => {
            let session_id = payment
                .session_id
                .ok_or_else(|| "session payment without session".to_string())?;
            let scheduled_at = session_times
                .get(&session_id)
                .copied()
                .ok_or_else(|| format!("session {} not found", session_id))?;
            let completed_at = payment.completed_at.ok_or("completed without completed_at")?;
            // A payment settled after its session is booked when it settled.
            (
                TransactionKind::SessionPayment,
                scheduled_at.max(completed_at),
                platform_commission(payment.amount),
            )
        }
        PaymentType::RescheduleFee => (
            TransactionKind::RescheduleFee,
            payment.completed_at.ok_or("completed without completed_at")?,
            platform_commission(payment.amount),
        ),
        PaymentType::Donation => (
            TransactionKind::Donation,
            payment.completed_at.ok_or("completed without completed_at")?,
            Decimal::ZERO,
        ),
    };

    Ok(RevenueTransaction {
        id: payment.order_id,
        kind,
        session_id: payment.session_id,
        amount: payment.amount,
        commission,
        occurred_at,
    })
}

fn refund_line(refund: &CancelRefund) -> Result<RevenueTransaction, String> {
    if refund.refund_amount < Decimal::ZERO || refund.original_amount < Decimal::ZERO {
        return Err("negative refund figures".to_string());
    }
    if refund.refund_amount > refund.original_amount {
        return Err(format!(
            "refund {} exceeds original {}",
            refund.refund_amount, refund.original_amount
        ));
    }

    // Commission was booked once with the session payment.
    Ok(RevenueTransaction {
        id: refund.id,
        kind: TransactionKind::Refund,
        session_id: Some(refund.session_id),
        amount: -refund.refund_amount,
        commission: Decimal::ZERO,
        occurred_at: refund.settled_at.ok_or("settled without settled_at")?,
    })
}

/// Folds completed records inside `window` into a report. Malformed records
/// are logged and left out instead of failing the whole report.
pub fn build_report(month: MonthKey, window: ReportWindow, inputs: &RevenueInputs) -> RevenueReport {
    let mut breakdown = Vec::new();
    let mut excluded_count = 0;

    for payment in inputs.payments.iter().filter(|p| p.is_completed()) {
        match payment_line(payment, &inputs.session_times) {
            Ok(line) if window.contains(line.occurred_at) => breakdown.push(line),
            Ok(_) => {}
            Err(reason) => {
                warn!("Excluding payment {} from revenue: {}", payment.order_id, reason);
                excluded_count += 1;
            }
        }
    }

    for refund in inputs
        .refunds
        .iter()
        .filter(|r| r.refund_status == RefundStatus::Completed)
    {
        match refund_line(refund) {
            Ok(line) if window.contains(line.occurred_at) => breakdown.push(line),
            Ok(_) => {}
            Err(reason) => {
                warn!("Excluding refund {} from revenue: {}", refund.id, reason);
                excluded_count += 1;
            }
        }
    }

    breakdown.sort_by(|a, b| {
        b.occurred_at
            .cmp(&a.occurred_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    let therapy_revenue = sum(breakdown
        .iter()
        .filter(|t| t.kind != TransactionKind::Donation)
        .map(|t| t.amount));
    let refund_total = sum(breakdown
        .iter()
        .filter(|t| t.kind == TransactionKind::Refund)
        .map(|t| -t.amount));
    let donation_revenue = sum(breakdown
        .iter()
        .filter(|t| t.kind == TransactionKind::Donation)
        .map(|t| t.amount));
    let total_commission = sum(breakdown.iter().map(|t| t.commission));

    RevenueReport {
        month: month.to_string(),
        period_start: window.start,
        period_end: window.end,
        is_closed: window.closed,
        therapy_revenue,
        refund_total,
        donation_revenue,
        total_commission,
        net_revenue: total_commission + donation_revenue,
        transaction_count: breakdown.len(),
        excluded_count,
        breakdown,
    }
}
