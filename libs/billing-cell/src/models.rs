use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_models::error::{AppError, ErrorKind};
use shared_utils::money::MoneyError;
use shared_utils::time::TimeError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn is_settled(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Refunds settle through the same PENDING -> COMPLETED | FAILED path.
pub type RefundStatus = PaymentStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Session,
    RescheduleFee,
    Donation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub order_id: Uuid,
    pub session_id: Option<Uuid>,
    pub payer_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_method: Option<String>,
    pub payment_type: PaymentType,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn pending(
        payer_id: Uuid,
        session_id: Option<Uuid>,
        amount: Decimal,
        currency: &str,
        payment_type: PaymentType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: Uuid::new_v4(),
            session_id,
            payer_id,
            amount,
            currency: currency.to_string(),
            status: PaymentStatus::Pending,
            payment_method: None,
            payment_type,
            created_at: now,
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }
}

/// Result of the reschedule fee rule for one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RescheduleFeeQuote {
    pub fee: Decimal,
    pub fee_percentage: Decimal,
    pub requires_payment: bool,
    pub hours_until_session: Decimal,
}

/// Money split produced by a cancellation. The three parts always add up to
/// `original_amount`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefundOutcome {
    pub original_amount: Decimal,
    pub refund_amount: Decimal,
    pub refund_percentage: Decimal,
    pub platform_commission: Decimal,
    pub therapist_retained: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancelRefund {
    pub id: Uuid,
    pub session_id: Uuid,
    pub original_amount: Decimal,
    pub refund_amount: Decimal,
    pub refund_percentage: Decimal,
    pub platform_commission: Decimal,
    pub therapist_retained: Decimal,
    pub hours_before_session: Decimal,
    pub refund_status: RefundStatus,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl CancelRefund {
    pub fn from_outcome(
        session_id: Uuid,
        outcome: &RefundOutcome,
        hours_before_session: Decimal,
        cancel_reason: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            original_amount: outcome.original_amount,
            refund_amount: outcome.refund_amount,
            refund_percentage: outcome.refund_percentage,
            platform_commission: outcome.platform_commission,
            therapist_retained: outcome.therapist_retained,
            hours_before_session,
            refund_status: RefundStatus::Pending,
            cancel_reason,
            created_at,
            settled_at: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DonationRequest {
    pub amount: Decimal,
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    SessionPayment,
    RescheduleFee,
    Refund,
    Donation,
}

/// One line of a revenue report. Derived on every run, never stored.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RevenueTransaction {
    pub id: Uuid,
    pub kind: TransactionKind,
    pub session_id: Option<Uuid>,
    pub amount: Decimal,
    pub commission: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RevenueReport {
    pub month: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub is_closed: bool,
    pub therapy_revenue: Decimal,
    pub refund_total: Decimal,
    pub donation_revenue: Decimal,
    pub total_commission: Decimal,
    pub net_revenue: Decimal,
    pub transaction_count: usize,
    pub excluded_count: usize,
    pub breakdown: Vec<RevenueTransaction>,
}

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Session already passed ({hours} hours ago)")]
    SessionAlreadyPassed { hours: Decimal },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid reporting period: {0}")]
    InvalidPeriod(String),

    #[error("Payment not found: {0}")]
    PaymentNotFound(Uuid),

    #[error("Payment {order_id} is already {status}")]
    PaymentAlreadySettled { order_id: Uuid, status: PaymentStatus },

    #[error("Refund not found for session {0}")]
    RefundNotFound(Uuid),

    #[error("Refund {refund_id} is already {status}")]
    RefundAlreadySettled { refund_id: Uuid, status: RefundStatus },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl BillingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::SessionAlreadyPassed { .. } => ErrorKind::Policy,
            BillingError::InvalidAmount(_) | BillingError::InvalidPeriod(_) => ErrorKind::Validation,
            BillingError::PaymentNotFound(_) | BillingError::RefundNotFound(_) => ErrorKind::NotFound,
            BillingError::PaymentAlreadySettled { .. } | BillingError::RefundAlreadySettled { .. } => {
                ErrorKind::Conflict
            }
            BillingError::Forbidden(_) => ErrorKind::Forbidden,
            BillingError::Gateway(_) | BillingError::Database(_) => ErrorKind::Internal,
        }
    }
}

impl From<MoneyError> for BillingError {
    fn from(err: MoneyError) -> Self {
        BillingError::InvalidAmount(err.to_string())
    }
}

impl From<TimeError> for BillingError {
    fn from(err: TimeError) -> Self {
        BillingError::InvalidPeriod(err.to_string())
    }
}

impl From<anyhow::Error> for BillingError {
    fn from(err: anyhow::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Gateway(msg) => AppError::ExternalService(msg),
            other => AppError::from_kind(other.kind(), other.to_string()),
        }
    }
}
