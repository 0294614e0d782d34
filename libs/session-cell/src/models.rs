use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use availability_cell::models::{hhmm, AvailabilityError};
use billing_cell::models::{BillingError, CancelRefund, RescheduleFeeQuote};
use billing_cell::services::PaymentReceipt;
use shared_models::auth::AuthUser;
use shared_models::error::{AppError, ErrorKind};
use shared_utils::time::TimeError;

/// Sessions booked from a slot last one slot.
pub const SLOT_SESSION_MINUTES: i64 = 45;
/// Free-form requests default to a full hour.
pub const REQUESTED_SESSION_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Requested,
    Approved,
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    Rescheduled,
    NoShow,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Requested => "REQUESTED",
            SessionStatus::Approved => "APPROVED",
            SessionStatus::Scheduled => "SCHEDULED",
            SessionStatus::Confirmed => "CONFIRMED",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Cancelled => "CANCELLED",
            SessionStatus::Rescheduled => "RESCHEDULED",
            SessionStatus::NoShow => "NO_SHOW",
        }
    }

    /// States in which the session holds its time on the therapist's calendar.
    pub fn is_booked(&self) -> bool {
        matches!(
            self,
            SessionStatus::Approved | SessionStatus::Scheduled | SessionStatus::Confirmed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::NoShow
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    #[default]
    Individual,
    WithGuardian,
    Online,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TherapySession {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub guardian_id: Option<Uuid>,
    pub therapist_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i64,
    pub session_type: SessionType,
    pub status: SessionStatus,
    /// Therapist rate captured when the session was booked.
    pub booked_rate: Decimal,
    pub is_free: bool,
    pub slot_id: Option<Uuid>,
    pub meeting_link: Option<String>,
    pub notes: Option<String>,
    /// Fee charged by the most recent patient move, if any.
    pub reschedule_fee: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TherapySession {
    pub fn ends_at(&self) -> DateTime<Utc> {
        self.scheduled_at + Duration::minutes(self.duration_minutes)
    }

    /// What the patient owes for the session itself.
    pub fn charge_amount(&self) -> Decimal {
        if self.is_free {
            Decimal::ZERO
        } else {
            self.booked_rate
        }
    }

    pub fn is_patient_side(&self, user_id: Uuid) -> bool {
        self.patient_id == user_id || self.guardian_id == Some(user_id)
    }

    pub fn involves(&self, user: &AuthUser) -> bool {
        self.therapist_id == user.id || self.is_patient_side(user.id)
    }

    /// Patient plus linked guardian, the people told about schedule changes.
    pub fn patient_side_recipients(&self) -> Vec<Uuid> {
        let mut recipients = vec![self.patient_id];
        if let Some(guardian) = self.guardian_id {
            recipients.push(guardian);
        }
        recipients
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DayStatus {
    /// No slots configured for the date at all.
    Unavailable,
    /// Slots exist but none can take the requested duration.
    FullyBooked,
    Open,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SlotOffer {
    pub slot_id: Uuid,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    pub is_available: bool,
    pub is_free: bool,
    pub cost: Decimal,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DayAvailability {
    pub therapist_id: Uuid,
    pub date: NaiveDate,
    pub status: DayStatus,
    pub slots: Vec<SlotOffer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookSlotRequest {
    pub therapist_id: Uuid,
    pub date: NaiveDate,
    pub start_time: String,
    pub session_type: Option<SessionType>,
    pub notes: Option<String>,
    /// Required when a guardian books for a patient.
    pub patient_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestSessionRequest {
    pub therapist_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub session_type: Option<SessionType>,
    pub notes: Option<String>,
    pub patient_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestDecision {
    Approve,
    Decline,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RespondRequest {
    pub action: RequestDecision,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotChoice {
    pub date: NaiveDate,
    pub start_time: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub success: bool,
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettleRefundRequest {
    pub success: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetRateRequest {
    pub rate: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancellationOutcome {
    pub session: TherapySession,
    pub refund_amount: Decimal,
    pub refund_percentage: Decimal,
    pub refund: Option<CancelRefund>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveOutcome {
    pub session: TherapySession,
    pub fee: RescheduleFeeQuote,
    pub fee_payment: Option<PaymentReceipt>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionPaymentOutcome {
    pub session: TherapySession,
    pub receipt: PaymentReceipt,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Slot taken: {0}")]
    SlotTaken(String),

    #[error("Therapist unavailable: {0}")]
    TherapistUnavailable(String),

    #[error("Cannot {action} a session in status {status}")]
    InvalidTransition { status: SessionStatus, action: String },

    #[error("Session cannot be rescheduled: rate changed from {booked} to {current}")]
    RateChanged { booked: Decimal, current: Decimal },

    #[error("Policy violation: {0}")]
    Policy(String),

    #[error("Session {0} was modified concurrently, reload and retry")]
    Conflict(Uuid),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Availability(#[from] AvailabilityError),

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("Database error: {0}")]
    Database(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Validation(_) => ErrorKind::Validation,
            SessionError::SlotTaken(_)
            | SessionError::TherapistUnavailable(_)
            | SessionError::InvalidTransition { .. }
            | SessionError::Conflict(_) => ErrorKind::Conflict,
            SessionError::RateChanged { .. } | SessionError::Policy(_) => ErrorKind::Policy,
            SessionError::NotFound(_) => ErrorKind::NotFound,
            SessionError::Forbidden(_) => ErrorKind::Forbidden,
            SessionError::Availability(err) => err.kind(),
            SessionError::Billing(err) => err.kind(),
            SessionError::Database(_) => ErrorKind::Internal,
        }
    }

    pub fn session_not_found(session_id: Uuid) -> Self {
        SessionError::NotFound(format!("session {}", session_id))
    }
}

impl From<TimeError> for SessionError {
    fn from(err: TimeError) -> Self {
        SessionError::Validation(err.to_string())
    }
}

impl From<anyhow::Error> for SessionError {
    fn from(err: anyhow::Error) -> Self {
        SessionError::Database(err.to_string())
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Billing(BillingError::Gateway(msg)) => AppError::ExternalService(msg),
            other => AppError::from_kind(other.kind(), other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rate_change_message_names_both_rates() {
        let err = SessionError::RateChanged {
            booked: dec!(400.00),
            current: dec!(450.00),
        };
        assert!(err.to_string().contains("rate changed from 400.00 to 450.00"));
        assert_eq!(err.kind(), ErrorKind::Policy);
    }

    #[test]
    fn status_serialises_in_upper_snake_case() {
        assert_eq!(serde_json::to_value(SessionStatus::NoShow).unwrap(), "NO_SHOW");
        assert_eq!(
            serde_json::from_value::<SessionStatus>(serde_json::json!("RESCHEDULED")).unwrap(),
            SessionStatus::Rescheduled
        );
    }

    #[test]
    fn nested_errors_keep_their_kind() {
        let err: SessionError = BillingError::SessionAlreadyPassed { hours: dec!(1) }.into();
        assert_eq!(err.kind(), ErrorKind::Policy);
        let err: SessionError = AvailabilityError::AlreadyBooked(Uuid::nil()).into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}
