use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::models::{SessionError, SessionStatus, TherapySession};

/// Every status a session may move to from `current`.
pub fn valid_transitions(current: SessionStatus) -> &'static [SessionStatus] {
    use SessionStatus::*;

    match current {
        Requested => &[Approved, Cancelled],
        Approved | Scheduled => &[Confirmed, Rescheduled, Cancelled, Completed, NoShow],
        Confirmed => &[Rescheduled, Cancelled, Completed, NoShow],
        Rescheduled => &[Scheduled, Approved, Cancelled],
        Completed | Cancelled | NoShow => &[],
    }
}

pub fn can_transition(from: SessionStatus, to: SessionStatus) -> bool {
    valid_transitions(from).contains(&to)
}

pub fn ensure_transition(
    from: SessionStatus,
    to: SessionStatus,
    action: &str,
) -> Result<(), SessionError> {
    if !can_transition(from, to) {
        warn!("Invalid status transition attempted: {} -> {} ({})", from, to, action);
        return Err(SessionError::InvalidTransition {
            status: from,
            action: action.to_string(),
        });
    }

    debug!("Status transition validated: {} -> {}", from, to);
    Ok(())
}

/// A therapist may only move a session while their current rate still equals
/// the rate the patient booked at.
pub fn ensure_rate_unchanged(booked_rate: Decimal, current_rate: Decimal) -> Result<(), SessionError> {
    if booked_rate != current_rate {
        return Err(SessionError::RateChanged {
            booked: booked_rate,
            current: current_rate,
        });
    }
    Ok(())
}

/// Booked sessions whose time is over but which nobody documented yet.
pub fn needs_documentation(session: &TherapySession, now: DateTime<Utc>) -> bool {
    session.status.is_booked() && session.ends_at() <= now
}
