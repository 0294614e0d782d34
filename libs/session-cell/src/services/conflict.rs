//! Booking conflict resolution. Reads here are advisory: the slot
//! compare-and-set at booking time is what actually serialises bookings.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use availability_cell::models::AvailabilitySlot;

use crate::models::{DayAvailability, DayStatus, SlotOffer, TherapySession};

/// Margin kept free before and after every booked session.
pub const BUFFER_MINUTES: i64 = 15;

/// True when a candidate starting at `start` and lasting `duration_minutes`
/// reaches into the buffered window of `session`. Touching the buffer edge
/// is allowed.
pub fn conflicts_with(session: &TherapySession, start: DateTime<Utc>, duration_minutes: i64) -> bool {
    if !session.status.is_booked() {
        return false;
    }

    let buffer = Duration::minutes(BUFFER_MINUTES);
    let buffer_start = session.scheduled_at - buffer;
    let buffer_end = session.ends_at() + buffer;
    let candidate_end = start + Duration::minutes(duration_minutes);

    start < buffer_end && candidate_end > buffer_start
}

/// First booked session whose buffer window the candidate overlaps.
pub fn first_conflict<'a>(
    sessions: &'a [TherapySession],
    start: DateTime<Utc>,
    duration_minutes: i64,
) -> Option<&'a TherapySession> {
    sessions
        .iter()
        .find(|session| conflicts_with(session, start, duration_minutes))
}

/// Bookability of every slot a therapist has on `date`.
///
/// A slot is offered as available when it is not booked, has not started
/// yet and clears the buffer of every booked session. Free slots cost
/// nothing; the rest cost the therapist's current rate.
pub fn resolve_day(
    therapist_id: Uuid,
    date: NaiveDate,
    mut slots: Vec<AvailabilitySlot>,
    sessions: &[TherapySession],
    duration_minutes: i64,
    now: DateTime<Utc>,
    current_rate: Decimal,
) -> DayAvailability {
    slots.sort_by_key(|slot| slot.start_time);

    let offers: Vec<SlotOffer> = slots
        .iter()
        .filter(|slot| slot.therapist_id == therapist_id && slot.date == date)
        .map(|slot| {
            let starts_at = slot.starts_at();
            let is_available = !slot.is_booked
                && starts_at > now
                && first_conflict(sessions, starts_at, duration_minutes).is_none();

            SlotOffer {
                slot_id: slot.id,
                start_time: slot.start_time,
                is_available,
                is_free: slot.is_free,
                cost: if slot.is_free { Decimal::ZERO } else { current_rate },
            }
        })
        .collect();

    let status = if offers.is_empty() {
        DayStatus::Unavailable
    } else if offers.iter().any(|offer| offer.is_available) {
        DayStatus::Open
    } else {
        DayStatus::FullyBooked
    };

    DayAvailability {
        therapist_id,
        date,
        status,
        slots: offers,
    }
}
