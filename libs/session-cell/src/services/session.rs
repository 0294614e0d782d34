use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use availability_cell::models::{AvailabilityError, AvailabilitySlot};
use availability_cell::services::AvailabilityService;
use billing_cell::models::{
    BillingError, CancelRefund, Payment, PaymentType, RefundStatus, RescheduleFeeQuote,
};
use billing_cell::services::calculator::{self, LATE_CHANGE_THRESHOLD_HOURS};
use billing_cell::services::PaymentService;
use shared_models::auth::{AuthUser, Role};
use shared_utils::time::{format_slot_time, hours_until, parse_slot_time, slot_instant, MonthKey};

use crate::models::{
    BookSlotRequest, CancellationOutcome, DayAvailability, MoveOutcome, RequestDecision,
    RequestSessionRequest, SessionError, SessionPaymentOutcome, SessionStatus, SessionType,
    SlotChoice, TherapySession, REQUESTED_SESSION_MINUTES, SLOT_SESSION_MINUTES,
};
use crate::services::conflict::{first_conflict, resolve_day};
use crate::services::lifecycle::{self, ensure_rate_unchanged, ensure_transition};
use crate::services::notifications::Notifier;
use crate::services::rates::RateProvider;
use crate::services::store::SessionStore;

const BOOKED_STATES: [SessionStatus; 3] = [
    SessionStatus::Approved,
    SessionStatus::Scheduled,
    SessionStatus::Confirmed,
];

fn slot_taken(err: AvailabilityError) -> SessionError {
    match err {
        AvailabilityError::AlreadyBooked(slot_id) => {
            SessionError::SlotTaken(format!("slot {} was booked by someone else", slot_id))
        }
        other => other.into(),
    }
}

/// Orchestrates the session lifecycle across slots, payments, rates and
/// notifications. Every operation takes `now`; handlers pass `Utc::now()`.
pub struct SessionService {
    availability: Arc<AvailabilityService>,
    store: Arc<dyn SessionStore>,
    payments: Arc<PaymentService>,
    rates: Arc<dyn RateProvider>,
    notifier: Notifier,
}

impl SessionService {
    pub fn new(
        availability: Arc<AvailabilityService>,
        store: Arc<dyn SessionStore>,
        payments: Arc<PaymentService>,
        rates: Arc<dyn RateProvider>,
        notifier: Notifier,
    ) -> Self {
        Self {
            availability,
            store,
            payments,
            rates,
            notifier,
        }
    }

    // ==============================================================================
    // HELPERS
    // ==============================================================================

    async fn load(&self, session_id: Uuid) -> Result<TherapySession, SessionError> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| SessionError::session_not_found(session_id))
    }

    fn ensure_therapist_of(session: &TherapySession, user: &AuthUser) -> Result<(), SessionError> {
        if !user.is_therapist() || session.therapist_id != user.id {
            return Err(SessionError::Forbidden(
                "Only the session's therapist can do this".to_string(),
            ));
        }
        Ok(())
    }

    fn ensure_patient_side_of(session: &TherapySession, user: &AuthUser) -> Result<(), SessionError> {
        if !user.is_patient_side() || !session.is_patient_side(user.id) {
            return Err(SessionError::Forbidden(
                "Only the patient or their guardian can do this".to_string(),
            ));
        }
        Ok(())
    }

    fn ensure_participant(session: &TherapySession, user: &AuthUser) -> Result<(), SessionError> {
        if !user.is_admin() && !session.involves(user) {
            return Err(SessionError::Forbidden(
                "You are not a participant of this session".to_string(),
            ));
        }
        Ok(())
    }

    /// Who the session is for, and the guardian acting for them if any.
    fn resolve_patient(user: &AuthUser, requested: Option<Uuid>) -> Result<(Uuid, Option<Uuid>), SessionError> {
        match user.role {
            Role::Patient => match requested {
                Some(patient_id) if patient_id != user.id => Err(SessionError::Forbidden(
                    "Patients can only book for themselves".to_string(),
                )),
                _ => Ok((user.id, None)),
            },
            Role::Guardian => {
                let patient_id = requested.ok_or_else(|| {
                    SessionError::Validation("patient_id is required when a guardian books".to_string())
                })?;
                Ok((patient_id, Some(user.id)))
            }
            _ => Err(SessionError::Forbidden(
                "Only patients and guardians can book sessions".to_string(),
            )),
        }
    }

    async fn sessions_on(&self, therapist_id: Uuid, date: NaiveDate) -> Result<Vec<TherapySession>, SessionError> {
        // Neighbouring days too: a late session can overlap an early one across midnight.
        let day_start = slot_instant(date, NaiveTime::MIN);
        self.store
            .sessions_for_therapist_between(
                therapist_id,
                day_start - Duration::days(1),
                day_start + Duration::days(2),
            )
            .await
    }

    /// Finds the slot behind `choice`, checks it against the therapist's
    /// booked sessions (ignoring `moving`, the session being moved) and
    /// books it. The slot booking is the commit point for contention.
    async fn claim_slot(
        &self,
        therapist_id: Uuid,
        date: NaiveDate,
        start_time: &str,
        moving: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<AvailabilitySlot, SessionError> {
        let start = parse_slot_time(start_time)?;

        let slot = match self.availability.find_slot(therapist_id, date, start).await? {
            Some(slot) => slot,
            None => {
                if self.availability.list_slots(therapist_id, date).await?.is_empty() {
                    return Err(SessionError::TherapistUnavailable(format!(
                        "therapist {} has no availability on {}",
                        therapist_id, date
                    )));
                }
                return Err(SessionError::NotFound(format!(
                    "no slot at {} on {}",
                    format_slot_time(start),
                    date
                )));
            }
        };

        if slot.starts_at() <= now {
            return Err(SessionError::Validation(format!(
                "slot {} on {} has already started",
                format_slot_time(start),
                date
            )));
        }
        if slot.is_booked {
            return Err(SessionError::SlotTaken(format!(
                "{} on {} is already booked",
                format_slot_time(start),
                date
            )));
        }

        let sessions: Vec<TherapySession> = self
            .sessions_on(therapist_id, date)
            .await?
            .into_iter()
            .filter(|s| Some(s.id) != moving)
            .collect();
        if let Some(clash) = first_conflict(&sessions, slot.starts_at(), SLOT_SESSION_MINUTES) {
            return Err(SessionError::SlotTaken(format!(
                "{} on {} is too close to the session at {}",
                format_slot_time(start),
                date,
                clash.scheduled_at.format("%H:%M")
            )));
        }

        self.availability.mark_booked(slot.id).await.map_err(slot_taken)
    }

    /// Gives a slot back after a failed commit or once a session left it.
    async fn release_slot(&self, slot_id: Uuid) {
        if let Err(e) = self.availability.release(slot_id).await {
            warn!("Failed to release slot {}: {}", slot_id, e);
        }
    }

    /// Amount of the completed session payment, if any.
    async fn paid_amount(&self, session: &TherapySession) -> Result<Option<Decimal>, SessionError> {
        Ok(self
            .payments
            .completed_session_payment(session.id)
            .await?
            .map(|payment| payment.amount))
    }

    // ==============================================================================
    // AVAILABILITY & BOOKING
    // ==============================================================================

    #[instrument(skip(self))]
    pub async fn available_slots(
        &self,
        therapist_id: Uuid,
        date: NaiveDate,
        duration_minutes: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<DayAvailability, SessionError> {
        let duration = duration_minutes.unwrap_or(SLOT_SESSION_MINUTES);
        if duration <= 0 {
            return Err(SessionError::Validation(format!(
                "duration must be positive, got {} minutes",
                duration
            )));
        }

        let slots = self.availability.list_slots(therapist_id, date).await?;
        let sessions = self.sessions_on(therapist_id, date).await?;
        let rate = self.rates.current_rate(therapist_id).await?;

        let day = resolve_day(therapist_id, date, slots, &sessions, duration, now, rate);
        debug!(
            "Therapist {} on {}: {:?} with {} slots",
            therapist_id,
            date,
            day.status,
            day.slots.len()
        );
        Ok(day)
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn book_slot(
        &self,
        user: &AuthUser,
        request: BookSlotRequest,
        now: DateTime<Utc>,
    ) -> Result<TherapySession, SessionError> {
        let (patient_id, guardian_id) = Self::resolve_patient(user, request.patient_id)?;
        let rate = self.rates.current_rate(request.therapist_id).await?;

        let slot = self
            .claim_slot(request.therapist_id, request.date, &request.start_time, None, now)
            .await?;

        let session = TherapySession {
            id: Uuid::new_v4(),
            patient_id,
            guardian_id,
            therapist_id: request.therapist_id,
            scheduled_at: slot.starts_at(),
            duration_minutes: SLOT_SESSION_MINUTES,
            session_type: request.session_type.unwrap_or_default(),
            status: SessionStatus::Scheduled,
            booked_rate: rate,
            is_free: slot.is_free,
            slot_id: Some(slot.id),
            meeting_link: None,
            notes: request.notes,
            reschedule_fee: None,
            created_at: now,
            updated_at: now,
        };

        let session = match self.store.insert_session(session).await {
            Ok(session) => session,
            Err(e) => {
                self.release_slot(slot.id).await;
                return Err(e);
            }
        };

        info!(
            "Session {} booked with therapist {} at {}",
            session.id, session.therapist_id, session.scheduled_at
        );
        self.notifier.notify(
            session.therapist_id,
            "New session booked",
            &format!("A session was booked for {}", session.scheduled_at.format("%Y-%m-%d %H:%M")),
            false,
        );
        Ok(session)
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn request_session(
        &self,
        user: &AuthUser,
        request: RequestSessionRequest,
        now: DateTime<Utc>,
    ) -> Result<TherapySession, SessionError> {
        let (patient_id, guardian_id) = Self::resolve_patient(user, request.patient_id)?;
        if request.scheduled_at <= now {
            return Err(SessionError::Validation(
                "Requested time must be in the future".to_string(),
            ));
        }

        let rate = self.rates.current_rate(request.therapist_id).await?;
        let session = TherapySession {
            id: Uuid::new_v4(),
            patient_id,
            guardian_id,
            therapist_id: request.therapist_id,
            scheduled_at: request.scheduled_at,
            duration_minutes: REQUESTED_SESSION_MINUTES,
            session_type: request.session_type.unwrap_or(if guardian_id.is_some() {
                SessionType::WithGuardian
            } else {
                SessionType::Individual
            }),
            status: SessionStatus::Requested,
            booked_rate: rate,
            is_free: false,
            slot_id: None,
            meeting_link: None,
            notes: request.notes,
            reschedule_fee: None,
            created_at: now,
            updated_at: now,
        };

        let session = self.store.insert_session(session).await?;
        info!("Session {} requested for {}", session.id, session.scheduled_at);
        self.notifier.notify(
            session.therapist_id,
            "New session request",
            &format!("A patient asked for a session on {}", session.scheduled_at.format("%Y-%m-%d %H:%M")),
            false,
        );
        Ok(session)
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn respond_to_request(
        &self,
        user: &AuthUser,
        session_id: Uuid,
        decision: RequestDecision,
        now: DateTime<Utc>,
    ) -> Result<TherapySession, SessionError> {
        let session = self.load(session_id).await?;
        Self::ensure_therapist_of(&session, user)?;
        if session.status != SessionStatus::Requested {
            return Err(SessionError::InvalidTransition {
                status: session.status,
                action: "respond to".to_string(),
            });
        }

        let mut updated = session.clone();
        updated.updated_at = now;

        if decision == RequestDecision::Decline {
            ensure_transition(session.status, SessionStatus::Cancelled, "decline")?;
            updated.status = SessionStatus::Cancelled;
            let updated = self.store.update_session_if(session.status, updated).await?;

            info!("Request {} declined", session_id);
            self.notifier.notify_all(
                &updated.patient_side_recipients(),
                "Session request declined",
                "Your therapist could not take the requested session",
                false,
            );
            return Ok(updated);
        }

        ensure_transition(session.status, SessionStatus::Approved, "approve")?;
        if session.scheduled_at <= now {
            return Err(SessionError::Policy(
                "The requested time has already passed".to_string(),
            ));
        }

        let date = session.scheduled_at.date_naive();
        let sessions = self.sessions_on(session.therapist_id, date).await?;
        if let Some(clash) = first_conflict(&sessions, session.scheduled_at, session.duration_minutes) {
            return Err(SessionError::TherapistUnavailable(format!(
                "requested time collides with session {} at {}",
                clash.id,
                clash.scheduled_at.format("%H:%M")
            )));
        }

        let start = session.scheduled_at.time();
        let slot = match self.availability.find_slot(session.therapist_id, date, start).await? {
            Some(slot) => slot,
            None => self
                .availability
                .add_slot(session.therapist_id, date, &format_slot_time(start), false)
                .await
                .map_err(|e| match e {
                    AvailabilityError::Overlap { .. } => SessionError::TherapistUnavailable(e.to_string()),
                    other => other.into(),
                })?,
        };
        let slot = self.availability.mark_booked(slot.id).await.map_err(slot_taken)?;

        updated.status = SessionStatus::Approved;
        updated.slot_id = Some(slot.id);
        let updated = match self.store.update_session_if(session.status, updated).await {
            Ok(updated) => updated,
            Err(e) => {
                self.release_slot(slot.id).await;
                return Err(e);
            }
        };

        info!("Request {} approved", session_id);
        self.notifier.notify_all(
            &updated.patient_side_recipients(),
            "Session approved",
            &format!("Your session on {} was approved", updated.scheduled_at.format("%Y-%m-%d %H:%M")),
            false,
        );
        Ok(updated)
    }

    // ==============================================================================
    // RESCHEDULING
    // ==============================================================================

    /// Therapist-initiated: the session gives up its slot and waits for the
    /// patient to pick a new one.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn reschedule_session(
        &self,
        user: &AuthUser,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TherapySession, SessionError> {
        let session = self.load(session_id).await?;
        Self::ensure_therapist_of(&session, user)?;
        ensure_transition(session.status, SessionStatus::Rescheduled, "reschedule")?;
        let hours = hours_until(now, session.scheduled_at);
        if hours <= Decimal::ZERO {
            return Err(BillingError::SessionAlreadyPassed { hours }.into());
        }

        let current_rate = self.rates.current_rate(session.therapist_id).await?;
        ensure_rate_unchanged(session.booked_rate, current_rate)?;

        let mut updated = session.clone();
        updated.status = SessionStatus::Rescheduled;
        updated.slot_id = None;
        updated.updated_at = now;
        let updated = self.store.update_session_if(session.status, updated).await?;

        if let Some(slot_id) = session.slot_id {
            self.release_slot(slot_id).await;
        }

        info!("Session {} rescheduled by therapist {}", session_id, user.id);
        self.notifier.notify_all(
            &updated.patient_side_recipients(),
            "Session rescheduled",
            &format!(
                "Your therapist needs to move the session on {}. Please choose a new slot.",
                session.scheduled_at.format("%Y-%m-%d %H:%M")
            ),
            true,
        );
        Ok(updated)
    }

    fn quote_fee(
        session: &TherapySession,
        paid: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Result<RescheduleFeeQuote, SessionError> {
        let amount = paid.unwrap_or_else(|| session.charge_amount());
        let hours = hours_until(now, session.scheduled_at);
        Ok(calculator::reschedule_fee(hours, amount)?)
    }

    pub async fn reschedule_fee(
        &self,
        user: &AuthUser,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RescheduleFeeQuote, SessionError> {
        let session = self.load(session_id).await?;
        Self::ensure_participant(&session, user)?;
        if !session.status.is_booked() {
            return Err(SessionError::InvalidTransition {
                status: session.status,
                action: "move".to_string(),
            });
        }

        let paid = self.paid_amount(&session).await?;
        Self::quote_fee(&session, paid, now)
    }

    /// Patient-initiated move to another slot. The only path that charges the
    /// reschedule fee.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn move_session(
        &self,
        user: &AuthUser,
        session_id: Uuid,
        choice: SlotChoice,
        now: DateTime<Utc>,
    ) -> Result<MoveOutcome, SessionError> {
        let session = self.load(session_id).await?;
        Self::ensure_patient_side_of(&session, user)?;
        if !session.status.is_booked() {
            return Err(SessionError::InvalidTransition {
                status: session.status,
                action: "move".to_string(),
            });
        }

        let current_rate = self.rates.current_rate(session.therapist_id).await?;
        ensure_rate_unchanged(session.booked_rate, current_rate)?;

        let paid = self.paid_amount(&session).await?;
        let fee = Self::quote_fee(&session, paid, now)?;

        let slot = self
            .claim_slot(session.therapist_id, choice.date, &choice.start_time, Some(session.id), now)
            .await?;

        let mut updated = session.clone();
        updated.scheduled_at = slot.starts_at();
        updated.duration_minutes = SLOT_SESSION_MINUTES;
        updated.slot_id = Some(slot.id);
        updated.reschedule_fee = Some(fee.fee);
        updated.updated_at = now;

        let updated = match self.store.update_session_if(session.status, updated).await {
            Ok(updated) => updated,
            Err(e) => {
                self.release_slot(slot.id).await;
                return Err(e);
            }
        };
        if let Some(old_slot) = session.slot_id {
            self.release_slot(old_slot).await;
        }

        let fee_payment = if fee.requires_payment {
            match self
                .payments
                .open_payment(
                    user.id,
                    Some(session.id),
                    fee.fee,
                    PaymentType::RescheduleFee,
                    format!("Reschedule fee for session {}", session.id),
                    now,
                )
                .await
            {
                Ok(receipt) => Some(receipt),
                Err(e) => {
                    warn!("Reschedule fee payment for session {} could not be opened: {}", session.id, e);
                    None
                }
            }
        } else {
            None
        };

        info!(
            "Session {} moved to {} with a {}% fee",
            session_id, updated.scheduled_at, fee.fee_percentage
        );
        self.notifier.notify(
            updated.therapist_id,
            "Session moved",
            &format!(
                "A session was moved from {} to {}",
                session.scheduled_at.format("%Y-%m-%d %H:%M"),
                updated.scheduled_at.format("%Y-%m-%d %H:%M")
            ),
            false,
        );

        Ok(MoveOutcome {
            session: updated,
            fee,
            fee_payment,
        })
    }

    /// Patient picks a slot for a session their therapist rescheduled.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn choose_new_slot(
        &self,
        user: &AuthUser,
        session_id: Uuid,
        choice: SlotChoice,
        now: DateTime<Utc>,
    ) -> Result<TherapySession, SessionError> {
        let session = self.load(session_id).await?;
        Self::ensure_patient_side_of(&session, user)?;
        ensure_transition(session.status, SessionStatus::Scheduled, "choose a new slot for")?;
        let month = MonthKey::containing(session.scheduled_at);
        if month.end() <= now {
            return Err(SessionError::Policy(format!(
                "Session {} belongs to the closed month {}; cancel it for a refund instead",
                session.id, month
            )));
        }

        let slot = self
            .claim_slot(session.therapist_id, choice.date, &choice.start_time, Some(session.id), now)
            .await?;

        let mut updated = session.clone();
        updated.status = SessionStatus::Scheduled;
        updated.scheduled_at = slot.starts_at();
        updated.duration_minutes = SLOT_SESSION_MINUTES;
        updated.slot_id = Some(slot.id);
        updated.updated_at = now;

        let updated = match self.store.update_session_if(session.status, updated).await {
            Ok(updated) => updated,
            Err(e) => {
                self.release_slot(slot.id).await;
                return Err(e);
            }
        };

        info!("Session {} rebooked for {}", session_id, updated.scheduled_at);
        self.notifier.notify(
            updated.therapist_id,
            "New slot chosen",
            &format!("The rescheduled session is now on {}", updated.scheduled_at.format("%Y-%m-%d %H:%M")),
            false,
        );
        Ok(updated)
    }

    // ==============================================================================
    // CANCELLATION
    // ==============================================================================

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn cancel_session(
        &self,
        user: &AuthUser,
        session_id: Uuid,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<CancellationOutcome, SessionError> {
        let session = self.load(session_id).await?;
        // Therapists move sessions through reschedule_session instead.
        Self::ensure_patient_side_of(&session, user)?;
        ensure_transition(session.status, SessionStatus::Cancelled, "cancel")?;

        let mut updated = session.clone();
        updated.status = SessionStatus::Cancelled;
        updated.updated_at = now;

        let refund = if session.status == SessionStatus::Requested {
            None
        } else {
            let hours = hours_until(now, session.scheduled_at);
            // Rescheduled sessions always refund at the early tier.
            let tier_hours = if session.status == SessionStatus::Rescheduled {
                hours.max(LATE_CHANGE_THRESHOLD_HOURS)
            } else {
                hours
            };
            let paid = self.paid_amount(&session).await?.unwrap_or(Decimal::ZERO);
            let outcome = calculator::cancellation_refund(tier_hours, paid)?;

            (paid > Decimal::ZERO)
                .then(|| CancelRefund::from_outcome(session.id, &outcome, hours, reason.clone(), now))
        };

        let updated = self
            .store
            .cancel_with_refund(session.status, updated, refund.clone())
            .await?;
        if let Some(slot_id) = session.slot_id {
            self.release_slot(slot_id).await;
        }

        let (refund_amount, refund_percentage) = refund
            .as_ref()
            .map(|r| (r.refund_amount, r.refund_percentage))
            .unwrap_or((Decimal::ZERO, Decimal::ZERO));

        info!(
            "Session {} cancelled by {}, refund {} ({}%)",
            session_id, user.id, refund_amount, refund_percentage
        );

        let mut recipients = updated.patient_side_recipients();
        recipients.push(updated.therapist_id);
        recipients.retain(|id| *id != user.id);
        self.notifier.notify_all(
            &recipients,
            "Session cancelled",
            &format!(
                "The session on {} was cancelled{}",
                updated.scheduled_at.format("%Y-%m-%d %H:%M"),
                reason.as_deref().map(|r| format!(": {}", r)).unwrap_or_default()
            ),
            true,
        );

        Ok(CancellationOutcome {
            session: updated,
            refund_amount,
            refund_percentage,
            refund,
        })
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn settle_refund(
        &self,
        user: &AuthUser,
        session_id: Uuid,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<CancelRefund, SessionError> {
        if !user.is_admin() {
            return Err(SessionError::Forbidden("Only admins can settle refunds".to_string()));
        }

        let status = if success {
            RefundStatus::Completed
        } else {
            RefundStatus::Failed
        };
        let refund = self.store.settle_refund(session_id, status, now).await?;
        info!("Refund {} for session {} settled as {}", refund.id, session_id, refund.refund_status);
        Ok(refund)
    }

    // ==============================================================================
    // PAYMENTS
    // ==============================================================================

    async fn confirm_if_possible(
        &self,
        session: TherapySession,
        now: DateTime<Utc>,
    ) -> Result<TherapySession, SessionError> {
        if !lifecycle::can_transition(session.status, SessionStatus::Confirmed) {
            debug!("Session {} stays {} after payment", session.id, session.status);
            return Ok(session);
        }

        let mut updated = session.clone();
        updated.status = SessionStatus::Confirmed;
        updated.updated_at = now;
        self.store.update_session_if(session.status, updated).await
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn initiate_session_payment(
        &self,
        user: &AuthUser,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SessionPaymentOutcome, SessionError> {
        let session = self.load(session_id).await?;
        Self::ensure_patient_side_of(&session, user)?;
        ensure_transition(session.status, SessionStatus::Confirmed, "pay for")?;

        if self.payments.has_open_session_payment(session.id).await? {
            return Err(SessionError::Policy(format!(
                "Session {} already has a pending or completed payment",
                session.id
            )));
        }

        let receipt = self
            .payments
            .open_payment(
                user.id,
                Some(session.id),
                session.charge_amount(),
                PaymentType::Session,
                format!("Therapy session on {}", session.scheduled_at.format("%Y-%m-%d %H:%M")),
                now,
            )
            .await?;

        let session = if receipt.payment.is_completed() {
            self.confirm_if_possible(session, now).await?
        } else {
            session
        };

        Ok(SessionPaymentOutcome { session, receipt })
    }

    /// Gateway callback. Settles the payment once and confirms the session it
    /// paid for.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn confirm_payment(
        &self,
        user: &AuthUser,
        order_id: Uuid,
        success: bool,
        payment_method: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(Payment, Option<TherapySession>), SessionError> {
        let payment = self.payments.get_payment(order_id).await?;
        if !user.is_admin() && payment.payer_id != user.id {
            return Err(SessionError::Forbidden(
                "Only the payer can confirm this payment".to_string(),
            ));
        }

        let payment = self
            .payments
            .confirm_payment(order_id, success, payment_method, now)
            .await?;

        let session = match (payment.payment_type, payment.session_id) {
            (PaymentType::Session, Some(session_id)) if payment.is_completed() => {
                let session = self.load(session_id).await?;
                Some(self.confirm_if_possible(session, now).await?)
            }
            _ => None,
        };

        Ok((payment, session))
    }

    // ==============================================================================
    // DOCUMENTATION
    // ==============================================================================

    pub async fn needs_documentation(
        &self,
        user: &AuthUser,
        now: DateTime<Utc>,
    ) -> Result<Vec<TherapySession>, SessionError> {
        if !user.is_therapist() {
            return Err(SessionError::Forbidden(
                "Only therapists document sessions".to_string(),
            ));
        }

        Ok(self
            .store
            .sessions_for_therapist(user.id, &BOOKED_STATES)
            .await?
            .into_iter()
            .filter(|s| lifecycle::needs_documentation(s, now))
            .collect())
    }

    async fn document(
        &self,
        user: &AuthUser,
        session_id: Uuid,
        outcome: SessionStatus,
        action: &str,
        now: DateTime<Utc>,
    ) -> Result<TherapySession, SessionError> {
        let session = self.load(session_id).await?;
        Self::ensure_therapist_of(&session, user)?;
        ensure_transition(session.status, outcome, action)?;

        if session.scheduled_at > now {
            return Err(SessionError::Policy(format!(
                "Session {} has not started yet",
                session_id
            )));
        }

        let mut updated = session.clone();
        updated.status = outcome;
        updated.updated_at = now;
        let updated = self.store.update_session_if(session.status, updated).await?;

        info!("Session {} documented as {}", session_id, outcome);
        Ok(updated)
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn complete_session(
        &self,
        user: &AuthUser,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TherapySession, SessionError> {
        self.document(user, session_id, SessionStatus::Completed, "complete", now)
            .await
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn mark_no_show(
        &self,
        user: &AuthUser,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TherapySession, SessionError> {
        self.document(user, session_id, SessionStatus::NoShow, "mark as no-show", now)
            .await
    }

    // ==============================================================================
    // QUERIES & RATES
    // ==============================================================================

    pub async fn get_session(&self, user: &AuthUser, session_id: Uuid) -> Result<TherapySession, SessionError> {
        let session = self.load(session_id).await?;
        Self::ensure_participant(&session, user)?;
        Ok(session)
    }

    pub async fn list_my_sessions(&self, user: &AuthUser) -> Result<Vec<TherapySession>, SessionError> {
        self.store.sessions_for_user(user.id).await
    }

    pub async fn set_rate(&self, user: &AuthUser, rate: Decimal) -> Result<Decimal, SessionError> {
        if !user.is_therapist() {
            return Err(SessionError::Forbidden(
                "Only therapists set session rates".to_string(),
            ));
        }

        let rate = self.rates.set_rate(user.id, rate).await?;
        info!("Therapist {} set session rate to {}", user.id, rate);
        Ok(rate)
    }
}
