use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use billing_cell::models::{BillingError, CancelRefund, RefundStatus};

use crate::models::{SessionError, SessionStatus, TherapySession};

/// Persistence seam for sessions and their cancellation refunds.
///
/// Status changes go through `update_session_if`, a compare-and-set on the
/// status the caller read: a concurrent writer turns the second attempt into
/// `SessionError::Conflict`. `cancel_with_refund` commits the status flip and
/// the refund record together.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: TherapySession) -> Result<TherapySession, SessionError>;

    async fn get_session(&self, session_id: Uuid) -> Result<Option<TherapySession>, SessionError>;

    async fn get_sessions(&self, session_ids: &[Uuid]) -> Result<Vec<TherapySession>, SessionError>;

    async fn update_session_if(
        &self,
        expected_status: SessionStatus,
        session: TherapySession,
    ) -> Result<TherapySession, SessionError>;

    /// Sessions of a therapist scheduled in `[from, to)`, any status.
    async fn sessions_for_therapist_between(
        &self,
        therapist_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TherapySession>, SessionError>;

    async fn sessions_for_therapist(
        &self,
        therapist_id: Uuid,
        statuses: &[SessionStatus],
    ) -> Result<Vec<TherapySession>, SessionError>;

    /// Sessions the user takes part in as patient, guardian or therapist.
    async fn sessions_for_user(&self, user_id: Uuid) -> Result<Vec<TherapySession>, SessionError>;

    async fn cancel_with_refund(
        &self,
        expected_status: SessionStatus,
        session: TherapySession,
        refund: Option<CancelRefund>,
    ) -> Result<TherapySession, SessionError>;

    async fn get_refund(&self, session_id: Uuid) -> Result<Option<CancelRefund>, SessionError>;

    /// Compare-and-set from PENDING to `status`.
    async fn settle_refund(
        &self,
        session_id: Uuid,
        status: RefundStatus,
        settled_at: DateTime<Utc>,
    ) -> Result<CancelRefund, SessionError>;

    async fn completed_refunds(&self) -> Result<Vec<CancelRefund>, SessionError>;
}

fn by_schedule(sessions: &mut [TherapySession]) {
    sessions.sort_by_key(|s| (s.scheduled_at, s.id));
}

#[derive(Default)]
struct Tables {
    sessions: HashMap<Uuid, TherapySession>,
    /// Keyed by session id; at most one refund per session.
    refunds: HashMap<Uuid, CancelRefund>,
}

impl Tables {
    fn check_status(&self, session_id: Uuid, expected: SessionStatus) -> Result<(), SessionError> {
        let current = self
            .sessions
            .get(&session_id)
            .ok_or_else(|| SessionError::session_not_found(session_id))?;

        if current.status != expected {
            debug!(
                "Session {} is {} but {} was expected",
                session_id, current.status, expected
            );
            return Err(SessionError::Conflict(session_id));
        }
        Ok(())
    }
}

/// Sessions and refunds behind a single lock, so a cancellation and its
/// refund land in one step.
#[derive(Default)]
pub struct InMemorySessionStore {
    tables: RwLock<Tables>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert_session(&self, session: TherapySession) -> Result<TherapySession, SessionError> {
        let mut tables = self.tables.write().await;
        if tables.sessions.contains_key(&session.id) {
            return Err(SessionError::Conflict(session.id));
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<TherapySession>, SessionError> {
        Ok(self.tables.read().await.sessions.get(&session_id).cloned())
    }

    async fn get_sessions(&self, session_ids: &[Uuid]) -> Result<Vec<TherapySession>, SessionError> {
        let tables = self.tables.read().await;
        Ok(session_ids
            .iter()
            .filter_map(|id| tables.sessions.get(id).cloned())
            .collect())
    }

    async fn update_session_if(
        &self,
        expected_status: SessionStatus,
        session: TherapySession,
    ) -> Result<TherapySession, SessionError> {
        let mut tables = self.tables.write().await;
        tables.check_status(session.id, expected_status)?;
        tables.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn sessions_for_therapist_between(
        &self,
        therapist_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TherapySession>, SessionError> {
        let mut sessions: Vec<TherapySession> = self
            .tables
            .read()
            .await
            .sessions
            .values()
            .filter(|s| s.therapist_id == therapist_id && s.scheduled_at >= from && s.scheduled_at < to)
            .cloned()
            .collect();
        by_schedule(&mut sessions);
        Ok(sessions)
    }

    async fn sessions_for_therapist(
        &self,
        therapist_id: Uuid,
        statuses: &[SessionStatus],
    ) -> Result<Vec<TherapySession>, SessionError> {
        let mut sessions: Vec<TherapySession> = self
            .tables
            .read()
            .await
            .sessions
            .values()
            .filter(|s| s.therapist_id == therapist_id && statuses.contains(&s.status))
            .cloned()
            .collect();
        by_schedule(&mut sessions);
        Ok(sessions)
    }

    async fn sessions_for_user(&self, user_id: Uuid) -> Result<Vec<TherapySession>, SessionError> {
        let mut sessions: Vec<TherapySession> = self
            .tables
            .read()
            .await
            .sessions
            .values()
            .filter(|s| s.therapist_id == user_id || s.is_patient_side(user_id))
            .cloned()
            .collect();
        by_schedule(&mut sessions);
        Ok(sessions)
    }

    async fn cancel_with_refund(
        &self,
        expected_status: SessionStatus,
        session: TherapySession,
        refund: Option<CancelRefund>,
    ) -> Result<TherapySession, SessionError> {
        let mut tables = self.tables.write().await;
        tables.check_status(session.id, expected_status)?;

        if let Some(refund) = refund {
            if tables.refunds.contains_key(&session.id) {
                return Err(SessionError::Conflict(session.id));
            }
            tables.refunds.insert(session.id, refund);
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_refund(&self, session_id: Uuid) -> Result<Option<CancelRefund>, SessionError> {
        Ok(self.tables.read().await.refunds.get(&session_id).cloned())
    }

    async fn settle_refund(
        &self,
        session_id: Uuid,
        status: RefundStatus,
        settled_at: DateTime<Utc>,
    ) -> Result<CancelRefund, SessionError> {
        let mut tables = self.tables.write().await;
        let refund = tables
            .refunds
            .get_mut(&session_id)
            .ok_or(BillingError::RefundNotFound(session_id))?;

        if refund.refund_status.is_settled() {
            return Err(BillingError::RefundAlreadySettled {
                refund_id: refund.id,
                status: refund.refund_status,
            }
            .into());
        }

        refund.refund_status = status;
        refund.settled_at = Some(settled_at);
        Ok(refund.clone())
    }

    async fn completed_refunds(&self) -> Result<Vec<CancelRefund>, SessionError> {
        Ok(self
            .tables
            .read()
            .await
            .refunds
            .values()
            .filter(|r| r.refund_status == RefundStatus::Completed)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SessionType, REQUESTED_SESSION_MINUTES};
    use assert_matches::assert_matches;
    use billing_cell::models::RefundOutcome;
    use rust_decimal_macros::dec;

    fn requested() -> TherapySession {
        let now = Utc::now();
        TherapySession {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            guardian_id: Some(Uuid::new_v4()),
            therapist_id: Uuid::new_v4(),
            scheduled_at: now,
            duration_minutes: REQUESTED_SESSION_MINUTES,
            session_type: SessionType::WithGuardian,
            status: SessionStatus::Requested,
            booked_rate: dec!(300),
            is_free: false,
            slot_id: None,
            meeting_link: None,
            notes: None,
            reschedule_fee: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn refund_for(session: &TherapySession) -> CancelRefund {
        let outcome = RefundOutcome {
            original_amount: dec!(300),
            refund_amount: dec!(270.00),
            refund_percentage: dec!(90),
            platform_commission: dec!(30.00),
            therapist_retained: dec!(0.00),
        };
        CancelRefund::from_outcome(session.id, &outcome, dec!(30), None, Utc::now())
    }

    #[tokio::test]
    async fn stale_status_loses_the_compare_and_set() {
        let store = InMemorySessionStore::new();
        let session = store.insert_session(requested()).await.unwrap();

        let mut approved = session.clone();
        approved.status = SessionStatus::Approved;
        store
            .update_session_if(SessionStatus::Requested, approved.clone())
            .await
            .unwrap();

        let mut cancelled = session.clone();
        cancelled.status = SessionStatus::Cancelled;
        assert_matches!(
            store.update_session_if(SessionStatus::Requested, cancelled).await,
            Err(SessionError::Conflict(id)) if id == session.id
        );
    }

    #[tokio::test]
    async fn cancellation_and_refund_commit_together() {
        let store = InMemorySessionStore::new();
        let mut session = requested();
        session.status = SessionStatus::Scheduled;
        let session = store.insert_session(session).await.unwrap();

        let mut cancelled = session.clone();
        cancelled.status = SessionStatus::Cancelled;
        store
            .cancel_with_refund(SessionStatus::Scheduled, cancelled.clone(), Some(refund_for(&session)))
            .await
            .unwrap();

        // A second attempt from the stale status writes nothing.
        assert_matches!(
            store
                .cancel_with_refund(SessionStatus::Scheduled, cancelled, Some(refund_for(&session)))
                .await,
            Err(SessionError::Conflict(_))
        );
        assert!(store.get_refund(session.id).await.unwrap().is_some());
        assert!(store.completed_refunds().await.unwrap().is_empty());

        store
            .settle_refund(session.id, RefundStatus::Completed, Utc::now())
            .await
            .unwrap();
        assert_eq!(store.completed_refunds().await.unwrap().len(), 1);
        assert_matches!(
            store.settle_refund(session.id, RefundStatus::Failed, Utc::now()).await,
            Err(SessionError::Billing(BillingError::RefundAlreadySettled { .. }))
        );
    }

    #[tokio::test]
    async fn guardians_see_the_sessions_they_are_linked_to() {
        let store = InMemorySessionStore::new();
        let session = store.insert_session(requested()).await.unwrap();
        let guardian = session.guardian_id.unwrap();

        let listed = store.sessions_for_user(guardian).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(store.sessions_for_user(Uuid::new_v4()).await.unwrap().is_empty());
    }
}
