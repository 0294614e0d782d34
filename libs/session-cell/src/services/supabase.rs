use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use billing_cell::models::{BillingError, CancelRefund, RefundStatus};
use shared_database::supabase::{is_conflict, SupabaseClient};

use crate::models::{SessionError, SessionStatus, TherapySession};
use crate::services::store::SessionStore;

const SESSIONS: &str = "/rest/v1/therapy_sessions";
const REFUNDS: &str = "/rest/v1/cancel_refunds";

/// Postgres function that flips the session status and inserts the refund
/// row in one transaction. Returns the updated session, or no rows when the
/// status filter did not match.
const CANCEL_RPC: &str = "cancel_session_with_refund";

/// Query-string friendly timestamp; an offset `+00:00` would need escaping.
fn query_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn status_list(statuses: &[SessionStatus]) -> String {
    statuses
        .iter()
        .map(SessionStatus::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

pub struct SupabaseSessionStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseSessionStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn fetch_sessions(&self, query: String) -> Result<Vec<TherapySession>, SessionError> {
        let path = format!("{}?{}", SESSIONS, query);
        Ok(self.supabase.request(Method::GET, &path, None).await?)
    }

    /// Tells a lost compare-and-set apart from a missing row.
    async fn conflict_or_missing(&self, session_id: Uuid) -> SessionError {
        match self.get_session(session_id).await {
            Ok(Some(_)) => SessionError::Conflict(session_id),
            Ok(None) => SessionError::session_not_found(session_id),
            Err(err) => err,
        }
    }
}

#[async_trait]
impl SessionStore for SupabaseSessionStore {
    async fn insert_session(&self, session: TherapySession) -> Result<TherapySession, SessionError> {
        let row = serde_json::to_value(&session).map_err(|e| SessionError::Database(e.to_string()))?;
        match self.supabase.insert::<TherapySession>("therapy_sessions", row).await {
            Ok(stored) => {
                debug!("Stored session {} ({})", stored.id, stored.status);
                Ok(stored)
            }
            Err(e) if is_conflict(&e) => Err(SessionError::Conflict(session.id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<TherapySession>, SessionError> {
        let mut rows = self.fetch_sessions(format!("id=eq.{}", session_id)).await?;
        Ok(rows.pop())
    }

    async fn get_sessions(&self, session_ids: &[Uuid]) -> Result<Vec<TherapySession>, SessionError> {
        if session_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = session_ids
            .iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.fetch_sessions(format!("id=in.({})", ids)).await
    }

    async fn update_session_if(
        &self,
        expected_status: SessionStatus,
        session: TherapySession,
    ) -> Result<TherapySession, SessionError> {
        let path = format!("{}?id=eq.{}&status=eq.{}", SESSIONS, session.id, expected_status);
        let body = serde_json::to_value(&session).map_err(|e| SessionError::Database(e.to_string()))?;

        let mut updated: Vec<TherapySession> = self
            .supabase
            .mutate_returning(Method::PATCH, &path, body)
            .await?;

        match updated.pop() {
            Some(stored) => Ok(stored),
            None => Err(self.conflict_or_missing(session.id).await),
        }
    }

    async fn sessions_for_therapist_between(
        &self,
        therapist_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TherapySession>, SessionError> {
        self.fetch_sessions(format!(
            "therapist_id=eq.{}&scheduled_at=gte.{}&scheduled_at=lt.{}&order=scheduled_at.asc",
            therapist_id,
            query_timestamp(from),
            query_timestamp(to)
        ))
        .await
    }

    async fn sessions_for_therapist(
        &self,
        therapist_id: Uuid,
        statuses: &[SessionStatus],
    ) -> Result<Vec<TherapySession>, SessionError> {
        self.fetch_sessions(format!(
            "therapist_id=eq.{}&status=in.({})&order=scheduled_at.asc",
            therapist_id,
            status_list(statuses)
        ))
        .await
    }

    async fn sessions_for_user(&self, user_id: Uuid) -> Result<Vec<TherapySession>, SessionError> {
        self.fetch_sessions(format!(
            "or=(patient_id.eq.{id},guardian_id.eq.{id},therapist_id.eq.{id})&order=scheduled_at.asc",
            id = user_id
        ))
        .await
    }

    async fn cancel_with_refund(
        &self,
        expected_status: SessionStatus,
        session: TherapySession,
        refund: Option<CancelRefund>,
    ) -> Result<TherapySession, SessionError> {
        let args = json!({
            "p_session_id": session.id,
            "p_expected_status": expected_status,
            "p_session": session,
            "p_refund": refund,
        });

        let mut updated: Vec<TherapySession> = match self.supabase.rpc(CANCEL_RPC, args).await {
            Ok(rows) => rows,
            Err(e) if is_conflict(&e) => return Err(SessionError::Conflict(session.id)),
            Err(e) => return Err(e.into()),
        };

        match updated.pop() {
            Some(stored) => {
                info!("Session {} cancelled from {}", stored.id, expected_status);
                Ok(stored)
            }
            None => Err(self.conflict_or_missing(session.id).await),
        }
    }

    async fn get_refund(&self, session_id: Uuid) -> Result<Option<CancelRefund>, SessionError> {
        let path = format!("{}?session_id=eq.{}", REFUNDS, session_id);
        let mut rows: Vec<CancelRefund> = self.supabase.request(Method::GET, &path, None).await?;
        Ok(rows.pop())
    }

    async fn settle_refund(
        &self,
        session_id: Uuid,
        status: RefundStatus,
        settled_at: DateTime<Utc>,
    ) -> Result<CancelRefund, SessionError> {
        let path = format!("{}?session_id=eq.{}&refund_status=eq.PENDING", REFUNDS, session_id);
        let mut updated: Vec<CancelRefund> = self
            .supabase
            .mutate_returning(
                Method::PATCH,
                &path,
                json!({ "refund_status": status, "settled_at": settled_at }),
            )
            .await?;

        if let Some(refund) = updated.pop() {
            return Ok(refund);
        }

        match self.get_refund(session_id).await? {
            Some(existing) => Err(BillingError::RefundAlreadySettled {
                refund_id: existing.id,
                status: existing.refund_status,
            }
            .into()),
            None => Err(BillingError::RefundNotFound(session_id).into()),
        }
    }

    async fn completed_refunds(&self) -> Result<Vec<CancelRefund>, SessionError> {
        let path = format!("{}?refund_status=eq.COMPLETED", REFUNDS);
        Ok(self.supabase.request(Method::GET, &path, None).await?)
    }
}
