use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;
use shared_utils::money::{ensure_non_negative, round_money};

use crate::models::SessionError;

/// Where a therapist's current per-session rate lives.
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn current_rate(&self, therapist_id: Uuid) -> Result<Decimal, SessionError>;

    async fn set_rate(&self, therapist_id: Uuid, rate: Decimal) -> Result<Decimal, SessionError>;
}

fn validated(rate: Decimal) -> Result<Decimal, SessionError> {
    ensure_non_negative(rate).map_err(|e| SessionError::Validation(e.to_string()))?;
    Ok(round_money(rate))
}

/// Therapists without a recorded rate charge nothing.
#[derive(Default)]
pub struct InMemoryRateProvider {
    rates: RwLock<HashMap<Uuid, Decimal>>,
}

impl InMemoryRateProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateProvider for InMemoryRateProvider {
    async fn current_rate(&self, therapist_id: Uuid) -> Result<Decimal, SessionError> {
        Ok(self
            .rates
            .read()
            .await
            .get(&therapist_id)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn set_rate(&self, therapist_id: Uuid, rate: Decimal) -> Result<Decimal, SessionError> {
        let rate = validated(rate)?;
        self.rates.write().await.insert(therapist_id, rate);
        Ok(rate)
    }
}

#[derive(Debug, Deserialize)]
struct RateRow {
    session_rate: Option<Decimal>,
}

/// Reads `session_rate` from the `therapists` table.
pub struct SupabaseRateProvider {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseRateProvider {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl RateProvider for SupabaseRateProvider {
    async fn current_rate(&self, therapist_id: Uuid) -> Result<Decimal, SessionError> {
        let path = format!("/rest/v1/therapists?id=eq.{}&select=session_rate", therapist_id);
        let rows: Vec<RateRow> = self.supabase.request(Method::GET, &path, None).await?;

        match rows.into_iter().next() {
            Some(row) => Ok(row.session_rate.unwrap_or(Decimal::ZERO)),
            None => Err(SessionError::NotFound(format!("therapist {}", therapist_id))),
        }
    }

    async fn set_rate(&self, therapist_id: Uuid, rate: Decimal) -> Result<Decimal, SessionError> {
        let rate = validated(rate)?;
        let path = format!("/rest/v1/therapists?id=eq.{}", therapist_id);
        let updated: Vec<RateRow> = self
            .supabase
            .mutate_returning(Method::PATCH, &path, json!({ "session_rate": rate }))
            .await?;

        if updated.is_empty() {
            return Err(SessionError::NotFound(format!("therapist {}", therapist_id)));
        }
        Ok(rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn unknown_therapists_default_to_zero() {
        let rates = InMemoryRateProvider::new();
        assert_eq!(rates.current_rate(Uuid::new_v4()).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn negative_rates_are_rejected() {
        let rates = InMemoryRateProvider::new();
        let therapist = Uuid::new_v4();
        assert!(matches!(
            rates.set_rate(therapist, dec!(-1)).await,
            Err(SessionError::Validation(_))
        ));
        assert_eq!(rates.set_rate(therapist, dec!(450)).await.unwrap().to_string(), "450.00");
    }
}
