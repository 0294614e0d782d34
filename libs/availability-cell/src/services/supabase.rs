use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Method,
};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::{is_conflict, SupabaseClient};
use shared_utils::time::format_slot_time;

use crate::models::{AvailabilityError, AvailabilitySlot, AvailabilityTemplate};
use crate::services::store::SlotStore;

const SLOTS: &str = "/rest/v1/availability_slots";
const TEMPLATES: &str = "/rest/v1/availability_templates";

/// PostgREST-backed slot store. The table carries a unique index on
/// `(therapist_id, date, start_time)`; booking is a PATCH filtered on
/// `is_booked=eq.false`, so the database decides the single winner.
pub struct SupabaseSlotStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseSlotStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn returning() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        headers
    }

    async fn fetch_slots(&self, query: String) -> Result<Vec<AvailabilitySlot>, AvailabilityError> {
        let path = format!("{}?{}", SLOTS, query);
        let slots: Vec<AvailabilitySlot> = self.supabase.request(Method::GET, &path, None).await?;
        Ok(slots)
    }
}

#[async_trait]
impl SlotStore for SupabaseSlotStore {
    async fn insert_slot(&self, slot: AvailabilitySlot) -> Result<AvailabilitySlot, AvailabilityError> {
        let existing = self.list_slots(slot.therapist_id, slot.date).await?;
        if let Some(clash) = existing.iter().find(|s| s.overlaps(slot.date, slot.start_time)) {
            return Err(AvailabilityError::overlap(clash, slot.date, slot.start_time));
        }

        let row = serde_json::to_value(&slot).map_err(|e| AvailabilityError::Database(e.to_string()))?;
        match self.supabase.insert::<AvailabilitySlot>("availability_slots", row).await {
            Ok(stored) => {
                debug!("Stored slot {} for therapist {}", stored.id, stored.therapist_id);
                Ok(stored)
            }
            Err(e) if is_conflict(&e) => {
                warn!("Unique index rejected slot {} on {}", format_slot_time(slot.start_time), slot.date);
                Err(AvailabilityError::overlap(&slot, slot.date, slot.start_time))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<AvailabilitySlot>, AvailabilityError> {
        let mut slots = self.fetch_slots(format!("id=eq.{}", slot_id)).await?;
        Ok(slots.pop())
    }

    async fn find_slot(
        &self,
        therapist_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
    ) -> Result<Option<AvailabilitySlot>, AvailabilityError> {
        let mut slots = self
            .fetch_slots(format!(
                "therapist_id=eq.{}&date=eq.{}&start_time=eq.{}",
                therapist_id,
                date,
                format_slot_time(start_time)
            ))
            .await?;
        Ok(slots.pop())
    }

    async fn list_slots(
        &self,
        therapist_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilitySlot>, AvailabilityError> {
        self.fetch_slots(format!(
            "therapist_id=eq.{}&date=eq.{}&order=start_time.asc",
            therapist_id, date
        ))
        .await
    }

    async fn list_slots_between(
        &self,
        therapist_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AvailabilitySlot>, AvailabilityError> {
        self.fetch_slots(format!(
            "therapist_id=eq.{}&date=gte.{}&date=lte.{}&order=date.asc,start_time.asc",
            therapist_id, from, to
        ))
        .await
    }

    async fn mark_booked(&self, slot_id: Uuid) -> Result<AvailabilitySlot, AvailabilityError> {
        let path = format!("{}?id=eq.{}&is_booked=eq.false", SLOTS, slot_id);
        let mut updated: Vec<AvailabilitySlot> = self
            .supabase
            .mutate_returning(Method::PATCH, &path, json!({ "is_booked": true }))
            .await?;

        match updated.pop() {
            Some(slot) => Ok(slot),
            None => match self.get_slot(slot_id).await? {
                Some(_) => Err(AvailabilityError::AlreadyBooked(slot_id)),
                None => Err(AvailabilityError::SlotNotFound(slot_id.to_string())),
            },
        }
    }

    async fn release(&self, slot_id: Uuid) -> Result<AvailabilitySlot, AvailabilityError> {
        let path = format!("{}?id=eq.{}", SLOTS, slot_id);
        let mut updated: Vec<AvailabilitySlot> = self
            .supabase
            .mutate_returning(Method::PATCH, &path, json!({ "is_booked": false }))
            .await?;

        updated
            .pop()
            .ok_or_else(|| AvailabilityError::SlotNotFound(slot_id.to_string()))
    }

    async fn delete_slot(&self, slot_id: Uuid) -> Result<(), AvailabilityError> {
        let path = format!("{}?id=eq.{}&is_booked=eq.false", SLOTS, slot_id);
        let deleted: Vec<AvailabilitySlot> = self
            .supabase
            .request_with_headers(Method::DELETE, &path, None, Some(Self::returning()))
            .await?;

        if !deleted.is_empty() {
            return Ok(());
        }

        match self.get_slot(slot_id).await? {
            Some(_) => Err(AvailabilityError::SlotBooked(slot_id)),
            None => Err(AvailabilityError::SlotNotFound(slot_id.to_string())),
        }
    }

    async fn insert_template(
        &self,
        template: AvailabilityTemplate,
    ) -> Result<AvailabilityTemplate, AvailabilityError> {
        let row = serde_json::to_value(&template).map_err(|e| AvailabilityError::Database(e.to_string()))?;
        Ok(self.supabase.insert("availability_templates", row).await?)
    }

    async fn list_templates(
        &self,
        therapist_id: Uuid,
    ) -> Result<Vec<AvailabilityTemplate>, AvailabilityError> {
        let path = format!(
            "{}?therapist_id=eq.{}&order=day_of_week.asc,start_time.asc",
            TEMPLATES, therapist_id
        );
        Ok(self.supabase.request(Method::GET, &path, None).await?)
    }

    async fn delete_template(
        &self,
        therapist_id: Uuid,
        template_id: Uuid,
    ) -> Result<(), AvailabilityError> {
        let path = format!("{}?id=eq.{}&therapist_id=eq.{}", TEMPLATES, template_id, therapist_id);
        let deleted: Vec<AvailabilityTemplate> = self
            .supabase
            .request_with_headers(Method::DELETE, &path, None, Some(Self::returning()))
            .await?;

        if deleted.is_empty() {
            return Err(AvailabilityError::TemplateNotFound(template_id));
        }
        Ok(())
    }
}
