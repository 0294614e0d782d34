use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::models::{AvailabilityError, AvailabilitySlot, AvailabilityTemplate};

/// Persistence seam for slots and templates.
///
/// `insert_slot` rejects a slot overlapping another of the same therapist and
/// date, and `mark_booked` is a compare-and-set on `is_booked`: of any number
/// of concurrent calls for one slot, exactly one succeeds.
#[async_trait]
pub trait SlotStore: Send + Sync {
    async fn insert_slot(&self, slot: AvailabilitySlot) -> Result<AvailabilitySlot, AvailabilityError>;

    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<AvailabilitySlot>, AvailabilityError>;

    async fn find_slot(
        &self,
        therapist_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
    ) -> Result<Option<AvailabilitySlot>, AvailabilityError>;

    /// Slots of one therapist-day ordered by start time.
    async fn list_slots(
        &self,
        therapist_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilitySlot>, AvailabilityError>;

    /// Slots in the inclusive date range ordered by date then start time.
    async fn list_slots_between(
        &self,
        therapist_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AvailabilitySlot>, AvailabilityError>;

    async fn mark_booked(&self, slot_id: Uuid) -> Result<AvailabilitySlot, AvailabilityError>;

    async fn release(&self, slot_id: Uuid) -> Result<AvailabilitySlot, AvailabilityError>;

    /// Deletes an unbooked slot.
    async fn delete_slot(&self, slot_id: Uuid) -> Result<(), AvailabilityError>;

    async fn insert_template(
        &self,
        template: AvailabilityTemplate,
    ) -> Result<AvailabilityTemplate, AvailabilityError>;

    async fn list_templates(
        &self,
        therapist_id: Uuid,
    ) -> Result<Vec<AvailabilityTemplate>, AvailabilityError>;

    async fn delete_template(
        &self,
        therapist_id: Uuid,
        template_id: Uuid,
    ) -> Result<(), AvailabilityError>;
}

fn sort_slots(slots: &mut [AvailabilitySlot]) {
    slots.sort_by(|a, b| (a.date, a.start_time).cmp(&(b.date, b.start_time)));
}

#[derive(Default)]
pub struct InMemorySlotStore {
    slots: RwLock<HashMap<Uuid, AvailabilitySlot>>,
    templates: RwLock<HashMap<Uuid, AvailabilityTemplate>>,
}

impl InMemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SlotStore for InMemorySlotStore {
    async fn insert_slot(&self, slot: AvailabilitySlot) -> Result<AvailabilitySlot, AvailabilityError> {
        let mut slots = self.slots.write().await;

        if let Some(existing) = slots
            .values()
            .find(|s| s.therapist_id == slot.therapist_id && s.overlaps(slot.date, slot.start_time))
        {
            return Err(AvailabilityError::overlap(existing, slot.date, slot.start_time));
        }

        slots.insert(slot.id, slot.clone());
        debug!("Stored slot {} for therapist {}", slot.id, slot.therapist_id);
        Ok(slot)
    }

    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<AvailabilitySlot>, AvailabilityError> {
        Ok(self.slots.read().await.get(&slot_id).cloned())
    }

    async fn find_slot(
        &self,
        therapist_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
    ) -> Result<Option<AvailabilitySlot>, AvailabilityError> {
        Ok(self
            .slots
            .read()
            .await
            .values()
            .find(|s| s.therapist_id == therapist_id && s.date == date && s.start_time == start_time)
            .cloned())
    }

    async fn list_slots(
        &self,
        therapist_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilitySlot>, AvailabilityError> {
        self.list_slots_between(therapist_id, date, date).await
    }

    async fn list_slots_between(
        &self,
        therapist_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AvailabilitySlot>, AvailabilityError> {
        let mut slots: Vec<AvailabilitySlot> = self
            .slots
            .read()
            .await
            .values()
            .filter(|s| s.therapist_id == therapist_id && s.date >= from && s.date <= to)
            .cloned()
            .collect();
        sort_slots(&mut slots);
        Ok(slots)
    }

    async fn mark_booked(&self, slot_id: Uuid) -> Result<AvailabilitySlot, AvailabilityError> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(&slot_id)
            .ok_or_else(|| AvailabilityError::SlotNotFound(slot_id.to_string()))?;

        if slot.is_booked {
            return Err(AvailabilityError::AlreadyBooked(slot_id));
        }

        slot.is_booked = true;
        Ok(slot.clone())
    }

    async fn release(&self, slot_id: Uuid) -> Result<AvailabilitySlot, AvailabilityError> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(&slot_id)
            .ok_or_else(|| AvailabilityError::SlotNotFound(slot_id.to_string()))?;

        slot.is_booked = false;
        Ok(slot.clone())
    }

    async fn delete_slot(&self, slot_id: Uuid) -> Result<(), AvailabilityError> {
        let mut slots = self.slots.write().await;
        match slots.get(&slot_id) {
            None => Err(AvailabilityError::SlotNotFound(slot_id.to_string())),
            Some(slot) if slot.is_booked => Err(AvailabilityError::SlotBooked(slot_id)),
            Some(_) => {
                slots.remove(&slot_id);
                Ok(())
            }
        }
    }

    async fn insert_template(
        &self,
        template: AvailabilityTemplate,
    ) -> Result<AvailabilityTemplate, AvailabilityError> {
        self.templates
            .write()
            .await
            .insert(template.id, template.clone());
        Ok(template)
    }

    async fn list_templates(
        &self,
        therapist_id: Uuid,
    ) -> Result<Vec<AvailabilityTemplate>, AvailabilityError> {
        let mut templates: Vec<AvailabilityTemplate> = self
            .templates
            .read()
            .await
            .values()
            .filter(|t| t.therapist_id == therapist_id)
            .cloned()
            .collect();
        templates.sort_by_key(|t| (t.day_of_week, t.start_time));
        Ok(templates)
    }

    async fn delete_template(
        &self,
        therapist_id: Uuid,
        template_id: Uuid,
    ) -> Result<(), AvailabilityError> {
        let mut templates = self.templates.write().await;
        match templates.get(&template_id) {
            Some(t) if t.therapist_id == therapist_id => {
                templates.remove(&template_id);
                Ok(())
            }
            _ => Err(AvailabilityError::TemplateNotFound(template_id)),
        }
    }
}
