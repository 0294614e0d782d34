use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_utils::time::{self, format_slot_time, parse_slot_time};

use crate::models::{
    weekday_from_index, AvailabilityError, AvailabilitySlot, AvailabilityTemplate,
    CreateTemplateRequest, ExpansionReport, SkippedSlot,
};
use crate::services::store::SlotStore;

/// Longest range a single template expansion may cover, inclusive.
pub const MAX_EXPANSION_DAYS: i64 = 90;

pub struct AvailabilityService {
    store: Arc<dyn SlotStore>,
}

impl AvailabilityService {
    pub fn new(store: Arc<dyn SlotStore>) -> Self {
        Self { store }
    }

    /// Adds a single ad-hoc slot for a therapist-day.
    #[instrument(skip(self))]
    pub async fn add_slot(
        &self,
        therapist_id: Uuid,
        date: NaiveDate,
        start_time: &str,
        is_free: bool,
    ) -> Result<AvailabilitySlot, AvailabilityError> {
        let start = parse_slot_time(start_time)?;
        // A slot running past midnight has no valid end.
        time::slot_end(start)?;

        let slot = self
            .store
            .insert_slot(AvailabilitySlot::new(therapist_id, date, start, is_free))
            .await?;

        info!("Therapist {} opened slot {} on {}", therapist_id, start_time, date);
        Ok(slot)
    }

    pub async fn list_slots(
        &self,
        therapist_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilitySlot>, AvailabilityError> {
        self.store.list_slots(therapist_id, date).await
    }

    pub async fn find_slot(
        &self,
        therapist_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
    ) -> Result<Option<AvailabilitySlot>, AvailabilityError> {
        self.store.find_slot(therapist_id, date, start_time).await
    }

    pub async fn get_slot(&self, slot_id: Uuid) -> Result<AvailabilitySlot, AvailabilityError> {
        self.store
            .get_slot(slot_id)
            .await?
            .ok_or_else(|| AvailabilityError::SlotNotFound(slot_id.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn mark_booked(&self, slot_id: Uuid) -> Result<AvailabilitySlot, AvailabilityError> {
        let slot = self.store.mark_booked(slot_id).await?;
        debug!("Slot {} booked", slot_id);
        Ok(slot)
    }

    #[instrument(skip(self))]
    pub async fn release(&self, slot_id: Uuid) -> Result<AvailabilitySlot, AvailabilityError> {
        let slot = self.store.release(slot_id).await?;
        debug!("Slot {} released", slot_id);
        Ok(slot)
    }

    #[instrument(skip(self))]
    pub async fn remove_slot(&self, therapist_id: Uuid, slot_id: Uuid) -> Result<(), AvailabilityError> {
        let slot = self.get_slot(slot_id).await?;
        if slot.therapist_id != therapist_id {
            return Err(AvailabilityError::Forbidden(
                "Slots can only be removed by their therapist".to_string(),
            ));
        }

        self.store.delete_slot(slot_id).await?;
        info!("Therapist {} removed slot {}", therapist_id, slot_id);
        Ok(())
    }

    #[instrument(skip(self, request))]
    pub async fn create_template(
        &self,
        therapist_id: Uuid,
        request: CreateTemplateRequest,
    ) -> Result<AvailabilityTemplate, AvailabilityError> {
        if weekday_from_index(request.day_of_week).is_none() {
            return Err(AvailabilityError::InvalidRange(
                "day_of_week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
            ));
        }

        let start_time = parse_slot_time(&request.start_time)?;
        let end_time = parse_slot_time(&request.end_time)?;
        time::ensure_ordered(start_time, end_time)?;

        let template = AvailabilityTemplate {
            id: Uuid::new_v4(),
            therapist_id,
            day_of_week: request.day_of_week,
            start_time,
            end_time,
            is_free: request.is_free.unwrap_or(false),
            created_at: Utc::now(),
        };

        if template.slot_starts().is_empty() {
            return Err(AvailabilityError::InvalidRange(format!(
                "{}-{} is shorter than one {}-minute slot",
                request.start_time,
                request.end_time,
                time::SLOT_DURATION_MINUTES
            )));
        }

        let existing = self.store.list_templates(therapist_id).await?;
        if let Some(clash) = existing.iter().find(|t| {
            t.day_of_week == template.day_of_week
                && t.start_time < template.end_time
                && template.start_time < t.end_time
        }) {
            return Err(AvailabilityError::TemplateOverlap {
                day_of_week: template.day_of_week,
                existing: format!(
                    "{}-{}",
                    format_slot_time(clash.start_time),
                    format_slot_time(clash.end_time)
                ),
            });
        }

        self.store.insert_template(template).await
    }

    pub async fn list_templates(
        &self,
        therapist_id: Uuid,
    ) -> Result<Vec<AvailabilityTemplate>, AvailabilityError> {
        self.store.list_templates(therapist_id).await
    }

    pub async fn delete_template(
        &self,
        therapist_id: Uuid,
        template_id: Uuid,
    ) -> Result<(), AvailabilityError> {
        self.store.delete_template(therapist_id, template_id).await
    }

    /// Materialises every template into concrete slots for `[from, to]`.
    /// Slots that already exist or would overlap one are reported as skipped,
    /// so re-running an expansion is harmless.
    #[instrument(skip(self))]
    pub async fn expand_templates(
        &self,
        therapist_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<ExpansionReport, AvailabilityError> {
        let span = time::days_between(from, to);
        if span < 0 {
            return Err(AvailabilityError::InvalidRange(format!(
                "{} is after {}",
                from, to
            )));
        }
        if span >= MAX_EXPANSION_DAYS {
            return Err(AvailabilityError::InvalidRange(format!(
                "expansion covers {} days, at most {} allowed",
                span + 1,
                MAX_EXPANSION_DAYS
            )));
        }

        let templates = self.store.list_templates(therapist_id).await?;
        let mut known = self.store.list_slots_between(therapist_id, from, to).await?;
        let mut report = ExpansionReport::default();

        for template in &templates {
            let Some(weekday) = template.weekday() else {
                warn!("Template {} has invalid day_of_week {}", template.id, template.day_of_week);
                continue;
            };

            for date in time::dates_on_weekday(from, to, weekday) {
                for start_time in template.slot_starts() {
                    if let Some(clash) = known.iter().find(|s| s.overlaps(date, start_time)) {
                        report.skipped.push(SkippedSlot {
                            date,
                            start_time,
                            reason: format!("overlaps existing slot {}", format_slot_time(clash.start_time)),
                        });
                        continue;
                    }

                    let candidate = AvailabilitySlot::new(therapist_id, date, start_time, template.is_free);
                    match self.store.insert_slot(candidate).await {
                        Ok(slot) => {
                            known.push(slot.clone());
                            report.created.push(slot);
                        }
                        Err(err @ AvailabilityError::Overlap { .. }) => {
                            report.skipped.push(SkippedSlot {
                                date,
                                start_time,
                                reason: err.to_string(),
                            });
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }

        report
            .created
            .sort_by(|a, b| (a.date, a.start_time).cmp(&(b.date, b.start_time)));

        info!(
            "Expanded {} templates for therapist {}: {} created, {} skipped",
            templates.len(),
            therapist_id,
            report.created.len(),
            report.skipped.len()
        );
        Ok(report)
    }
}
