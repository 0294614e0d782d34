use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_models::error::{AppError, ErrorKind};
use shared_utils::time::{self, TimeError, SLOT_DURATION_MINUTES};

/// Slot and template times travel as `HH:MM`; Postgres hands back `HH:MM:SS`.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    use shared_utils::time::{format_slot_time, parse_slot_time};

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_slot_time(*time))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_slot_time(&raw)
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(|_| de::Error::custom(format!("invalid time '{}'", raw)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilitySlot {
    pub id: Uuid,
    pub therapist_id: Uuid,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    pub is_booked: bool,
    pub is_free: bool,
    pub created_at: DateTime<Utc>,
}

impl AvailabilitySlot {
    pub fn new(therapist_id: Uuid, date: NaiveDate, start_time: NaiveTime, is_free: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            therapist_id,
            date,
            start_time,
            is_booked: false,
            is_free,
            created_at: Utc::now(),
        }
    }

    pub fn end_time(&self) -> NaiveTime {
        self.start_time + Duration::minutes(SLOT_DURATION_MINUTES)
    }

    pub fn starts_at(&self) -> DateTime<Utc> {
        time::slot_instant(self.date, self.start_time)
    }

    /// Two slots of the same therapist and date collide when their 45-minute
    /// windows share any instant.
    pub fn overlaps(&self, date: NaiveDate, start_time: NaiveTime) -> bool {
        self.date == date
            && (self.start_time - start_time).num_minutes().abs() < SLOT_DURATION_MINUTES
    }
}

/// Recurring weekly availability. `day_of_week` counts from Sunday = 0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityTemplate {
    pub id: Uuid,
    pub therapist_id: Uuid,
    pub day_of_week: u8,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub is_free: bool,
    pub created_at: DateTime<Utc>,
}

impl AvailabilityTemplate {
    pub fn weekday(&self) -> Option<Weekday> {
        weekday_from_index(self.day_of_week)
    }

    /// Start times of every whole slot that fits between start and end.
    pub fn slot_starts(&self) -> Vec<NaiveTime> {
        let step = Duration::minutes(SLOT_DURATION_MINUTES);
        let mut starts = Vec::new();
        let mut current = self.start_time;

        while let Ok(end) = time::slot_end(current) {
            if end > self.end_time {
                break;
            }
            starts.push(current);
            current += step;
        }

        starts
    }
}

pub fn weekday_from_index(day_of_week: u8) -> Option<Weekday> {
    match day_of_week {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSlotRequest {
    pub date: NaiveDate,
    pub start_time: String,
    pub is_free: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTemplateRequest {
    pub day_of_week: u8,
    pub start_time: String,
    pub end_time: String,
    pub is_free: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpandTemplatesRequest {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedSlot {
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExpansionReport {
    pub created: Vec<AvailabilitySlot>,
    pub skipped: Vec<SkippedSlot>,
}

#[derive(Error, Debug)]
pub enum AvailabilityError {
    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    #[error("Slot {start_time} on {date} overlaps existing slot {existing}")]
    Overlap {
        date: NaiveDate,
        start_time: String,
        existing: String,
    },

    #[error("Template for day {day_of_week} overlaps existing template {existing}")]
    TemplateOverlap { day_of_week: u8, existing: String },

    #[error("Slot {0} is already booked")]
    AlreadyBooked(Uuid),

    #[error("Slot {0} is booked and cannot be removed")]
    SlotBooked(Uuid),

    #[error("Slot not found: {0}")]
    SlotNotFound(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(Uuid),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl AvailabilityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AvailabilityError::InvalidTime(_) | AvailabilityError::InvalidRange(_) => {
                ErrorKind::Validation
            }
            AvailabilityError::Overlap { .. }
            | AvailabilityError::TemplateOverlap { .. }
            | AvailabilityError::AlreadyBooked(_)
            | AvailabilityError::SlotBooked(_) => ErrorKind::Conflict,
            AvailabilityError::SlotNotFound(_) | AvailabilityError::TemplateNotFound(_) => {
                ErrorKind::NotFound
            }
            AvailabilityError::Forbidden(_) => ErrorKind::Forbidden,
            AvailabilityError::Database(_) => ErrorKind::Internal,
        }
    }

    pub fn overlap(existing: &AvailabilitySlot, date: NaiveDate, start_time: NaiveTime) -> Self {
        AvailabilityError::Overlap {
            date,
            start_time: time::format_slot_time(start_time),
            existing: time::format_slot_time(existing.start_time),
        }
    }
}

impl From<TimeError> for AvailabilityError {
    fn from(err: TimeError) -> Self {
        AvailabilityError::InvalidTime(err.to_string())
    }
}

impl From<anyhow::Error> for AvailabilityError {
    fn from(err: anyhow::Error) -> Self {
        AvailabilityError::Database(err.to_string())
    }
}

impl From<AvailabilityError> for AppError {
    fn from(err: AvailabilityError) -> Self {
        AppError::from_kind(err.kind(), err.to_string())
    }
}
