#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use availability_cell::services::{AvailabilityService, InMemorySlotStore};
use billing_cell::services::{InMemoryPaymentLedger, OfflineGateway, PaymentService};
use session_cell::models::{BookSlotRequest, SessionError, TherapySession};
use session_cell::services::{
    InMemoryRateProvider, InMemorySessionStore, Notification, NotificationSink, Notifier,
    RateProvider, SessionService,
};
use shared_models::auth::AuthUser;

/// Keeps every notification so tests can inspect who was told what.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    /// Notifications are delivered on spawned tasks; poll until `count`
    /// have arrived or give up after a second.
    pub async fn wait_for(&self, count: usize) -> Vec<Notification> {
        for _ in 0..100 {
            let sent = self.sent.lock().await;
            if sent.len() >= count {
                return sent.clone();
            }
            drop(sent);
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, notification: Notification) -> anyhow::Result<()> {
        self.sent.lock().await.push(notification);
        Ok(())
    }
}

pub struct Harness {
    pub service: Arc<SessionService>,
    pub availability: Arc<AvailabilityService>,
    pub payments: Arc<PaymentService>,
    pub ledger: Arc<InMemoryPaymentLedger>,
    pub rates: Arc<InMemoryRateProvider>,
    pub store: Arc<InMemorySessionStore>,
    pub sink: Arc<RecordingSink>,
}

impl Harness {
    pub fn new() -> Self {
        let sink = Arc::new(RecordingSink::default());
        Self::build(sink.clone(), sink)
    }

    pub fn with_sink(sink: Arc<dyn NotificationSink>) -> Self {
        Self::build(sink, Arc::new(RecordingSink::default()))
    }

    fn build(notifications: Arc<dyn NotificationSink>, sink: Arc<RecordingSink>) -> Self {
        let availability = Arc::new(AvailabilityService::new(Arc::new(InMemorySlotStore::new())));
        let ledger = Arc::new(InMemoryPaymentLedger::new());
        let payments = Arc::new(PaymentService::new(ledger.clone(), Arc::new(OfflineGateway), "EGP"));
        let rates = Arc::new(InMemoryRateProvider::new());
        let store = Arc::new(InMemorySessionStore::new());

        let service = Arc::new(SessionService::new(
            availability.clone(),
            store.clone(),
            payments.clone(),
            rates.clone(),
            Notifier::new(notifications),
        ));

        Self {
            service,
            availability,
            payments,
            ledger,
            rates,
            store,
            sink,
        }
    }

    pub async fn therapist_with_rate(&self, therapist: &AuthUser, rate: Decimal) {
        self.rates.set_rate(therapist.id, rate).await.unwrap();
    }

    pub async fn open_slot(&self, therapist_id: Uuid, date: NaiveDate, start: &str) {
        self.availability
            .add_slot(therapist_id, date, start, false)
            .await
            .unwrap();
    }

    pub async fn book(
        &self,
        patient: &AuthUser,
        therapist_id: Uuid,
        date: NaiveDate,
        start: &str,
        now: DateTime<Utc>,
    ) -> Result<TherapySession, SessionError> {
        self.service
            .book_slot(
                patient,
                BookSlotRequest {
                    therapist_id,
                    date,
                    start_time: start.to_string(),
                    session_type: None,
                    notes: None,
                    patient_id: None,
                },
                now,
            )
            .await
    }

    /// Opens the session charge and settles it successfully.
    pub async fn pay(&self, payer: &AuthUser, session_id: Uuid, now: DateTime<Utc>) -> TherapySession {
        let outcome = self
            .service
            .initiate_session_payment(payer, session_id, now)
            .await
            .unwrap();
        let (_, session) = self
            .service
            .confirm_payment(payer, outcome.receipt.payment.order_id, true, Some("card".to_string()), now)
            .await
            .unwrap();
        session.unwrap()
    }
}

pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 9, 10).unwrap()
}

pub fn next_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 9, 11).unwrap()
}

/// An instant in September 2025.
pub fn sept(d: u32, h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, d, h, m, 0).unwrap()
}
