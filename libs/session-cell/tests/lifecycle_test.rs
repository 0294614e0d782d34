mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use billing_cell::models::{BillingError, PaymentStatus, PaymentType, RefundStatus};
use billing_cell::services::RevenueService;
use session_cell::models::{BookSlotRequest, SessionError, SessionStatus, SlotChoice, TherapySession};
use session_cell::services::{SessionRevenueSource, SessionStore};
use shared_models::auth::{AuthUser, Role};
use shared_utils::test_utils::TestUser;

use common::{day, next_day, sept, Harness};

/// A confirmed, fully paid 10:00 session on the test day.
async fn paid_session(harness: &Harness, rate: Decimal) -> (AuthUser, TherapySession) {
    let therapist = TestUser::therapist().to_user();
    harness.therapist_with_rate(&therapist, rate).await;
    harness.open_slot(therapist.id, day(), "10:00").await;

    let patient = TestUser::patient().to_user();
    let booked = harness
        .book(&patient, therapist.id, day(), "10:00", sept(8, 9, 0))
        .await
        .unwrap();
    let confirmed = harness.pay(&patient, booked.id, sept(8, 9, 5)).await;
    assert_eq!(confirmed.status, SessionStatus::Confirmed);
    (patient, confirmed)
}

#[tokio::test]
async fn cancelling_25_hours_ahead_refunds_ninety_percent() {
    let harness = Harness::new();
    let (patient, session) = paid_session(&harness, dec!(1000)).await;

    let outcome = harness
        .service
        .cancel_session(&patient, session.id, Some("travel".to_string()), sept(9, 9, 0))
        .await
        .unwrap();

    assert_eq!(outcome.session.status, SessionStatus::Cancelled);
    assert_eq!(outcome.refund_amount, dec!(900));
    assert_eq!(outcome.refund_percentage, dec!(90));

    let refund = outcome.refund.unwrap();
    assert_eq!(refund.platform_commission, dec!(100));
    assert_eq!(refund.therapist_retained, dec!(0));
    assert_eq!(refund.hours_before_session, dec!(25));
    assert_eq!(refund.refund_status, RefundStatus::Pending);
    assert_eq!(refund.cancel_reason.as_deref(), Some("travel"));

    let slot = harness.availability.get_slot(session.slot_id.unwrap()).await.unwrap();
    assert!(!slot.is_booked);
}

#[tokio::test]
async fn cancelling_5_hours_ahead_splits_the_payment() {
    let harness = Harness::new();
    let (patient, session) = paid_session(&harness, dec!(1000)).await;

    let outcome = harness
        .service
        .cancel_session(&patient, session.id, None, sept(10, 5, 0))
        .await
        .unwrap();

    let refund = outcome.refund.unwrap();
    assert_eq!(refund.refund_amount, dec!(600));
    assert_eq!(refund.platform_commission, dec!(100));
    assert_eq!(refund.therapist_retained, dec!(300));
}

#[tokio::test]
async fn sessions_cannot_be_cancelled_once_started() {
    let harness = Harness::new();
    let (patient, session) = paid_session(&harness, dec!(1000)).await;

    assert_matches!(
        harness
            .service
            .cancel_session(&patient, session.id, None, sept(10, 10, 30))
            .await,
        Err(SessionError::Billing(BillingError::SessionAlreadyPassed { .. }))
    );
    let stored = harness.store.get_session(session.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Confirmed);
}

#[tokio::test]
async fn rate_change_blocks_rescheduling() {
    let harness = Harness::new();
    let therapist = TestUser::therapist().to_user();
    harness.therapist_with_rate(&therapist, dec!(400)).await;
    harness.open_slot(therapist.id, day(), "10:00").await;

    let session = harness
        .book(&TestUser::patient().to_user(), therapist.id, day(), "10:00", sept(8, 9, 0))
        .await
        .unwrap();

    harness.service.set_rate(&therapist, dec!(450)).await.unwrap();

    let err = harness
        .service
        .reschedule_session(&therapist, session.id, sept(8, 10, 0))
        .await
        .unwrap_err();
    assert_matches!(err, SessionError::RateChanged { .. });
    assert!(err.to_string().contains("rate changed from 400.00 to 450.00"));
}

#[tokio::test]
async fn therapist_reschedule_frees_the_slot_and_tells_the_family() {
    let harness = Harness::new();
    let therapist = TestUser::therapist().to_user();
    harness.open_slot(therapist.id, day(), "10:00").await;
    harness.open_slot(therapist.id, day(), "14:00").await;

    let guardian = TestUser::guardian().to_user();
    let patient_id = Uuid::new_v4();
    let session = harness
        .service
        .book_slot(
            &guardian,
            BookSlotRequest {
                therapist_id: therapist.id,
                date: day(),
                start_time: "10:00".to_string(),
                session_type: None,
                notes: None,
                patient_id: Some(patient_id),
            },
            sept(8, 9, 0),
        )
        .await
        .unwrap();

    let rescheduled = harness
        .service
        .reschedule_session(&therapist, session.id, sept(8, 10, 0))
        .await
        .unwrap();
    assert_eq!(rescheduled.status, SessionStatus::Rescheduled);
    assert_eq!(rescheduled.slot_id, None);

    let old_slot = harness.availability.get_slot(session.slot_id.unwrap()).await.unwrap();
    assert!(!old_slot.is_booked);

    // One booking notice for the therapist, then one each for patient and guardian.
    let sent = harness.sink.wait_for(3).await;
    let told: Vec<Uuid> = sent
        .iter()
        .filter(|n| n.title == "Session rescheduled")
        .map(|n| n.user_id)
        .collect();
    assert!(told.contains(&patient_id));
    assert!(told.contains(&guardian.id));
    assert!(sent.iter().filter(|n| n.title == "Session rescheduled").all(|n| n.is_urgent));

    let rebooked = harness
        .service
        .choose_new_slot(
            &guardian,
            session.id,
            SlotChoice {
                date: day(),
                start_time: "14:00".to_string(),
            },
            sept(8, 11, 0),
        )
        .await
        .unwrap();
    assert_eq!(rebooked.status, SessionStatus::Scheduled);
    assert_eq!(rebooked.scheduled_at, sept(10, 14, 0));
}

#[tokio::test]
async fn late_patient_move_charges_forty_percent() {
    let harness = Harness::new();
    let (patient, session) = paid_session(&harness, dec!(500)).await;
    harness.open_slot(session.therapist_id, day(), "14:00").await;

    let early_quote = harness
        .service
        .reschedule_fee(&patient, session.id, sept(8, 9, 0))
        .await
        .unwrap();
    assert_eq!(early_quote.fee_percentage, dec!(10));
    assert_eq!(early_quote.fee, dec!(50));

    let moved = harness
        .service
        .move_session(
            &patient,
            session.id,
            SlotChoice {
                date: day(),
                start_time: "14:00".to_string(),
            },
            sept(9, 11, 0),
        )
        .await
        .unwrap();

    assert_eq!(moved.fee.fee_percentage, dec!(40));
    assert_eq!(moved.fee.fee, dec!(200));
    assert_eq!(moved.session.scheduled_at, sept(10, 14, 0));
    assert_eq!(moved.session.status, SessionStatus::Confirmed);
    assert_eq!(moved.session.reschedule_fee, Some(dec!(200)));

    let fee_payment = moved.fee_payment.unwrap().payment;
    assert_eq!(fee_payment.payment_type, PaymentType::RescheduleFee);
    assert_eq!(fee_payment.amount, dec!(200));
    assert_eq!(fee_payment.status, PaymentStatus::Pending);

    let old_slot = harness.availability.get_slot(session.slot_id.unwrap()).await.unwrap();
    assert!(!old_slot.is_booked);
}

#[tokio::test]
async fn completed_sessions_are_terminal() {
    let harness = Harness::new();
    let (patient, session) = paid_session(&harness, dec!(300)).await;
    let therapist = AuthUser::new(session.therapist_id, Role::Therapist);

    let pending = harness.service.needs_documentation(&therapist, sept(10, 11, 0)).await.unwrap();
    assert_eq!(pending.len(), 1);

    assert_matches!(
        harness.service.complete_session(&therapist, session.id, sept(10, 9, 0)).await,
        Err(SessionError::Policy(_))
    );

    let completed = harness
        .service
        .complete_session(&therapist, session.id, sept(10, 11, 0))
        .await
        .unwrap();
    assert_eq!(completed.status, SessionStatus::Completed);

    assert_matches!(
        harness.service.cancel_session(&patient, session.id, None, sept(10, 12, 0)).await,
        Err(SessionError::InvalidTransition { status: SessionStatus::Completed, .. })
    );
    assert_matches!(
        harness.service.mark_no_show(&therapist, session.id, sept(10, 12, 0)).await,
        Err(SessionError::InvalidTransition { .. })
    );
    assert!(harness
        .service
        .needs_documentation(&therapist, sept(10, 12, 0))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn revenue_report_nets_settled_refunds() {
    let harness = Harness::new();
    let (_, kept) = paid_session(&harness, dec!(1000)).await;

    harness.open_slot(kept.therapist_id, next_day(), "10:00").await;
    let patient = TestUser::patient().to_user();
    let cancelled = harness
        .book(&patient, kept.therapist_id, next_day(), "10:00", sept(8, 9, 0))
        .await
        .unwrap();
    harness.pay(&patient, cancelled.id, sept(8, 9, 5)).await;
    harness
        .service
        .cancel_session(&patient, cancelled.id, None, sept(10, 9, 0))
        .await
        .unwrap();

    let admin = TestUser::admin().to_user();
    assert_matches!(
        harness.service.settle_refund(&patient, cancelled.id, true, sept(10, 12, 0)).await,
        Err(SessionError::Forbidden(_))
    );
    harness
        .service
        .settle_refund(&admin, cancelled.id, true, sept(10, 12, 0))
        .await
        .unwrap();

    let revenue = RevenueService::new(Arc::new(SessionRevenueSource::new(
        harness.ledger.clone(),
        harness.store.clone(),
    )));
    let report = revenue
        .monthly_report("2025-09", Utc.with_ymd_and_hms(2025, 10, 15, 0, 0, 0).unwrap())
        .await
        .unwrap();

    assert_eq!(report.transaction_count, 3);
    assert_eq!(report.refund_total, dec!(900));
    assert_eq!(report.therapy_revenue, dec!(1100));
    assert_eq!(report.total_commission, dec!(200));
    assert_eq!(report.net_revenue, dec!(200));
    assert_eq!(report.excluded_count, 0);
}

#[tokio::test]
async fn therapists_cannot_cancel_a_paid_session() {
    let harness = Harness::new();
    let (_, session) = paid_session(&harness, dec!(1000)).await;
    let therapist = AuthUser::new(session.therapist_id, Role::Therapist);

    assert_matches!(
        harness.service.cancel_session(&therapist, session.id, None, sept(10, 5, 0)).await,
        Err(SessionError::Forbidden(_))
    );

    let stored = harness.store.get_session(session.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Confirmed);
    let slot = harness.availability.get_slot(session.slot_id.unwrap()).await.unwrap();
    assert!(slot.is_booked);
}

#[tokio::test]
async fn started_sessions_cannot_be_rescheduled() {
    let harness = Harness::new();
    let (_, session) = paid_session(&harness, dec!(1000)).await;
    let therapist = AuthUser::new(session.therapist_id, Role::Therapist);

    for now in [sept(10, 10, 0), sept(10, 10, 30), sept(12, 9, 0)] {
        assert_matches!(
            harness.service.reschedule_session(&therapist, session.id, now).await,
            Err(SessionError::Billing(BillingError::SessionAlreadyPassed { .. }))
        );
    }
    let stored = harness.store.get_session(session.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Confirmed);
    assert_eq!(stored.scheduled_at, sept(10, 10, 0));
}

fn oct(d: u32, h: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, d, h, 0, 0).unwrap()
}

#[tokio::test]
async fn closed_month_report_survives_later_activity() {
    let harness = Harness::new();
    let therapist = TestUser::therapist().to_user();
    harness.therapist_with_rate(&therapist, dec!(1000)).await;
    let admin = TestUser::admin().to_user();
    let patient = TestUser::patient().to_user();

    let sept_25 = chrono::NaiveDate::from_ymd_opt(2025, 9, 25).unwrap();
    let sept_30 = chrono::NaiveDate::from_ymd_opt(2025, 9, 30).unwrap();
    let oct_6 = chrono::NaiveDate::from_ymd_opt(2025, 10, 6).unwrap();
    harness.open_slot(therapist.id, day(), "10:00").await;
    harness.open_slot(therapist.id, next_day(), "10:00").await;
    harness.open_slot(therapist.id, sept_25, "10:00").await;
    harness.open_slot(therapist.id, sept_30, "22:00").await;
    harness.open_slot(therapist.id, oct_6, "10:00").await;

    // Held and paid.
    let held = harness.book(&patient, therapist.id, day(), "10:00", sept(8, 9, 0)).await.unwrap();
    harness.pay(&patient, held.id, sept(8, 9, 5)).await;

    // Cancelled in September, refund settled in October.
    let cancelled = harness.book(&patient, therapist.id, next_day(), "10:00", sept(8, 9, 0)).await.unwrap();
    harness.pay(&patient, cancelled.id, sept(8, 9, 5)).await;
    harness
        .service
        .cancel_session(&patient, cancelled.id, None, sept(10, 9, 0))
        .await
        .unwrap();

    // Paid, then rescheduled by the therapist and never rebooked in September.
    let moved = harness.book(&patient, therapist.id, sept_25, "10:00", sept(20, 9, 0)).await.unwrap();
    harness.pay(&patient, moved.id, sept(20, 9, 5)).await;
    harness
        .service
        .reschedule_session(&therapist, moved.id, sept(21, 9, 0))
        .await
        .unwrap();

    // Charged in September, confirmed by the gateway in October.
    let late = harness.book(&patient, therapist.id, sept_30, "22:00", sept(29, 9, 0)).await.unwrap();
    let pending = harness
        .service
        .initiate_session_payment(&patient, late.id, sept(29, 9, 5))
        .await
        .unwrap();
    assert_eq!(pending.receipt.payment.status, PaymentStatus::Pending);

    let revenue = RevenueService::new(Arc::new(SessionRevenueSource::new(
        harness.ledger.clone(),
        harness.store.clone(),
    )));
    let before = revenue.monthly_report("2025-09", oct(1, 0)).await.unwrap();
    assert!(before.is_closed);
    assert_eq!(before.transaction_count, 3);
    assert_eq!(before.refund_total, dec!(0));

    harness
        .service
        .settle_refund(&admin, cancelled.id, true, oct(2, 9))
        .await
        .unwrap();
    harness
        .service
        .confirm_payment(&patient, pending.receipt.payment.order_id, true, Some("card".to_string()), oct(2, 10))
        .await
        .unwrap();
    assert_matches!(
        harness
            .service
            .choose_new_slot(
                &patient,
                moved.id,
                SlotChoice {
                    date: oct_6,
                    start_time: "10:00".to_string(),
                },
                oct(2, 11),
            )
            .await,
        Err(SessionError::Policy(_))
    );
    assert_matches!(
        harness.service.reschedule_session(&therapist, held.id, oct(2, 12)).await,
        Err(SessionError::Billing(BillingError::SessionAlreadyPassed { .. }))
    );

    let after = revenue.monthly_report("2025-09", oct(15, 0)).await.unwrap();
    assert_eq!(
        serde_json::to_string(&before).unwrap(),
        serde_json::to_string(&after).unwrap()
    );

    let october = revenue.monthly_report("2025-10", oct(15, 0)).await.unwrap();
    assert_eq!(october.refund_total, dec!(900));
    assert_eq!(october.therapy_revenue, dec!(100));
    assert_eq!(october.transaction_count, 2);
}
