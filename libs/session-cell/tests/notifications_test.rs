mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;
use rust_decimal_macros::dec;
use uuid::Uuid;

use session_cell::models::{RequestDecision, RequestSessionRequest, SessionStatus, SessionType};
use session_cell::services::{Notification, NotificationSink, SessionStore};
use shared_utils::test_utils::TestUser;

use common::{day, sept, Harness};

mock! {
    pub Sink {}

    #[async_trait]
    impl NotificationSink for Sink {
        async fn send(&self, notification: Notification) -> anyhow::Result<()>;
    }
}

async fn wait_for_attempts(attempts: &AtomicUsize, expected: usize) -> usize {
    for _ in 0..100 {
        if attempts.load(Ordering::SeqCst) >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    attempts.load(Ordering::SeqCst)
}

#[tokio::test]
async fn failed_notifications_do_not_roll_back_transitions() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    let mut sink = MockSink::new();
    sink.expect_send().returning(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("notification service unreachable"))
    });

    let harness = Harness::with_sink(Arc::new(sink));
    let therapist = TestUser::therapist().to_user();
    harness.therapist_with_rate(&therapist, dec!(400)).await;
    harness.open_slot(therapist.id, day(), "10:00").await;

    let patient = TestUser::patient().to_user();
    let session = harness
        .book(&patient, therapist.id, day(), "10:00", sept(8, 9, 0))
        .await
        .unwrap();

    let outcome = harness
        .service
        .cancel_session(&patient, session.id, None, sept(8, 10, 0))
        .await
        .unwrap();
    assert_eq!(outcome.session.status, SessionStatus::Cancelled);

    // Booking told the therapist; cancelling told the therapist again.
    assert_eq!(wait_for_attempts(&attempts, 2).await, 2);

    let stored = harness.store.get_session(session.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Cancelled);
}

#[tokio::test]
async fn declined_requests_reach_patient_and_guardian() {
    let harness = Harness::new();
    let therapist = TestUser::therapist().to_user();
    let guardian = TestUser::guardian().to_user();
    let patient_id = Uuid::new_v4();

    let requested = harness
        .service
        .request_session(
            &guardian,
            RequestSessionRequest {
                therapist_id: therapist.id,
                scheduled_at: sept(15, 16, 0),
                session_type: None,
                notes: None,
                patient_id: Some(patient_id),
            },
            sept(8, 9, 0),
        )
        .await
        .unwrap();
    assert_eq!(requested.session_type, SessionType::WithGuardian);

    harness
        .service
        .respond_to_request(
            &therapist,
            requested.id,
            RequestDecision::Decline,
            sept(8, 10, 0),
        )
        .await
        .unwrap();

    let sent = harness.sink.wait_for(3).await;
    let declined: Vec<_> = sent
        .iter()
        .filter(|n| n.title == "Session request declined")
        .map(|n| n.user_id)
        .collect();
    assert_eq!(declined.len(), 2);
    assert!(declined.contains(&patient_id));
    assert!(declined.contains(&guardian.id));
}
