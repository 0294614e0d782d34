mod common;

use axum::{
    body::{to_bytes, Body},
    extract::{Extension, Path, Query, State},
    http::{Request, StatusCode},
    Json,
};
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal_macros::dec;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use session_cell::handlers::*;
use session_cell::models::{BookSlotRequest, CancelRequest};
use session_cell::router::session_routes;
use shared_models::error::AppError;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

use common::Harness;

/// Handlers read the real clock, so slots live a week ahead.
fn next_week() -> NaiveDate {
    (Utc::now() + Duration::days(7)).date_naive()
}

#[tokio::test]
async fn patient_books_and_cancels_through_handlers() {
    let harness = Harness::new();
    let therapist = TestUser::therapist().to_user();
    harness.therapist_with_rate(&therapist, dec!(500)).await;
    harness.open_slot(therapist.id, next_week(), "10:00").await;
    let patient = TestUser::patient().to_user();

    let offered = available_slots(
        State(harness.service.clone()),
        Path(therapist.id),
        Query(AvailableSlotsQuery {
            date: next_week(),
            duration_minutes: None,
        }),
    )
    .await
    .unwrap();
    assert_eq!(offered.0["status"], "open");
    assert_eq!(offered.0["slots"][0]["start_time"], "10:00");
    assert_eq!(offered.0["slots"][0]["cost"], "500.00");

    let booked = book_slot(
        State(harness.service.clone()),
        Extension(patient.clone()),
        Json(BookSlotRequest {
            therapist_id: therapist.id,
            date: next_week(),
            start_time: "10:00".to_string(),
            session_type: None,
            notes: None,
            patient_id: None,
        }),
    )
    .await
    .unwrap();
    assert_eq!(booked.0["success"], true);
    assert_eq!(booked.0["session"]["status"], "SCHEDULED");
    assert_eq!(booked.0["session"]["booked_rate"], "500.00");

    let session_id: Uuid = serde_json::from_value(booked.0["session"]["id"].clone()).unwrap();
    let cancelled = cancel_session(
        State(harness.service.clone()),
        Extension(patient),
        Path(session_id),
        Json(CancelRequest {
            reason: Some("schedule clash".to_string()),
        }),
    )
    .await
    .unwrap();
    assert_eq!(cancelled.0["session"]["status"], "CANCELLED");
    assert!(cancelled.0["refund"].is_null());
}

#[tokio::test]
async fn strangers_cannot_read_sessions() {
    let harness = Harness::new();
    let therapist = TestUser::therapist().to_user();
    harness.open_slot(therapist.id, next_week(), "10:00").await;
    let session = harness
        .book(&TestUser::patient().to_user(), therapist.id, next_week(), "10:00", Utc::now())
        .await
        .unwrap();

    let result = get_session(
        State(harness.service.clone()),
        Extension(TestUser::patient().to_user()),
        Path(session.id),
    )
    .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));

    let as_therapist = get_session(
        State(harness.service.clone()),
        Extension(therapist),
        Path(session.id),
    )
    .await
    .unwrap();
    assert_eq!(as_therapist.0["id"], session.id.to_string());
}

#[tokio::test]
async fn taken_slot_maps_to_conflict() {
    let harness = Harness::new();
    let therapist = TestUser::therapist().to_user();
    harness.open_slot(therapist.id, next_week(), "10:00").await;
    harness
        .book(&TestUser::patient().to_user(), therapist.id, next_week(), "10:00", Utc::now())
        .await
        .unwrap();

    let result = book_slot(
        State(harness.service.clone()),
        Extension(TestUser::patient().to_user()),
        Json(BookSlotRequest {
            therapist_id: therapist.id,
            date: next_week(),
            start_time: "10:00".to_string(),
            session_type: None,
            notes: None,
            patient_id: None,
        }),
    )
    .await;
    assert!(matches!(result, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn router_protects_everything_but_slot_lookup() {
    let harness = Harness::new();
    let config = TestConfig::default();
    let app = session_routes(config.to_arc(), harness.service.clone());

    let anonymous = Request::builder()
        .method("POST")
        .uri("/book")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.clone().oneshot(anonymous).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let public = Request::builder()
        .uri(format!(
            "/therapists/{}/available-slots?date={}",
            Uuid::new_v4(),
            next_week()
        ))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(public).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let therapist = TestUser::therapist();
    let token = JwtTestUtils::create_test_token(&therapist, &config.jwt_secret, None);
    let set_rate = Request::builder()
        .method("PUT")
        .uri("/rate")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::from(r#"{"rate":"450"}"#))
        .unwrap();
    let response = app.oneshot(set_rate).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["session_rate"], "450.00");
}
