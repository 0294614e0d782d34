use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::AuthUser;
use shared_models::error::AppError;

use crate::models::{
    BookSlotRequest, CancelRequest, ConfirmPaymentRequest, RequestSessionRequest, RespondRequest,
    SetRateRequest, SettleRefundRequest, SlotChoice,
};
use crate::services::SessionService;

#[derive(Debug, Deserialize)]
pub struct AvailableSlotsQuery {
    pub date: NaiveDate,
    pub duration_minutes: Option<i64>,
}

// ==============================================================================
// PUBLIC HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn available_slots(
    State(service): State<Arc<SessionService>>,
    Path(therapist_id): Path<Uuid>,
    Query(query): Query<AvailableSlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let day = service
        .available_slots(therapist_id, query.date, query.duration_minutes, Utc::now())
        .await?;

    Ok(Json(json!(day)))
}

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_slot(
    State(service): State<Arc<SessionService>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<BookSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let session = service.book_slot(&user, request, Utc::now()).await?;

    Ok(Json(json!({
        "success": true,
        "session": session
    })))
}

#[axum::debug_handler]
pub async fn request_session(
    State(service): State<Arc<SessionService>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<RequestSessionRequest>,
) -> Result<Json<Value>, AppError> {
    let session = service.request_session(&user, request, Utc::now()).await?;

    Ok(Json(json!({
        "success": true,
        "session": session
    })))
}

#[axum::debug_handler]
pub async fn respond_to_request(
    State(service): State<Arc<SessionService>>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<RespondRequest>,
) -> Result<Json<Value>, AppError> {
    let session = service
        .respond_to_request(&user, session_id, request.action, Utc::now())
        .await?;

    Ok(Json(json!({
        "success": true,
        "session": session
    })))
}

// ==============================================================================
// RESCHEDULE & CANCEL HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn reschedule_session(
    State(service): State<Arc<SessionService>>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let session = service.reschedule_session(&user, session_id, Utc::now()).await?;

    Ok(Json(json!({
        "success": true,
        "session": session
    })))
}

#[axum::debug_handler]
pub async fn reschedule_fee(
    State(service): State<Arc<SessionService>>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let quote = service.reschedule_fee(&user, session_id, Utc::now()).await?;

    Ok(Json(json!(quote)))
}

#[axum::debug_handler]
pub async fn move_session(
    State(service): State<Arc<SessionService>>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
    Json(choice): Json<SlotChoice>,
) -> Result<Json<Value>, AppError> {
    let outcome = service.move_session(&user, session_id, choice, Utc::now()).await?;

    Ok(Json(json!({
        "success": true,
        "session": outcome.session,
        "fee": outcome.fee,
        "fee_payment": outcome.fee_payment
    })))
}

#[axum::debug_handler]
pub async fn choose_new_slot(
    State(service): State<Arc<SessionService>>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
    Json(choice): Json<SlotChoice>,
) -> Result<Json<Value>, AppError> {
    let session = service.choose_new_slot(&user, session_id, choice, Utc::now()).await?;

    Ok(Json(json!({
        "success": true,
        "session": session
    })))
}

#[axum::debug_handler]
pub async fn cancel_session(
    State(service): State<Arc<SessionService>>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Value>, AppError> {
    let outcome = service
        .cancel_session(&user, session_id, request.reason, Utc::now())
        .await?;

    Ok(Json(json!({
        "success": true,
        "refund_amount": outcome.refund_amount,
        "refund_percentage": outcome.refund_percentage,
        "session": outcome.session,
        "refund": outcome.refund
    })))
}

// ==============================================================================
// PAYMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn initiate_payment(
    State(service): State<Arc<SessionService>>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let outcome = service
        .initiate_session_payment(&user, session_id, Utc::now())
        .await?;

    Ok(Json(json!({
        "success": true,
        "session": outcome.session,
        "payment": outcome.receipt.payment,
        "checkout_url": outcome.receipt.checkout_url
    })))
}

#[axum::debug_handler]
pub async fn confirm_payment(
    State(service): State<Arc<SessionService>>,
    Extension(user): Extension<AuthUser>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<Json<Value>, AppError> {
    let (payment, session) = service
        .confirm_payment(&user, order_id, request.success, request.payment_method, Utc::now())
        .await?;

    Ok(Json(json!({
        "success": true,
        "payment": payment,
        "session": session
    })))
}

#[axum::debug_handler]
pub async fn settle_refund(
    State(service): State<Arc<SessionService>>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SettleRefundRequest>,
) -> Result<Json<Value>, AppError> {
    let refund = service
        .settle_refund(&user, session_id, request.success, Utc::now())
        .await?;

    Ok(Json(json!({
        "success": true,
        "refund": refund
    })))
}

// ==============================================================================
// DOCUMENTATION HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn needs_documentation(
    State(service): State<Arc<SessionService>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, AppError> {
    let sessions = service.needs_documentation(&user, Utc::now()).await?;

    Ok(Json(json!({
        "sessions": sessions,
        "total": sessions.len()
    })))
}

#[axum::debug_handler]
pub async fn complete_session(
    State(service): State<Arc<SessionService>>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let session = service.complete_session(&user, session_id, Utc::now()).await?;

    Ok(Json(json!({
        "success": true,
        "session": session
    })))
}

#[axum::debug_handler]
pub async fn mark_no_show(
    State(service): State<Arc<SessionService>>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let session = service.mark_no_show(&user, session_id, Utc::now()).await?;

    Ok(Json(json!({
        "success": true,
        "session": session
    })))
}

// ==============================================================================
// QUERY HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_session(
    State(service): State<Arc<SessionService>>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let session = service.get_session(&user, session_id).await?;

    Ok(Json(json!(session)))
}

#[axum::debug_handler]
pub async fn list_my_sessions(
    State(service): State<Arc<SessionService>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, AppError> {
    let sessions = service.list_my_sessions(&user).await?;

    Ok(Json(json!({
        "sessions": sessions,
        "total": sessions.len()
    })))
}

#[axum::debug_handler]
pub async fn set_rate(
    State(service): State<Arc<SessionService>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<SetRateRequest>,
) -> Result<Json<Value>, AppError> {
    let rate = service.set_rate(&user, request.rate).await?;

    Ok(Json(json!({
        "success": true,
        "therapist_id": user.id,
        "session_rate": rate
    })))
}
