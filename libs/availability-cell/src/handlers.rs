use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::AuthUser;
use shared_models::error::AppError;

use crate::models::{
    AvailabilityError, CreateSlotRequest, CreateTemplateRequest, ExpandTemplatesRequest,
};
use crate::services::AvailabilityService;

#[derive(Debug, Deserialize)]
pub struct SlotDateQuery {
    pub date: NaiveDate,
}

fn require_therapist(user: &AuthUser) -> Result<(), AvailabilityError> {
    if !user.is_therapist() {
        return Err(AvailabilityError::Forbidden(
            "Only therapists can manage availability".to_string(),
        ));
    }
    Ok(())
}

// ==============================================================================
// PUBLIC HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_therapist_slots(
    State(service): State<Arc<AvailabilityService>>,
    Path(therapist_id): Path<Uuid>,
    Query(query): Query<SlotDateQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = service.list_slots(therapist_id, query.date).await?;

    Ok(Json(json!({
        "therapist_id": therapist_id,
        "date": query.date,
        "slots": slots,
        "total": slots.len()
    })))
}

// ==============================================================================
// THERAPIST HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_slot(
    State(service): State<Arc<AvailabilityService>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<CreateSlotRequest>,
) -> Result<Json<Value>, AppError> {
    require_therapist(&user)?;

    let slot = service
        .add_slot(user.id, request.date, &request.start_time, request.is_free.unwrap_or(false))
        .await?;

    Ok(Json(json!({
        "success": true,
        "slot": slot
    })))
}

#[axum::debug_handler]
pub async fn delete_slot(
    State(service): State<Arc<AvailabilityService>>,
    Extension(user): Extension<AuthUser>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_therapist(&user)?;

    service.remove_slot(user.id, slot_id).await?;

    Ok(Json(json!({
        "success": true,
        "slot_id": slot_id
    })))
}

#[axum::debug_handler]
pub async fn list_templates(
    State(service): State<Arc<AvailabilityService>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, AppError> {
    require_therapist(&user)?;

    let templates = service.list_templates(user.id).await?;

    Ok(Json(json!({
        "templates": templates,
        "total": templates.len()
    })))
}

#[axum::debug_handler]
pub async fn create_template(
    State(service): State<Arc<AvailabilityService>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<CreateTemplateRequest>,
) -> Result<Json<Value>, AppError> {
    require_therapist(&user)?;

    let template = service.create_template(user.id, request).await?;

    Ok(Json(json!({
        "success": true,
        "template": template
    })))
}

#[axum::debug_handler]
pub async fn delete_template(
    State(service): State<Arc<AvailabilityService>>,
    Extension(user): Extension<AuthUser>,
    Path(template_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_therapist(&user)?;

    service.delete_template(user.id, template_id).await?;

    Ok(Json(json!({
        "success": true,
        "template_id": template_id
    })))
}

#[axum::debug_handler]
pub async fn expand_templates(
    State(service): State<Arc<AvailabilityService>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<ExpandTemplatesRequest>,
) -> Result<Json<Value>, AppError> {
    require_therapist(&user)?;

    let report = service.expand_templates(user.id, request.from, request.to).await?;

    Ok(Json(json!({
        "success": true,
        "created_count": report.created.len(),
        "skipped_count": report.skipped.len(),
        "created": report.created,
        "skipped": report.skipped
    })))
}
