use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::AuthUser;
use shared_models::error::AppError;

use crate::models::{BillingError, DonationRequest};
use crate::services::{PaymentService, RevenueService};

#[derive(Clone)]
pub struct BillingState {
    pub payments: Arc<PaymentService>,
    pub revenue: Arc<RevenueService>,
}

#[axum::debug_handler]
pub async fn record_donation(
    State(state): State<Arc<BillingState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<DonationRequest>,
) -> Result<Json<Value>, AppError> {
    let receipt = state.payments.record_donation(user.id, request.amount, Utc::now()).await?;

    Ok(Json(json!({
        "success": true,
        "payment": receipt.payment,
        "checkout_url": receipt.checkout_url
    })))
}

#[axum::debug_handler]
pub async fn get_payment(
    State(state): State<Arc<BillingState>>,
    Extension(user): Extension<AuthUser>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let payment = state.payments.get_payment(order_id).await?;

    if payment.payer_id != user.id && !user.is_admin() {
        return Err(BillingError::Forbidden("Not your payment".to_string()).into());
    }

    Ok(Json(json!(payment)))
}

#[axum::debug_handler]
pub async fn monthly_revenue_report(
    State(state): State<Arc<BillingState>>,
    Extension(user): Extension<AuthUser>,
    Path(month): Path<String>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() {
        return Err(BillingError::Forbidden(
            "Only administrators can read revenue reports".to_string(),
        )
        .into());
    }

    let report = state.revenue.monthly_report(&month, Utc::now()).await?;

    Ok(Json(json!(report)))
}
