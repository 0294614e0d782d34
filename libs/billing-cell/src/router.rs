use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, BillingState};

pub fn billing_routes(config: Arc<AppConfig>, state: Arc<BillingState>) -> Router {
    Router::new()
        .route("/donations", post(handlers::record_donation))
        .route("/payments/{order_id}", get(handlers::get_payment))
        .route("/revenue/{month}", get(handlers::monthly_revenue_report))
        .layer(middleware::from_fn_with_state(config, auth_middleware))
        .with_state(state)
}
