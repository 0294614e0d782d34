use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::AvailabilityService;

pub fn availability_routes(config: Arc<AppConfig>, service: Arc<AvailabilityService>) -> Router {
    let public_routes = Router::new()
        .route("/therapists/{therapist_id}/slots", get(handlers::list_therapist_slots));

    let protected_routes = Router::new()
        .route("/slots", post(handlers::create_slot))
        .route("/slots/{slot_id}", delete(handlers::delete_slot))
        .route("/templates", get(handlers::list_templates).post(handlers::create_template))
        .route("/templates/{template_id}", delete(handlers::delete_template))
        .route("/templates/expand", post(handlers::expand_templates))
        .layer(middleware::from_fn_with_state(config, auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(service)
}
