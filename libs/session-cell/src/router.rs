use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::SessionService;

pub fn session_routes(config: Arc<AppConfig>, service: Arc<SessionService>) -> Router {
    let public_routes = Router::new().route(
        "/therapists/{therapist_id}/available-slots",
        get(handlers::available_slots),
    );

    let protected_routes = Router::new()
        .route("/", get(handlers::list_my_sessions))
        .route("/book", post(handlers::book_slot))
        .route("/requests", post(handlers::request_session))
        .route("/needs-documentation", get(handlers::needs_documentation))
        .route("/rate", put(handlers::set_rate))
        .route("/payments/{order_id}/confirm", post(handlers::confirm_payment))
        .route("/{session_id}", get(handlers::get_session))
        .route("/{session_id}/respond", post(handlers::respond_to_request))
        .route("/{session_id}/reschedule", post(handlers::reschedule_session))
        .route("/{session_id}/reschedule-fee", get(handlers::reschedule_fee))
        .route("/{session_id}/move", post(handlers::move_session))
        .route("/{session_id}/choose-slot", post(handlers::choose_new_slot))
        .route("/{session_id}/cancel", post(handlers::cancel_session))
        .route("/{session_id}/pay", post(handlers::initiate_payment))
        .route("/{session_id}/refund/settle", post(handlers::settle_refund))
        .route("/{session_id}/complete", post(handlers::complete_session))
        .route("/{session_id}/no-show", post(handlers::mark_no_show))
        .layer(middleware::from_fn_with_state(config, auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(service)
}
