use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};
use tracing::info;

use availability_cell::router::availability_routes;
use availability_cell::services::{AvailabilityService, InMemorySlotStore, SlotStore, SupabaseSlotStore};
use billing_cell::handlers::BillingState;
use billing_cell::router::billing_routes;
use billing_cell::services::{
    HttpPaymentGateway, InMemoryPaymentLedger, OfflineGateway, PaymentGateway, PaymentLedger,
    PaymentService, RevenueService, SupabasePaymentLedger,
};
use session_cell::router::session_routes;
use session_cell::services::{
    InMemoryRateProvider, InMemorySessionStore, NotificationSink, Notifier, RateProvider,
    SessionRevenueSource, SessionService, SessionStore, SupabaseNotificationSink,
    SupabaseRateProvider, SupabaseSessionStore, TracingNotificationSink,
};
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

struct Backends {
    slots: Arc<dyn SlotStore>,
    sessions: Arc<dyn SessionStore>,
    ledger: Arc<dyn PaymentLedger>,
    rates: Arc<dyn RateProvider>,
    notifications: Arc<dyn NotificationSink>,
}

fn backends(config: &AppConfig) -> Backends {
    if config.is_configured() {
        info!("Using Supabase persistence at {}", config.supabase_url);
        let supabase = Arc::new(SupabaseClient::new(config));
        Backends {
            slots: Arc::new(SupabaseSlotStore::new(supabase.clone())),
            sessions: Arc::new(SupabaseSessionStore::new(supabase.clone())),
            ledger: Arc::new(SupabasePaymentLedger::new(supabase.clone())),
            rates: Arc::new(SupabaseRateProvider::new(supabase.clone())),
            notifications: Arc::new(SupabaseNotificationSink::new(supabase)),
        }
    } else {
        info!("Using in-memory persistence");
        Backends {
            slots: Arc::new(InMemorySlotStore::new()),
            sessions: Arc::new(InMemorySessionStore::new()),
            ledger: Arc::new(InMemoryPaymentLedger::new()),
            rates: Arc::new(InMemoryRateProvider::new()),
            notifications: Arc::new(TracingNotificationSink),
        }
    }
}

fn gateway(config: &AppConfig) -> Arc<dyn PaymentGateway> {
    if config.is_payment_gateway_configured() {
        Arc::new(HttpPaymentGateway::new(config))
    } else {
        Arc::new(OfflineGateway)
    }
}

pub fn create_router(config: Arc<AppConfig>) -> Router {
    let backends = backends(&config);

    let availability = Arc::new(AvailabilityService::new(backends.slots));
    let payments = Arc::new(PaymentService::new(
        backends.ledger.clone(),
        gateway(&config),
        &config.payment_currency,
    ));
    let sessions = Arc::new(SessionService::new(
        availability.clone(),
        backends.sessions.clone(),
        payments.clone(),
        backends.rates,
        Notifier::new(backends.notifications),
    ));
    let billing = Arc::new(BillingState {
        payments,
        revenue: Arc::new(RevenueService::new(Arc::new(SessionRevenueSource::new(
            backends.ledger,
            backends.sessions,
        )))),
    });

    Router::new()
        .route("/", get(|| async { "Therapy scheduling API is running!" }))
        .nest("/availability", availability_routes(config.clone(), availability))
        .nest("/sessions", session_routes(config.clone(), sessions))
        .nest("/billing", billing_routes(config, billing))
}
