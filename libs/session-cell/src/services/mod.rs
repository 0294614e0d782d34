pub mod conflict;
pub mod lifecycle;
pub mod notifications;
pub mod rates;
pub mod revenue_source;
pub mod session;
pub mod store;
pub mod supabase;

pub use notifications::{
    Notification, NotificationSink, Notifier, SupabaseNotificationSink, TracingNotificationSink,
};
pub use rates::{InMemoryRateProvider, RateProvider, SupabaseRateProvider};
pub use revenue_source::SessionRevenueSource;
pub use session::SessionService;
pub use store::{InMemorySessionStore, SessionStore};
pub use supabase::SupabaseSessionStore;
