pub mod calculator;
pub mod gateway;
pub mod ledger;
pub mod payments;
pub mod revenue;

pub use gateway::{ChargeRequest, HttpPaymentGateway, OfflineGateway, PaymentGateway, PaymentResult};
pub use ledger::{InMemoryPaymentLedger, PaymentLedger, SupabasePaymentLedger};
pub use payments::{PaymentReceipt, PaymentService};
pub use revenue::{RevenueInputs, RevenueService, RevenueSource};
