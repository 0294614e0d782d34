pub mod availability;
pub mod store;
pub mod supabase;

pub use availability::AvailabilityService;
pub use store::{InMemorySlotStore, SlotStore};
pub use supabase::SupabaseSlotStore;
