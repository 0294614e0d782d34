pub mod supabase;

pub use supabase::{is_conflict, SupabaseApiError, SupabaseClient};
