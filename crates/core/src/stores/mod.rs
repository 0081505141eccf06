pub mod memory;
pub mod supabase;

pub use memory::InMemoryNoteStore;
pub use supabase::{SupabaseStore, SCHEMA_SQL};
