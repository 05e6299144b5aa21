pub mod cache_entries;
pub mod pool;
pub mod reports;
pub mod section_artifacts;

pub use pool::{create_pool, run_migrations};
