// Implementations of the leveling storage port.
#![allow(unused_imports)]

pub mod in_memory;
pub mod sqlite_store;

// Re-export for convenience
pub use in_memory::InMemoryXpStore;
pub use sqlite_store::SqliteXpStore;
