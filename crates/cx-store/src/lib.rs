//! SQLite-backed vector memory for the cortex engine.

pub mod error;
pub mod schema;
pub mod store;

pub use error::{Result, StoreError};
pub use store::MemoryStore;
