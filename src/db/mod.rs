//! Database module for urlwatch.
//!
//! Persists target definitions in SQLite. Monitoring history is never stored.

mod models;
mod store;

pub use models::*;
pub use store::*;
