//! Database module for sitewatch.
//!
//! Provides SQLite storage with embedded migrations, and the `CheckStore`
//! interface the monitoring core is written against.

mod models;
mod store;

pub use models::*;
pub use store::*;
