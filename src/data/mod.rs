//! Data layer module
//!
//! Handles all data persistence:
//! - SQLite database operations
//! - Domain models (tenancy, listing content, sync jobs, audit rows)

mod database;
mod models;

pub use database::{Database, JobClaimFilter};
pub use models::*;

#[cfg(test)]
mod database_test;
