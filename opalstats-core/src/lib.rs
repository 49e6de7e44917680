//! # opalstats-core
//!
//! Core library for opalstats - the usage-statistics aggregation engine of
//! the Opal patient portal.
//!
//! This library provides:
//! - Domain types for patients, caregivers, relationships, and daily rollups
//! - Database storage layer with SQLite
//! - The activity classifier over the legacy activity log
//! - Daily and received-data aggregators with a persisted watermark
//! - Read-only summary queries and CSV/XLSX export
//!
//! ## Architecture
//!
//! Data flows through three layers:
//! - **Source (legacy):** Append-only activity log and clinical tables,
//!   externally populated and never mutated here
//! - **Source (modern):** Patients, caregivers, relationships, registration
//!   codes - reference data the engine reads but does not own
//! - **Derived:** The three daily result tables, regenerable from the sources
//!
//! ## Example
//!
//! ```rust,no_run
//! use opalstats_core::{Config, Database};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::open(&config.database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! ```

// Re-export commonly used items at the crate root
pub use aggregate::{AggregationWindow, UpdateOutcome, UpdateRunner};
pub use classify::{classify, ActivityKind};
pub use config::Config;
pub use db::repo::ReceivedCategory;
pub use db::Database;
pub use error::{Error, Result};
pub use relationships::RelationshipMapping;
pub use types::*;

// Public modules
pub mod aggregate;
pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod logging;
pub mod relationships;
pub mod types;
