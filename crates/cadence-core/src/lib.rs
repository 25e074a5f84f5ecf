//! # Cadence Core Library
//!
//! A multi-tenant recurring-appointment scheduling engine: schedule entries
//! that are either standalone appointments or recurring masters, on-demand
//! expansion of masters into virtual occurrences, and calendar-style scoped
//! edits (this occurrence / this-and-future / entire series).
//!
//! ## Features
//!
//! - **Virtual Occurrences**: recurring series are expanded at query time;
//!   only the master row is stored, each occurrence is addressable through a
//!   composite identity
//! - **Scoped Mutations**: SINGLE edits detach one occurrence, FUTURE edits
//!   split the series at an occurrence, ALL edits rewrite the master in place
//! - **Fail-Open Expansion**: a malformed rule degrades to the entry's own
//!   start instead of erroring or vanishing
//! - **Tenant Isolation**: every operation is scoped by an explicit tenant id
//! - **Type Safety**: sqlx-backed persistence with transactional mutation
//!   sequences
//!
//! ## Core Modules
//!
//! - [`db`]: Database connection and migration management
//! - [`models`]: Row structs, transfer objects and the entry-reference type
//! - [`recurrence`]: Pure occurrence expansion with fail-open degradation
//! - [`materialize`]: Projection of masters into virtual occurrences
//! - [`repository`]: Data access layer with the mutation engine and queries
//! - [`error`]: Error types
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use cadence_core::{
//!     db,
//!     models::{NewEntryData, RecurrenceRule},
//!     recurrence::RecurrenceConfig,
//!     repository::{EntryRepository, SqliteRepository},
//! };
//! use chrono::{Duration, Utc};
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cadence_core::error::CoreError> {
//!     let pool = db::establish_connection("schedule.db").await?;
//!     let repo = SqliteRepository::new(pool, RecurrenceConfig::default());
//!
//!     let tenant = Uuid::now_v7();
//!     let start = Utc::now();
//!     let mut data = NewEntryData::new("Weekly sync", start, start + Duration::hours(1));
//!     data.recurrence = Some(RecurrenceRule::weekly(start));
//!
//!     let entry = repo.create_entry(tenant, data).await?;
//!     println!("Created entry: {}", entry.title);
//!     Ok(())
//! }
//! ```

pub mod db;
pub mod error;
pub mod materialize;
pub mod models;
pub mod recurrence;
pub mod repository;
