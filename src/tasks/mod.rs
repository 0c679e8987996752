//! Background Tasks Module
//!
//! Contains background tasks that keep storage backends tidy.
//!
//! # Tasks
//! - Purge: Drops entries that no longer pass verification (e.g. expired TTL)

mod purge;

pub use purge::spawn_purge_task;
