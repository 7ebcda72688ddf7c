//! Per-queue job statistics in canonical status categories.
pub mod aggregate;
pub mod mapping;

pub use aggregate::{FillMode, QueueStats, StatsByQueue, aggregate_jobs};
pub use mapping::{Category, StatusMapping};
