//! A pilot factory keeps a fleet of agent ("pilot") jobs running on an external batch system.
//!
//! The core of the crate is the batch-state correlation and node-lifecycle engine:
//! - [`batch`] queries the batch system and normalizes its XML output into records.
//! - [`stats`] aggregates job records into per-queue statistics.
//! - [`hosts`] correlates jobs with execution hosts and derives host lifecycle states.
//! - [`retire`] retires, un-retires and reaps execution hosts.
//! - [`submit`] serializes all batch-mutating commands through a single worker.
//! - [`demand`] turns the external demand signal into submissions and retirements.
//! - [`poller`] runs the periodic refresh cycles and publishes immutable snapshots.
#![deny(clippy::await_holding_lock)]

pub mod batch;
pub mod common;
pub mod demand;
pub mod factory;
pub mod hosts;
pub mod poller;
pub mod retire;
pub mod stats;
pub mod submit;

#[cfg(test)]
pub(crate) mod tests;

pub type Error = crate::common::error::FactoryError;
pub type Result<T> = std::result::Result<T, Error>;

pub type Map<K, V> = hashbrown::HashMap<K, V, fxhash::FxBuildHasher>;
pub type Set<T> = hashbrown::HashSet<T, fxhash::FxBuildHasher>;

/// Logical (factory-side) name of a workload queue.
pub type QueueName = String;
/// Identity shared by a batch job and the execution host it started, e.g. a cloud instance id.
pub type HostInstanceId = String;

pub const PILOTD_VERSION: &str = env!("CARGO_PKG_VERSION");
