//! Single-writer execution of all commands that change the state of the batch system.
pub mod proc_ids;
pub mod serializer;

pub use proc_ids::{parse_submitted_jobs, submit_pilots};
pub use serializer::{RequestKind, SubmissionRequest, SubmissionSerializer};
