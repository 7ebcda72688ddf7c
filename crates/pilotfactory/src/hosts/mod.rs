//! Execution hosts: correlation of jobs with the hosts they started and the canonical lifecycle
//! state of each host.
pub mod correlate;
pub mod status;

pub use correlate::{
    Correlation, CorrelationReport, ExecuteHost, HostRegistry, JobWithHost, correlate,
};
pub use status::{HostStatus, derive_host_status};
