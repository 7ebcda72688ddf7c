//! Turns the demand signal of a queue into unretirements, submissions and retirements.
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::batch::condor::CondorCommands;
use crate::batch::records::JobId;
use crate::common::config::QueueConfig;
use crate::common::error::FactoryError;
use crate::hosts::Correlation;
use crate::retire::{ControlReport, RetirementController};
use crate::submit::{SubmissionSerializer, submit_pilots};

/// Where the number of pilots wanted by a queue comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemandSource {
    Fixed(i64),
    /// A file with a single signed integer, written by an external workload system.
    File(PathBuf),
}

impl DemandSource {
    pub fn from_config(queue: &QueueConfig) -> crate::Result<Self> {
        match (queue.demand, &queue.demand_file) {
            (Some(demand), None) => Ok(DemandSource::Fixed(demand)),
            (None, Some(path)) => Ok(DemandSource::File(path.clone())),
            _ => Err(FactoryError::ConfigError(format!(
                "Queue `{}` must have exactly one of `demand` and `demand_file`",
                queue.name
            ))),
        }
    }

    pub fn read(&self) -> crate::Result<i64> {
        match self {
            DemandSource::Fixed(demand) => Ok(*demand),
            DemandSource::File(path) => {
                let content = std::fs::read_to_string(path).map_err(|error| {
                    FactoryError::GenericError(format!(
                        "Cannot read demand file {}: {error}",
                        path.display()
                    ))
                })?;
                content.trim().parse().map_err(|_| {
                    FactoryError::GenericError(format!(
                        "Demand file {} does not contain a number: `{}`",
                        path.display(),
                        content.trim()
                    ))
                })
            }
        }
    }
}

/// Limits of the number of pilots submitted for a queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemandCaps {
    /// At most this many pilots are submitted in one cycle.
    pub max_per_cycle: Option<u64>,
    /// Pilots are not submitted once this many pilots of the queue are pending.
    pub max_pending: Option<u64>,
}

impl From<&QueueConfig> for DemandCaps {
    fn from(queue: &QueueConfig) -> Self {
        Self {
            max_per_cycle: queue.max_per_cycle,
            max_pending: queue.max_pending,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DemandPlan {
    pub unretire: u64,
    pub submit: u64,
    pub retire: u64,
}

impl DemandPlan {
    pub fn is_empty(&self) -> bool {
        self.unretire == 0 && self.submit == 0 && self.retire == 0
    }
}

/// Decides how to satisfy `demand` new pilots of a queue with `retiring` retiring and
/// `pending` pending pilots.
///
/// Retiring hosts are reused before new pilots are submitted. A negative demand is surplus
/// capacity that should be retired.
pub fn plan(demand: i64, retiring: u64, pending: u64, caps: &DemandCaps) -> DemandPlan {
    if demand < 0 {
        return DemandPlan {
            retire: demand.unsigned_abs(),
            ..Default::default()
        };
    }
    let demand = demand as u64;
    let net = demand.saturating_sub(retiring);
    if net == 0 {
        return DemandPlan {
            unretire: demand,
            ..Default::default()
        };
    }

    let mut submit = net;
    if let Some(max) = caps.max_per_cycle {
        submit = submit.min(max);
    }
    if let Some(max) = caps.max_pending {
        submit = submit.min(max.saturating_sub(pending));
    }
    if submit < net {
        log::debug!("Submission of {net} pilot(s) capped to {submit}");
    }
    DemandPlan {
        unretire: retiring,
        submit,
        retire: 0,
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DemandOutcome {
    pub unretired: ControlReport,
    pub retired: ControlReport,
    pub submitted: Vec<JobId>,
}

/// Executes demand plans of queues.
pub struct DemandScheduler {
    controller: Arc<RetirementController>,
    serializer: Arc<SubmissionSerializer>,
    commands: CondorCommands,
}

impl DemandScheduler {
    pub fn new(
        controller: Arc<RetirementController>,
        serializer: Arc<SubmissionSerializer>,
        commands: CondorCommands,
    ) -> Self {
        Self {
            controller,
            serializer,
            commands,
        }
    }

    /// Unretires hosts first, then submits new pilots. A failed submission is returned after
    /// the unretirements have been done.
    pub async fn apply(
        &self,
        queue: &QueueConfig,
        plan: DemandPlan,
        correlation: &Correlation,
    ) -> crate::Result<DemandOutcome> {
        let mut outcome = DemandOutcome::default();
        if plan.retire > 0 {
            outcome.retired = self
                .controller
                .retire(correlation, Some(&queue.name), plan.retire)
                .await;
        }
        if plan.unretire > 0 {
            outcome.unretired = self
                .controller
                .unretire(correlation, Some(&queue.name), plan.unretire)
                .await;
        }
        if plan.submit > 0 {
            outcome.submitted = submit_pilots(
                &self.serializer,
                &self.commands,
                &queue.submit_file,
                plan.submit,
                &queue.submit_args(),
            )
            .await?;
        }
        Ok(outcome)
    }
}
