//! Retirement, un-retirement and reaping of execution hosts.
//!
//! The controller keeps no state between calls, every decision is made from the correlation of
//! the latest published snapshot.
use itertools::Itertools;
use serde::Serialize;
use std::sync::Arc;

use crate::batch::condor::{CondorCommands, over_ssh};
use crate::common::command::CommandLine;
use crate::common::config::{ControlTransport, RetirementConfig, RetirementMode};
use crate::common::error::FactoryError;
use crate::hosts::{Correlation, ExecuteHost, HostStatus, JobWithHost};
use crate::stats::{Category, StatusMapping};
use crate::submit::{RequestKind, SubmissionRequest, SubmissionSerializer};

/// Outcome of a batch of control commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ControlReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl ControlReport {
    fn record(&mut self, result: crate::Result<()>) {
        self.attempted += 1;
        match result {
            Ok(()) => self.succeeded += 1,
            Err(error) => {
                log::warn!("{error}");
                self.failed += 1;
            }
        }
    }
}

/// Picks the hosts that should be retired first: hosts without work, then busy hosts, each
/// group in the order of the snapshot. Hosts that are already retiring or retired are skipped.
pub fn retirement_candidates<'a>(
    correlation: &'a Correlation,
    queue: Option<&str>,
) -> Vec<JobWithHost<'a>> {
    let (idle, busy): (Vec<_>, Vec<_>) = correlation
        .jobs_with_hosts()
        .filter(|item| queue.is_none_or(|queue| item.job.queue_name == queue))
        .filter(|item| {
            let state = item.host.lifecycle_state;
            state.is_idle_like() || state == HostStatus::Busy
        })
        .unique_by(|item| item.host.host_instance_id.clone())
        .partition(|item| item.host.lifecycle_state.is_idle_like());
    idle.into_iter().chain(busy).collect()
}

pub struct RetirementController {
    serializer: Arc<SubmissionSerializer>,
    commands: CondorCommands,
    config: RetirementConfig,
}

impl RetirementController {
    pub fn new(
        serializer: Arc<SubmissionSerializer>,
        commands: CondorCommands,
        config: RetirementConfig,
    ) -> Self {
        Self {
            serializer,
            commands,
            config,
        }
    }

    /// Retires up to `count` hosts of the given queue (or of all queues).
    pub async fn retire(
        &self,
        correlation: &Correlation,
        queue: Option<&str>,
        count: u64,
    ) -> ControlReport {
        let mut report = ControlReport::default();
        for JobWithHost { job, host } in retirement_candidates(correlation, queue)
            .into_iter()
            .take(count as usize)
        {
            let host_id = host.host_instance_id.clone();
            let result = match self.config.mode {
                RetirementMode::Peaceful => match self.control_command(host, |c, m| c.drain(m)) {
                    Ok(command) => {
                        self.run(RequestKind::Retire { host: host_id }, command, host)
                            .await
                    }
                    Err(error) => Err(error),
                },
                RetirementMode::Hard => {
                    self.run(
                        RequestKind::Remove { job: job.job_id },
                        self.commands.remove(job.job_id),
                        host,
                    )
                    .await
                }
            };
            report.record(result);
        }
        if report.attempted > 0 {
            log::info!(
                "Retired {} of {} host(s), {count} requested",
                report.succeeded,
                report.attempted
            );
        }
        report
    }

    /// Cancels the retirement of up to `count` retiring hosts of the given queue (or of all
    /// queues).
    pub async fn unretire(
        &self,
        correlation: &Correlation,
        queue: Option<&str>,
        count: u64,
    ) -> ControlReport {
        let mut report = ControlReport::default();
        let retiring = correlation
            .jobs_with_hosts()
            .filter(|item| queue.is_none_or(|queue| item.job.queue_name == queue))
            .filter(|item| item.host.lifecycle_state == HostStatus::Retiring)
            .unique_by(|item| item.host.host_instance_id.clone())
            .take(count as usize);
        for JobWithHost { host, .. } in retiring {
            let result = match self.control_command(host, |c, m| c.resume(m)) {
                Ok(command) => {
                    self.run(
                        RequestKind::Unretire {
                            host: host.host_instance_id.clone(),
                        },
                        command,
                        host,
                    )
                    .await
                }
                Err(error) => Err(error),
            };
            report.record(result);
        }
        if report.attempted > 0 {
            log::info!(
                "Unretired {} of {} host(s)",
                report.succeeded,
                report.attempted
            );
        }
        report
    }

    /// Removes the jobs whose host has already retired. Jobs that are already done are left
    /// alone until they leave the queue.
    pub async fn cleanup(
        &self,
        correlation: &Correlation,
        mapping: &StatusMapping,
    ) -> ControlReport {
        let mut report = ControlReport::default();
        let retired = correlation
            .jobs_with_hosts()
            .filter(|item| item.host.lifecycle_state == HostStatus::Retired)
            .filter(|item| mapping.map(&item.job.status_code).primary != Category::Done);
        for JobWithHost { job, host } in retired {
            let result = self
                .run(
                    RequestKind::Remove { job: job.job_id },
                    self.commands.remove(job.job_id),
                    host,
                )
                .await;
            report.record(result);
        }
        if report.attempted > 0 {
            log::info!(
                "Removed {} of {} job(s) of retired hosts",
                report.succeeded,
                report.attempted
            );
        }
        report
    }

    /// Builds a host control command, either addressed to the machine name or executed on the
    /// host itself through a remote shell.
    fn control_command<F>(&self, host: &ExecuteHost, build: F) -> crate::Result<CommandLine>
    where
        F: Fn(&CondorCommands, Option<&str>) -> CommandLine,
    {
        match self.config.control {
            ControlTransport::Local => Ok(build(&self.commands, Some(&host.machine_name))),
            ControlTransport::Ssh => {
                let address = host.public_address.as_deref().ok_or_else(|| {
                    FactoryError::ControlCommandFailed {
                        host: host.host_instance_id.clone(),
                        reason: "the host has no known public address".to_string(),
                    }
                })?;
                Ok(over_ssh(
                    &self.config.ssh_program,
                    &self.config.ssh_args,
                    self.config.ssh_user.as_deref(),
                    address,
                    build(&self.commands, None),
                ))
            }
        }
    }

    async fn run(
        &self,
        kind: RequestKind,
        command: CommandLine,
        host: &ExecuteHost,
    ) -> crate::Result<()> {
        let request = self
            .serializer
            .execute(SubmissionRequest::new(kind, command))
            .await?;
        if request.succeeded() {
            Ok(())
        } else {
            Err(FactoryError::ControlCommandFailed {
                host: host.host_instance_id.clone(),
                reason: request.failure_reason(),
            })
        }
    }
}
