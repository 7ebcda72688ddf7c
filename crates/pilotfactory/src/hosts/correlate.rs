use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::batch::records::{JobRecord, SlotRecord};
use crate::hosts::status::{HostStatus, derive_host_status};
use crate::stats::{Category, FillMode, StatsByQueue, StatusMapping};
use crate::{HostInstanceId, Map, QueueName, Set};

/// An execution host and the slots it reported in the current cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteHost {
    pub host_instance_id: HostInstanceId,
    pub machine_name: String,
    pub public_address: Option<String>,
    pub slots: Vec<SlotRecord>,
    pub lifecycle_state: HostStatus,
}

/// What is remembered about a host between cycles, so that a host that stops reporting slots
/// can be recognized as retired instead of as not yet registered.
#[derive(Debug, Clone)]
pub struct KnownHost {
    pub machine_name: String,
    pub public_address: Option<String>,
}

pub type HostRegistry = Map<HostInstanceId, KnownHost>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationReport {
    pub hosts_with_slots: usize,
    /// Previously seen hosts that reported no slot in this cycle.
    pub retired_hosts: usize,
    pub attached_jobs: usize,
    /// Jobs whose host has not registered back to the pool yet.
    pub unregistered_jobs: usize,
    /// Hosts reporting slots that no job refers to.
    pub hosts_without_job: usize,
    /// Jobs referring to a host that is already referred to by another job.
    pub shared_host_jobs: usize,
}

/// Jobs of one cycle joined with the execution hosts they started.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Correlation {
    pub jobs: Vec<JobRecord>,
    pub hosts: Map<HostInstanceId, ExecuteHost>,
    pub report: CorrelationReport,
}

/// A job together with the host it runs on.
#[derive(Debug, Clone, Copy)]
pub struct JobWithHost<'a> {
    pub job: &'a JobRecord,
    pub host: &'a ExecuteHost,
}

impl Correlation {
    /// Jobs that are attached to a host, in the order in which they were reported.
    pub fn jobs_with_hosts(&self) -> impl Iterator<Item = JobWithHost<'_>> {
        self.jobs.iter().filter_map(|job| {
            let host = self.hosts.get(job.host_instance_id.as_ref()?)?;
            Some(JobWithHost { job, host })
        })
    }

    pub fn host_of(&self, job: &JobRecord) -> Option<&ExecuteHost> {
        self.hosts.get(job.host_instance_id.as_ref()?)
    }

    /// Hosts to be remembered for the next cycle: every host that is still referred to by a job.
    pub fn registry(&self) -> HostRegistry {
        self.jobs_with_hosts()
            .map(|JobWithHost { host, .. }| {
                (
                    host.host_instance_id.clone(),
                    KnownHost {
                        machine_name: host.machine_name.clone(),
                        public_address: host.public_address.clone(),
                    },
                )
            })
            .collect()
    }

    /// Marks the host of a job as retired when the job has been running for longer than `grace`
    /// and its host has never reported a slot.
    ///
    /// Without this, a host that drained while nobody was watching (or that never joined the
    /// pool) would stay unregistered forever. Returns the number of such hosts.
    pub fn retire_unregistered(
        &mut self,
        mapping: &StatusMapping,
        grace: Duration,
        now: DateTime<Utc>,
    ) -> usize {
        let mut expired: Set<HostInstanceId> = Set::default();
        for job in &self.jobs {
            let Some(host_id) = &job.host_instance_id else {
                continue;
            };
            if self.hosts.contains_key(host_id) || expired.contains(host_id) {
                continue;
            }
            let running_for = job
                .entered_status_time
                .and_then(|entered| (now - entered).to_std().ok());
            if mapping.map(&job.status_code).primary == Category::Running
                && running_for.is_some_and(|age| age > grace)
            {
                log::warn!(
                    "Host {host_id} of job {} has not reported any slot for {}, treating it as retired",
                    job.job_id,
                    humantime::format_duration(grace)
                );
                expired.insert(host_id.clone());
            }
        }

        for job in &self.jobs {
            let Some(host_id) = &job.host_instance_id else {
                continue;
            };
            if !expired.contains(host_id) {
                continue;
            }
            if !self.hosts.contains_key(host_id) {
                self.hosts.insert(
                    host_id.clone(),
                    ExecuteHost {
                        host_instance_id: host_id.clone(),
                        machine_name: host_id.clone(),
                        public_address: job.host_address.clone(),
                        slots: vec![],
                        lifecycle_state: HostStatus::Retired,
                    },
                );
            }
            self.report.unregistered_jobs = self.report.unregistered_jobs.saturating_sub(1);
            self.report.attached_jobs += 1;
        }
        self.report.retired_hosts += expired.len();
        expired.len()
    }

    /// Adds the host-derived `retiring` and `retired` flags to the per-queue statistics.
    pub fn add_host_flags(&self, stats: &mut StatsByQueue) {
        let mut flags: Map<&QueueName, Map<Category, u64>> = Map::default();
        for JobWithHost { job, host } in self.jobs_with_hosts() {
            let category = match host.lifecycle_state {
                HostStatus::Retiring => Category::Retiring,
                HostStatus::Retired => Category::Retired,
                _ => continue,
            };
            *flags
                .entry(&job.queue_name)
                .or_default()
                .entry(category)
                .or_default() += 1;
        }
        for (queue, counts) in flags {
            stats
                .entry(queue.clone())
                .or_default()
                .fill(counts, FillMode::Add);
        }
    }
}

/// Groups the slots of the cycle by host and attaches hosts to jobs.
///
/// `previous` contains the hosts known from the previous cycle. Such a host that reports no slot
/// now is kept with an empty slot list, which makes it retired.
pub fn correlate(
    jobs: Vec<JobRecord>,
    slots: Vec<SlotRecord>,
    previous: &HostRegistry,
) -> Correlation {
    let mut report = CorrelationReport::default();
    let mut grouped: Map<HostInstanceId, Vec<SlotRecord>> = Map::default();
    for slot in slots {
        grouped
            .entry(slot.host_instance_id.clone())
            .or_default()
            .push(slot);
    }

    let mut hosts: Map<HostInstanceId, ExecuteHost> = grouped
        .into_iter()
        .map(|(host_id, slots)| {
            let lifecycle_state = derive_host_status(&host_id, &slots);
            let machine_name = slots[0].machine_name.clone();
            let host = ExecuteHost {
                public_address: previous
                    .get(&host_id)
                    .and_then(|known| known.public_address.clone()),
                host_instance_id: host_id.clone(),
                machine_name,
                slots,
                lifecycle_state,
            };
            (host_id, host)
        })
        .collect();
    report.hosts_with_slots = hosts.len();

    let mut referenced: Map<HostInstanceId, usize> = Map::default();
    for job in &jobs {
        let Some(host_id) = &job.host_instance_id else {
            continue;
        };
        let references = referenced.entry(host_id.clone()).or_default();
        *references += 1;
        if *references > 1 {
            log::warn!(
                "Job {} refers to host {host_id}, which is already used by another job",
                job.job_id
            );
            report.shared_host_jobs += 1;
        }

        if !hosts.contains_key(host_id) {
            if let Some(known) = previous.get(host_id) {
                log::debug!("Host {host_id} of job {} stopped reporting slots", job.job_id);
                report.retired_hosts += 1;
                hosts.insert(
                    host_id.clone(),
                    ExecuteHost {
                        host_instance_id: host_id.clone(),
                        machine_name: known.machine_name.clone(),
                        public_address: known.public_address.clone(),
                        slots: vec![],
                        lifecycle_state: HostStatus::Retired,
                    },
                );
            }
        }
        match hosts.get_mut(host_id) {
            Some(host) => {
                if host.public_address.is_none() {
                    host.public_address = job.host_address.clone();
                }
                report.attached_jobs += 1;
            }
            None => {
                log::debug!(
                    "Host {host_id} of job {} has not registered yet",
                    job.job_id
                );
                report.unregistered_jobs += 1;
            }
        }
    }
    report.hosts_without_job = hosts
        .keys()
        .filter(|host_id| !referenced.contains_key(*host_id))
        .count();

    Correlation {
        jobs,
        hosts,
        report,
    }
}
