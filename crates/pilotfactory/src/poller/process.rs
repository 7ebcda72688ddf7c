use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::batch::query::{BatchQueryClient, QueryKind};
use crate::batch::records::FieldNames;
use crate::batch::xml::parse_records;
use crate::batch::{normalize_jobs, normalize_slots};
use crate::common::config::QueueConfig;
use crate::demand::{DemandCaps, DemandOutcome, DemandScheduler, DemandSource, plan};
use crate::hosts::{HostRegistry, correlate};
use crate::poller::snapshot::{BatchSnapshot, CycleReport, SnapshotCell, new_snapshot};
use crate::retire::RetirementController;
use crate::stats::{Category, StatusMapping, aggregate_jobs};

pub type ShutdownReceiver = watch::Receiver<bool>;

/// Queries the batch system and turns the responses into snapshots.
///
/// The poller remembers the hosts seen in the previous cycle, so that hosts that stop reporting
/// slots are recognized as retired.
pub struct BatchPoller {
    client: Arc<dyn BatchQueryClient>,
    fields: FieldNames,
    mapping: StatusMapping,
    job_query_args: Vec<String>,
    slot_query_args: Vec<String>,
    unregistered_grace: Option<Duration>,
    registry: HostRegistry,
}

impl BatchPoller {
    pub fn new(
        client: Arc<dyn BatchQueryClient>,
        fields: FieldNames,
        mapping: StatusMapping,
        job_query_args: Vec<String>,
        slot_query_args: Vec<String>,
    ) -> Self {
        Self {
            client,
            fields,
            mapping,
            job_query_args,
            slot_query_args,
            unregistered_grace: None,
            registry: HostRegistry::default(),
        }
    }

    /// Hosts of running jobs that have not reported any slot for longer than `grace` are
    /// treated as retired.
    pub fn with_unregistered_grace(mut self, grace: Option<Duration>) -> Self {
        self.unregistered_grace = grace;
        self
    }

    pub fn mapping(&self) -> &StatusMapping {
        &self.mapping
    }

    /// Runs one refresh cycle. On failure, the remembered hosts are left untouched.
    pub async fn refresh(&mut self) -> crate::Result<BatchSnapshot> {
        let (job_output, job_query_duration) =
            timed(self.client.query(QueryKind::Jobs, &self.job_query_args)).await;
        let job_output = job_output?;
        let (slot_output, slot_query_duration) =
            timed(self.client.query(QueryKind::Slots, &self.slot_query_args)).await;
        let slot_output = slot_output?;

        let jobs = normalize_jobs(parse_records(&job_output)?, &self.fields);
        let slots = normalize_slots(parse_records(&slot_output)?, &self.fields);

        let mut stats = aggregate_jobs(&jobs.records, &self.mapping);
        let mut correlation = correlate(jobs.records, slots.records, &self.registry);
        if let Some(grace) = self.unregistered_grace {
            correlation.retire_unregistered(&self.mapping, grace, Utc::now());
        }
        correlation.add_host_flags(&mut stats);
        self.registry = correlation.registry();

        let report = CycleReport {
            jobs_ignored: jobs.ignored,
            jobs_invalid: jobs.invalid,
            slots_ignored: slots.ignored,
            slots_invalid: slots.invalid,
            correlation: correlation.report.clone(),
            job_query_duration,
            slot_query_duration,
        };
        log::debug!("Batch refresh finished: {report:?}");
        Ok(new_snapshot(stats, correlation, report))
    }
}

async fn timed<F: std::future::Future>(future: F) -> (F::Output, Duration) {
    let start = Instant::now();
    let output = future.await;
    (output, start.elapsed())
}

/// Periodically refreshes the batch state, publishes it and reaps jobs of retired hosts.
///
/// A failed cycle keeps the previous snapshot published.
pub async fn status_poller_process(
    mut poller: BatchPoller,
    cell: Arc<SnapshotCell>,
    controller: Arc<RetirementController>,
    poll_interval: Duration,
    mut shutdown: ShutdownReceiver,
) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match poller.refresh().await {
                    Ok(snapshot) => {
                        let snapshot = cell.publish(snapshot);
                        controller.cleanup(&snapshot.correlation, poller.mapping()).await;
                    }
                    Err(error) => {
                        log::error!("Batch refresh failed, keeping the previous snapshot: {error}");
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    log::debug!("Ending batch status poller");
}

/// Keeps the number of pilots of one queue in line with its demand.
pub struct QueueAgent {
    config: QueueConfig,
    source: DemandSource,
    caps: DemandCaps,
    cell: Arc<SnapshotCell>,
    scheduler: Arc<DemandScheduler>,
}

impl QueueAgent {
    pub fn new(
        config: QueueConfig,
        cell: Arc<SnapshotCell>,
        scheduler: Arc<DemandScheduler>,
    ) -> crate::Result<Self> {
        Ok(Self {
            source: DemandSource::from_config(&config)?,
            caps: DemandCaps::from(&config),
            config,
            cell,
            scheduler,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Runs one demand cycle. Returns `Ok(None)` when there is no fresh snapshot to decide from.
    pub async fn run_cycle(&self) -> crate::Result<Option<DemandOutcome>> {
        let Some(snapshot) = self.cell.fresh(self.config.max_staleness) else {
            log::debug!(
                "Queue {}: no fresh batch snapshot, retrying next cycle",
                self.config.name
            );
            return Ok(None);
        };
        let demand = self.source.read()?;
        let stats = snapshot
            .stats
            .get(&self.config.name)
            .cloned()
            .unwrap_or_default();
        let plan = plan(
            demand,
            stats.get(Category::Retiring),
            stats.get(Category::Pending),
            &self.caps,
        );
        if plan.is_empty() {
            return Ok(Some(DemandOutcome::default()));
        }
        log::info!(
            "Queue {}: demand {demand}, unretiring {}, submitting {}, retiring {}",
            self.config.name,
            plan.unretire,
            plan.submit,
            plan.retire
        );
        self.scheduler
            .apply(&self.config, plan, &snapshot.correlation)
            .await
            .map(Some)
    }
}

pub async fn queue_agent_process(agent: QueueAgent, mut shutdown: ShutdownReceiver) {
    let mut interval = tokio::time::interval(agent.config.cycle_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(error) = agent.run_cycle().await {
                    log::error!("Queue {}: demand cycle failed: {error}", agent.name());
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    log::debug!("Ending agent of queue {}", agent.name());
}
