//! Wires the components of the factory together and runs them until shutdown.
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

use crate::batch::query::CondorQueryClient;
use crate::common::command::{CommandRunner, ProcessRunner};
use crate::common::config::{FactoryConfig, get_request_poll_interval};
use crate::demand::DemandScheduler;
use crate::poller::{
    BatchPoller, BatchSnapshot, QueueAgent, SnapshotCell, queue_agent_process,
    status_poller_process,
};
use crate::retire::RetirementController;
use crate::submit::SubmissionSerializer;

pub struct Factory {
    config: FactoryConfig,
    runner: Arc<dyn CommandRunner>,
    cell: Arc<SnapshotCell>,
    serializer: Arc<SubmissionSerializer>,
    controller: Arc<RetirementController>,
    scheduler: Arc<DemandScheduler>,
}

impl Factory {
    /// Creates a factory that runs the batch system tools as local processes.
    pub fn new(config: FactoryConfig) -> Self {
        let runner = Arc::new(ProcessRunner::new(Some(config.batch.query_timeout())));
        Self::with_runner(config, runner)
    }

    pub fn with_runner(config: FactoryConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let serializer = Arc::new(SubmissionSerializer::new(
            runner.clone(),
            get_request_poll_interval(),
        ));
        let controller = Arc::new(RetirementController::new(
            serializer.clone(),
            config.batch.condor.clone(),
            config.retirement.clone(),
        ));
        let scheduler = Arc::new(DemandScheduler::new(
            controller.clone(),
            serializer.clone(),
            config.batch.condor.clone(),
        ));
        Self {
            config,
            runner,
            cell: Arc::new(SnapshotCell::default()),
            serializer,
            controller,
            scheduler,
        }
    }

    pub fn snapshots(&self) -> &Arc<SnapshotCell> {
        &self.cell
    }

    fn create_poller(&self) -> crate::Result<BatchPoller> {
        let batch = &self.config.batch;
        let client = CondorQueryClient::new(
            self.runner.clone(),
            batch.condor.clone(),
            batch.fields.clone(),
        );
        Ok(BatchPoller::new(
            Arc::new(client),
            batch.fields.clone(),
            self.config.status_mapping()?,
            batch.job_query_args(),
            batch.slot_query_args(),
        )
        .with_unregistered_grace(batch.unregistered_grace))
    }

    /// Runs a single refresh cycle and publishes its snapshot, without changing anything in the
    /// batch system.
    pub async fn refresh_once(&self) -> crate::Result<Arc<BatchSnapshot>> {
        let snapshot = self.create_poller()?.refresh().await?;
        Ok(self.cell.publish(snapshot))
    }

    /// Runs the status poller and one agent per queue until `shutdown` resolves.
    ///
    /// Running cycles are allowed to finish, the submission serializer is stopped last.
    pub async fn run<F: Future<Output = ()>>(self, shutdown: F) -> crate::Result<()> {
        let agents = self
            .config
            .queues
            .iter()
            .map(|queue| QueueAgent::new(queue.clone(), self.cell.clone(), self.scheduler.clone()))
            .collect::<crate::Result<Vec<_>>>()?;
        let poller = self.create_poller()?;

        self.serializer.start();
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let mut tasks = vec![tokio::spawn(status_poller_process(
            poller,
            self.cell.clone(),
            self.controller.clone(),
            self.config.batch.poll_interval,
            shutdown_receiver.clone(),
        ))];
        for agent in agents {
            log::info!("Starting agent of queue {}", agent.name());
            tasks.push(tokio::spawn(queue_agent_process(
                agent,
                shutdown_receiver.clone(),
            )));
        }

        shutdown.await;
        log::info!("Shutting down the factory");
        if shutdown_sender.send(true).is_err() {
            log::debug!("All factory tasks have already ended");
        }
        for result in join_all(tasks).await {
            if let Err(error) = result {
                log::error!("Factory task failed: {error:?}");
            }
        }
        self.serializer.stop().await;
        log::info!("Factory stopped");
        Ok(())
    }
}
