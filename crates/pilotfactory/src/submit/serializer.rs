use parking_lot::Mutex;
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::HostInstanceId;
use crate::batch::records::JobId;
use crate::common::command::{CommandLine, CommandRunner};
use crate::common::error::FactoryError;
use crate::common::rpc::{
    ResponseToken, RpcReceiver, RpcSender, initiate_request, make_rpc_queue, wait_for_response,
};

/// What a mutating command does to the batch system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RequestKind {
    Submit { spec_file: PathBuf, count: u64 },
    Retire { host: HostInstanceId },
    Unretire { host: HostInstanceId },
    Remove { job: JobId },
}

impl Display for RequestKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestKind::Submit { spec_file, count } => {
                write!(f, "submission of {count} job(s) from {}", spec_file.display())
            }
            RequestKind::Retire { host } => write!(f, "retirement of host {host}"),
            RequestKind::Unretire { host } => write!(f, "unretirement of host {host}"),
            RequestKind::Remove { job } => write!(f, "removal of job {job}"),
        }
    }
}

/// A batch-mutating command. The result fields are filled by the serializer once the command
/// has finished.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionRequest {
    pub kind: RequestKind,
    pub command: CommandLine,
    /// `None` until the command has been executed.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl SubmissionRequest {
    pub fn new(kind: RequestKind, command: CommandLine) -> Self {
        Self {
            kind,
            command,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Short description of a failed request, for logs and error reports.
    pub fn failure_reason(&self) -> String {
        match self.exit_code {
            Some(code) => format!("`{}` exited with code {code}: {}", self.command, self.stderr.trim()),
            None => format!("`{}` was not executed", self.command),
        }
    }
}

type SerializerMessage = (SubmissionRequest, ResponseToken<SubmissionRequest>);

struct Worker {
    sender: RpcSender<SerializerMessage>,
    handle: JoinHandle<()>,
}

/// Executes all batch-mutating commands of the process one at a time, in the order in which
/// they were requested.
///
/// There must be exactly one serializer per process; it is shared by reference counting.
pub struct SubmissionSerializer {
    runner: Arc<dyn CommandRunner>,
    poll_interval: Duration,
    worker: Mutex<Option<Worker>>,
}

impl SubmissionSerializer {
    /// `poll_interval` is how often a waiting producer wakes up to report that its request is
    /// still pending.
    pub fn new(runner: Arc<dyn CommandRunner>, poll_interval: Duration) -> Self {
        Self {
            runner,
            poll_interval,
            worker: Mutex::new(None),
        }
    }

    /// Starts the background worker. Returns `false` if it was already running.
    pub fn start(&self) -> bool {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return false;
        }
        *worker = Some(self.spawn_worker());
        true
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Lets the worker finish all queued requests and waits until it ends.
    pub async fn stop(&self) {
        let worker = self.worker.lock().take();
        if let Some(Worker { sender, handle }) = worker {
            drop(sender);
            if let Err(error) = handle.await {
                log::error!("Submission serializer worker failed: {error:?}");
            }
        }
    }

    /// Enqueues the request and waits until it has been executed.
    ///
    /// The worker is started if it is not running. A failed command is not an error here, its
    /// exit code is available in the returned request.
    pub async fn execute(&self, request: SubmissionRequest) -> crate::Result<SubmissionRequest> {
        let description = request.kind.to_string();
        let receiver = {
            let sender = self.sender();
            initiate_request(|token| sender.send((request, token)))
        };
        wait_for_response(receiver, self.poll_interval, &description)
            .await
            .ok_or_else(|| {
                FactoryError::GenericError(format!(
                    "Submission serializer stopped before completing {description}"
                ))
            })
    }

    fn sender(&self) -> RpcSender<SerializerMessage> {
        let mut worker = self.worker.lock();
        worker.get_or_insert_with(|| self.spawn_worker()).sender.clone()
    }

    fn spawn_worker(&self) -> Worker {
        let (sender, receiver) = make_rpc_queue();
        let handle = tokio::spawn(serializer_process(self.runner.clone(), receiver));
        Worker { sender, handle }
    }
}

async fn serializer_process(
    runner: Arc<dyn CommandRunner>,
    mut receiver: RpcReceiver<SerializerMessage>,
) {
    log::debug!("Submission serializer started");
    while let Some((mut request, token)) = receiver.recv().await {
        log::debug!("Executing {}: `{}`", request.kind, request.command);
        let start = Instant::now();
        match runner.run(&request.command).await {
            Ok(output) => {
                request.exit_code = Some(output.exit_code);
                request.stdout = output.stdout;
                request.stderr = output.stderr;
            }
            Err(error) => {
                request.exit_code = Some(-1);
                request.stderr = format!("{error:?}");
            }
        }
        if request.succeeded() {
            log::debug!(
                "{} finished in {:.3}s",
                request.kind,
                start.elapsed().as_secs_f64()
            );
        } else {
            log::warn!("{} failed: {}", request.kind, request.failure_reason());
        }
        token.respond(request);
    }
    log::debug!("Submission serializer stopped");
}
