use log::LevelFilter;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::common::command::{CommandFuture, CommandLine, CommandOutput, CommandRunner};

pub fn init_test_logging() {
    let _ = env_logger::Builder::default()
        .filter(None, LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

/// Successful output with the given stdout.
pub fn output(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn failed_output(exit_code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

type Responder = dyn Fn(&CommandLine) -> anyhow::Result<CommandOutput> + Send + Sync;

#[derive(Debug, Clone)]
pub struct Invocation {
    pub command: CommandLine,
    pub started: Instant,
    pub finished: Instant,
}

struct RunnerState {
    respond: Box<Responder>,
    delay: Duration,
    invocations: Mutex<Vec<Invocation>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

/// Command runner that answers every command with a scripted response and records what it was
/// asked to run.
pub struct ScriptedRunner {
    state: Arc<RunnerState>,
}

impl ScriptedRunner {
    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&CommandLine) -> anyhow::Result<CommandOutput> + Send + Sync + 'static,
    {
        Self::with_delay(respond, Duration::ZERO)
    }

    /// Every command will take at least `delay` to finish.
    pub fn with_delay<F>(respond: F, delay: Duration) -> Arc<Self>
    where
        F: Fn(&CommandLine) -> anyhow::Result<CommandOutput> + Send + Sync + 'static,
    {
        Arc::new(Self {
            state: Arc::new(RunnerState {
                respond: Box::new(respond),
                delay,
                invocations: Default::default(),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
            }),
        })
    }

    pub fn invocations(&self) -> Vec<CommandLine> {
        self.state
            .invocations
            .lock()
            .iter()
            .map(|invocation| invocation.command.clone())
            .collect()
    }

    pub fn timed_invocations(&self) -> Vec<Invocation> {
        self.state.invocations.lock().clone()
    }

    /// Command lines of all invocations of `program`, joined into strings.
    pub fn invocations_of(&self, program: &str) -> Vec<String> {
        self.invocations()
            .into_iter()
            .filter(|command| command.program == program)
            .map(|command| command.to_string())
            .collect()
    }

    /// Highest number of commands that were running at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.state.max_running.load(Ordering::SeqCst)
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &CommandLine) -> CommandFuture {
        let state = self.state.clone();
        let command = command.clone();
        Box::pin(async move {
            let started = Instant::now();
            let running = state.running.fetch_add(1, Ordering::SeqCst) + 1;
            state.max_running.fetch_max(running, Ordering::SeqCst);
            if !state.delay.is_zero() {
                tokio::time::sleep(state.delay).await;
            }
            let result = (state.respond)(&command);
            state.running.fetch_sub(1, Ordering::SeqCst);
            state.invocations.lock().push(Invocation {
                command,
                started,
                finished: Instant::now(),
            });
            result
        })
    }
}

/// Builds a ClassAd XML document out of a list of ads.
pub fn classads(ads: &[&[(&str, &str)]]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\"?>\n<!DOCTYPE classads SYSTEM \"classads.dtd\">\n<classads>\n",
    );
    for ad in ads {
        xml.push_str("<c>\n");
        for (name, value) in ad.iter() {
            xml.push_str(&format!("    <a n=\"{name}\"><s>{value}</s></a>\n"));
        }
        xml.push_str("</c>\n");
    }
    xml.push_str("</classads>\n");
    xml
}

pub fn job_ad<'a>(
    queue: &'a str,
    cluster: &'a str,
    status: &'a str,
    instance: Option<&'a str>,
) -> Vec<(&'a str, &'a str)> {
    let mut ad = vec![
        ("MATCH_APF_QUEUE", queue),
        ("ClusterId", cluster),
        ("ProcId", "0"),
        ("JobStatus", status),
    ];
    if let Some(instance) = instance {
        ad.push(("EC2InstanceName", instance));
        ad.push(("EC2RemoteVirtualMachineName", instance));
    }
    ad
}

pub fn slot_ad<'a>(instance: &'a str, machine: &'a str, activity: &'a str) -> Vec<(&'a str, &'a str)> {
    vec![
        ("EC2InstanceID", instance),
        ("Machine", machine),
        ("State", "Claimed"),
        ("Activity", activity),
    ]
}
