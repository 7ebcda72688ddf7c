use anyhow::Context;
use bstr::ByteSlice;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::process::Output;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// A fully resolved invocation of an external program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl Display for CommandLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Splits a free-form argument string from the configuration into individual arguments.
pub fn split_extra_args(extra: &str) -> Vec<String> {
    extra.split_whitespace().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Fails with a descriptive error if the command did not exit successfully.
    pub fn check(self) -> anyhow::Result<Self> {
        if !self.success() {
            return Err(anyhow::anyhow!(
                "Exit code: {}\nStderr: {}\nStdout: {}",
                self.exit_code,
                self.stderr.trim(),
                self.stdout.trim()
            ));
        }
        Ok(self)
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout.to_str_lossy().into_owned(),
            stderr: output.stderr.to_str_lossy().into_owned(),
        }
    }
}

pub type CommandFuture = Pin<Box<dyn Future<Output = anyhow::Result<CommandOutput>> + Send>>;

/// Executes external commands on behalf of the engine.
///
/// A non-zero exit code is not an error at this level, it is reported in the returned
/// [`CommandOutput`]. Errors are reserved for commands that could not be started or that did
/// not finish in time.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &CommandLine) -> CommandFuture;
}

/// Runs commands as local processes.
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, command_line: &CommandLine) -> CommandFuture {
        let mut command = Command::new(&command_line.program);
        command.args(&command_line.args);
        command.kill_on_drop(true);
        let timeout = self.timeout;
        let description = command_line.to_string();

        Box::pin(async move {
            log::debug!("Running command `{description}`");
            let start = Instant::now();
            let output = match timeout {
                Some(timeout) => tokio::time::timeout(timeout, command.output())
                    .await
                    .map_err(|_| {
                        anyhow::anyhow!(
                            "`{description}` did not finish within {}",
                            humantime::format_duration(timeout)
                        )
                    })?,
                None => command.output().await,
            }
            .with_context(|| format!("`{description}` start failed"))?;
            log::debug!(
                "Command `{description}` finished in {:.3}s with {}",
                start.elapsed().as_secs_f64(),
                output.status
            );
            Ok(output.into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{split_extra_args, CommandLine, CommandOutput, CommandRunner, ProcessRunner};
    use std::time::Duration;

    #[test]
    fn display_command_line() {
        let command = CommandLine::new("condor_q").arg("-xml").args(["-global"]);
        assert_eq!(command.to_string(), "condor_q -xml -global");
    }

    #[test]
    fn split_extra_arguments() {
        assert_eq!(
            split_extra_args("  -pool  cm.example.org -name schedd "),
            vec!["-pool", "cm.example.org", "-name", "schedd"]
        );
        assert!(split_extra_args("").is_empty());
    }

    #[test]
    fn check_failed_output() {
        let output = CommandOutput {
            exit_code: 1,
            stdout: "out".to_string(),
            stderr: "denied\n".to_string(),
        };
        let error = output.check().unwrap_err().to_string();
        assert!(error.contains("Exit code: 1"));
        assert!(error.contains("Stderr: denied"));
    }

    #[tokio::test]
    async fn run_local_process() {
        let runner = ProcessRunner::new(None);
        let output = runner
            .run(&CommandLine::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]))
            .await
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[tokio::test]
    async fn process_timeout() {
        let runner = ProcessRunner::new(Some(Duration::from_millis(50)));
        let error = runner
            .run(&CommandLine::new("sleep").arg("5"))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("did not finish"));
    }

    #[tokio::test]
    async fn missing_program() {
        let runner = ProcessRunner::new(None);
        assert!(runner
            .run(&CommandLine::new("/nonexistent/condor_q"))
            .await
            .is_err());
    }
}
