use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use crate::batch::condor::CondorCommands;
use crate::batch::records::FieldNames;
use crate::batch::xml::is_xml_response;
use crate::common::command::{CommandLine, CommandRunner};
use crate::common::error::FactoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Jobs in the queue of the batch system.
    Jobs,
    /// Execution slots reported to the batch system.
    Slots,
}

pub type QueryFuture = Pin<Box<dyn Future<Output = crate::Result<String>> + Send>>;

/// Invokes the query commands of a batch system and returns their raw output.
pub trait BatchQueryClient: Send + Sync {
    /// Returns the complete output of the query.
    /// `extra_args` are appended to the query to support site-specific constraints.
    fn query(&self, kind: QueryKind, extra_args: &[String]) -> QueryFuture;
}

pub struct CondorQueryClient {
    runner: Arc<dyn CommandRunner>,
    commands: CondorCommands,
    fields: FieldNames,
}

impl CondorQueryClient {
    pub fn new(runner: Arc<dyn CommandRunner>, commands: CondorCommands, fields: FieldNames) -> Self {
        Self {
            runner,
            commands,
            fields,
        }
    }
}

impl BatchQueryClient for CondorQueryClient {
    fn query(&self, kind: QueryKind, extra_args: &[String]) -> QueryFuture {
        let command = match kind {
            QueryKind::Jobs => self.commands.query_jobs(&self.fields, extra_args),
            QueryKind::Slots => self.commands.query_slots(&self.fields, extra_args),
        };
        run_query(self.runner.clone(), command)
    }
}

/// Runs a query command and checks its output.
///
/// The query tools sometimes exit with a non-zero code even though they print a valid response,
/// so an output that looks like XML is accepted regardless of the exit code.
pub fn run_query(runner: Arc<dyn CommandRunner>, command: CommandLine) -> QueryFuture {
    Box::pin(async move {
        let description = command.to_string();
        let start = Instant::now();
        let output = runner
            .run(&command)
            .await
            .map_err(|error| FactoryError::QueryFailed {
                command: description.clone(),
                reason: format!("{error:?}"),
            })?;
        log::debug!(
            "Query `{description}` took {:.3}s",
            start.elapsed().as_secs_f64()
        );

        if is_xml_response(&output.stdout) {
            if !output.success() {
                log::warn!(
                    "Query `{description}` exited with code {}, but its output is usable: {}",
                    output.exit_code,
                    output.stderr.trim()
                );
            }
            return Ok(output.stdout);
        }
        let output = output.check().map_err(|error| FactoryError::QueryFailed {
            command: description,
            reason: format!("{error:?}"),
        })?;
        Ok(output.stdout)
    })
}

#[cfg(test)]
mod tests {
    use super::{BatchQueryClient, CondorQueryClient, QueryKind};
    use crate::batch::condor::CondorCommands;
    use crate::batch::records::FieldNames;
    use crate::common::command::CommandOutput;
    use crate::common::error::FactoryError;
    use crate::tests::utils::{output, ScriptedRunner};
    use std::sync::Arc;

    fn client(runner: &Arc<ScriptedRunner>) -> CondorQueryClient {
        CondorQueryClient::new(
            runner.clone(),
            CondorCommands::default(),
            FieldNames::default(),
        )
    }

    #[tokio::test]
    async fn accept_xml_with_nonzero_exit() {
        let runner = ScriptedRunner::new(|_| {
            Ok(CommandOutput {
                exit_code: 1,
                stdout: "<?xml version=\"1.0\"?><classads></classads>".to_string(),
                stderr: "partial failure".to_string(),
            })
        });
        let output = client(&runner).query(QueryKind::Jobs, &[]).await.unwrap();
        assert!(output.starts_with("<?xml"));
    }

    #[tokio::test]
    async fn reject_garbage_with_nonzero_exit() {
        let runner = ScriptedRunner::new(|_| {
            Ok(CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "Failed to connect to schedd".to_string(),
            })
        });
        let error = client(&runner)
            .query(QueryKind::Slots, &[])
            .await
            .unwrap_err();
        assert!(matches!(error, FactoryError::QueryFailed { .. }));
    }

    #[tokio::test]
    async fn runner_error_is_query_failure() {
        let runner = ScriptedRunner::new(|_| Err(anyhow::anyhow!("did not finish within 1s")));
        let error = client(&runner)
            .query(QueryKind::Jobs, &[])
            .await
            .unwrap_err();
        assert!(error.is_cycle_local());
    }

    #[tokio::test]
    async fn extra_arguments_are_appended() {
        let runner = ScriptedRunner::new(|_| Ok(output("<?xml version=\"1.0\"?><classads/>")));
        client(&runner)
            .query(QueryKind::Slots, &["-pool".to_string(), "cm1".to_string()])
            .await
            .unwrap();
        let invocations = runner.invocations();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].program, "condor_status");
        assert!(invocations[0].args.ends_with(&["-pool".to_string(), "cm1".to_string()]));
    }
}
