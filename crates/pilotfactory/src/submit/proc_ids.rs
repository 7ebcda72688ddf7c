use nom::IResult;
use nom::bytes::complete::tag;
use nom::character::complete::{char, space0, space1, u64 as p_u64};
use nom::combinator::map;
use nom::sequence::{delimited, separated_pair, tuple};
use std::path::Path;

use crate::batch::condor::CondorCommands;
use crate::batch::records::JobId;
use crate::common::error::FactoryError;
use crate::submit::serializer::{RequestKind, SubmissionRequest, SubmissionSerializer};

/// Parses the `** Proc <cluster>.<proc>:` header that precedes every job ad printed by a
/// verbose submission.
fn p_proc_header(input: &str) -> IResult<&str, JobId> {
    map(
        delimited(
            tuple((space0, tag("**"), space1, tag("Proc"), space1)),
            separated_pair(p_u64, char('.'), p_u64),
            char(':'),
        ),
        |(cluster, proc)| JobId::new(cluster, proc),
    )(input)
}

/// Extracts the ids of the submitted jobs from the output of a verbose submission.
pub fn parse_submitted_jobs(stdout: &str) -> Vec<JobId> {
    stdout
        .lines()
        .filter_map(|line| p_proc_header(line).ok().map(|(_, job_id)| job_id))
        .collect()
}

/// Submits `count` pilots of a job specification through the serializer and returns the ids of
/// the new jobs.
///
/// A non-zero exit code is reported as [`FactoryError::SubmissionFailed`] and is not retried.
pub async fn submit_pilots(
    serializer: &SubmissionSerializer,
    commands: &CondorCommands,
    spec_file: &Path,
    count: u64,
    extra_args: &[String],
) -> crate::Result<Vec<JobId>> {
    let request = SubmissionRequest::new(
        RequestKind::Submit {
            spec_file: spec_file.to_path_buf(),
            count,
        },
        commands.submit(spec_file, count, extra_args),
    );
    let request = serializer.execute(request).await?;
    if !request.succeeded() {
        return Err(FactoryError::SubmissionFailed {
            exit_code: request.exit_code.unwrap_or(-1),
            stderr: request.stderr.trim().to_string(),
        });
    }

    let job_ids = parse_submitted_jobs(&request.stdout);
    if job_ids.len() as u64 != count {
        log::warn!(
            "Submission of {count} job(s) from {} reported {} job id(s)",
            spec_file.display(),
            job_ids.len()
        );
    }
    log::info!(
        "Submitted {} job(s) from {}",
        job_ids.len(),
        spec_file.display()
    );
    Ok(job_ids)
}

#[cfg(test)]
mod tests {
    use super::{parse_submitted_jobs, submit_pilots};
    use crate::batch::condor::CondorCommands;
    use crate::batch::records::JobId;
    use crate::common::error::FactoryError;
    use crate::submit::serializer::SubmissionSerializer;
    use crate::tests::utils::{ScriptedRunner, failed_output, output};
    use std::path::Path;
    use std::time::Duration;

    const VERBOSE_OUTPUT: &str = "Submitting job(s)..
** Proc 1234.0:
Args = \"-q Q1\"
ClusterId = 1234
ProcId = 0

** Proc 1234.1:
Args = \"-q Q1\"
ClusterId = 1234
ProcId = 1

2 job(s) submitted to cluster 1234.
";

    #[test]
    fn parse_verbose_output() {
        assert_eq!(
            parse_submitted_jobs(VERBOSE_OUTPUT),
            vec![JobId::new(1234, 0), JobId::new(1234, 1)]
        );
    }

    #[test]
    fn ignore_unrelated_lines() {
        assert!(parse_submitted_jobs("** Proc abc:\n*** Proc 1.0:\nProc 1.0:\n").is_empty());
        assert!(parse_submitted_jobs("").is_empty());
    }

    #[tokio::test]
    async fn submit_returns_job_ids() {
        let runner = ScriptedRunner::new(|_| Ok(output(VERBOSE_OUTPUT)));
        let serializer = SubmissionSerializer::new(runner.clone(), Duration::from_millis(5));
        let ids = submit_pilots(
            &serializer,
            &CondorCommands::default(),
            Path::new("pilot.sub"),
            2,
            &[],
        )
        .await
        .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(
            runner.invocations_of("condor_submit"),
            vec!["condor_submit -verbose pilot.sub -queue 2"]
        );
    }

    #[tokio::test]
    async fn failed_submission_is_reported() {
        let runner = ScriptedRunner::new(|_| Ok(failed_output(1, "ERROR: Can't open \"pilot.sub\"\n")));
        let serializer = SubmissionSerializer::new(runner.clone(), Duration::from_millis(5));
        let error = submit_pilots(
            &serializer,
            &CondorCommands::default(),
            Path::new("pilot.sub"),
            3,
            &[],
        )
        .await
        .unwrap_err();
        match error {
            FactoryError::SubmissionFailed { exit_code, stderr } => {
                assert_eq!(exit_code, 1);
                assert_eq!(stderr, "ERROR: Can't open \"pilot.sub\"");
            }
            error => panic!("Unexpected error {error:?}"),
        }
        assert_eq!(runner.invocations().len(), 1);
    }
}
