use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::batch::records::{FieldNames, JobId};
use crate::common::command::CommandLine;

/// Builds the command lines of the HTCondor tools used by the factory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CondorCommands {
    /// Directory with the HTCondor binaries. If unset, the binaries are looked up in `PATH`.
    pub bin_dir: Option<PathBuf>,
}

impl CondorCommands {
    fn tool(&self, name: &str) -> CommandLine {
        match &self.bin_dir {
            Some(dir) => CommandLine::new(dir.join(name).display().to_string()),
            None => CommandLine::new(name),
        }
    }

    pub fn query_jobs(&self, fields: &FieldNames, extra_args: &[String]) -> CommandLine {
        self.tool("condor_q")
            .arg("-xml")
            .arg("-attributes")
            .arg(fields.job_fields().join(","))
            .args(extra_args.iter().cloned())
    }

    pub fn query_slots(&self, fields: &FieldNames, extra_args: &[String]) -> CommandLine {
        self.tool("condor_status")
            .arg("-xml")
            .arg("-attributes")
            .arg(fields.slot_fields().join(","))
            .args(extra_args.iter().cloned())
    }

    /// Submits `count` jobs of the given job specification file.
    ///
    /// `-queue` has to be the last option of `condor_submit`.
    pub fn submit(&self, spec_file: &Path, count: u64, extra_args: &[String]) -> CommandLine {
        self.tool("condor_submit")
            .arg("-verbose")
            .args(extra_args.iter().cloned())
            .arg(spec_file.display().to_string())
            .arg("-queue")
            .arg(count.to_string())
    }

    /// Tells the execution daemon to stop accepting new work and to exit once idle.
    pub fn drain(&self, machine: Option<&str>) -> CommandLine {
        let command = self
            .tool("condor_off")
            .arg("-peaceful")
            .arg("-daemon")
            .arg("startd");
        with_machine_name(command, machine)
    }

    /// Cancels a pending peaceful shutdown of the execution daemon.
    pub fn resume(&self, machine: Option<&str>) -> CommandLine {
        let command = self.tool("condor_on").arg("-daemon").arg("startd");
        with_machine_name(command, machine)
    }

    pub fn remove(&self, job_id: JobId) -> CommandLine {
        self.tool("condor_rm").arg(job_id.to_string())
    }
}

fn with_machine_name(command: CommandLine, machine: Option<&str>) -> CommandLine {
    match machine {
        Some(machine) => command.arg("-name").arg(machine),
        None => command,
    }
}

/// Wraps a command so that it is executed on a remote host through a remote shell.
pub fn over_ssh(
    ssh_program: &str,
    ssh_args: &[String],
    user: Option<&str>,
    address: &str,
    command: CommandLine,
) -> CommandLine {
    let target = match user {
        Some(user) => format!("{user}@{address}"),
        None => address.to_string(),
    };
    CommandLine::new(ssh_program)
        .args(ssh_args.iter().cloned())
        .arg(target)
        .arg(command.program)
        .args(command.args)
}
