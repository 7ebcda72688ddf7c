use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::batch::condor::CondorCommands;
use crate::batch::records::FieldNames;
use crate::common::command::split_extra_args;
use crate::common::error::FactoryError;
use crate::common::timeutils::{get_duration_from_env, parse_duration};
use crate::stats::StatusMapping;
use crate::stats::mapping::StatusTable;
use crate::{QueueName, Set};

/// Overrides the configured timeout of batch query commands.
pub const QUERY_TIMEOUT_ENV: &str = "PILOTD_QUERY_TIMEOUT_MS";
/// How often a task waiting for the submission serializer reports that it is still waiting.
pub const REQUEST_POLL_INTERVAL_ENV: &str = "PILOTD_REQUEST_POLL_INTERVAL_MS";

pub fn get_request_poll_interval() -> Duration {
    get_duration_from_env(REQUEST_POLL_INTERVAL_ENV).unwrap_or_else(|| Duration::from_secs(5))
}

fn deserialize_human_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let buf = String::deserialize(deserializer)?;
    parse_duration(&buf).map_err(serde::de::Error::custom)
}

fn deserialize_optional_human_duration<'de, D>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_human_duration(deserializer).map(Some)
}

fn default_cycle_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_max_staleness() -> Duration {
    Duration::from_secs(5 * 60)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FactoryConfig {
    #[serde(default)]
    pub batch: BatchConfig,
    /// Replaces the default HTCondor status table when present.
    #[serde(default)]
    pub status_mapping: Option<StatusTable>,
    #[serde(default)]
    pub retirement: RetirementConfig,
    #[serde(default, rename = "queue")]
    pub queues: Vec<QueueConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    #[serde(deserialize_with = "deserialize_human_duration")]
    pub poll_interval: Duration,
    #[serde(deserialize_with = "deserialize_human_duration")]
    pub query_timeout: Duration,
    /// Appended to the job query, e.g. a constraint or a remote schedd.
    pub job_query_args: String,
    /// Appended to the slot query, e.g. a remote pool.
    pub slot_query_args: String,
    pub fields: FieldNames,
    pub condor: CondorCommands,
    /// A running job whose host has not reported any slot for this long is treated as running
    /// on a retired host. Disabled when unset.
    #[serde(deserialize_with = "deserialize_optional_human_duration")]
    pub unregistered_grace: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            query_timeout: Duration::from_secs(5 * 60),
            job_query_args: String::new(),
            slot_query_args: String::new(),
            fields: FieldNames::default(),
            condor: CondorCommands::default(),
            unregistered_grace: None,
        }
    }
}

impl BatchConfig {
    pub fn query_timeout(&self) -> Duration {
        get_duration_from_env(QUERY_TIMEOUT_ENV).unwrap_or(self.query_timeout)
    }

    pub fn job_query_args(&self) -> Vec<String> {
        split_extra_args(&self.job_query_args)
    }

    pub fn slot_query_args(&self) -> Vec<String> {
        split_extra_args(&self.slot_query_args)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetirementMode {
    /// Tell the execution daemon to finish its current work and exit.
    #[default]
    Peaceful,
    /// Remove the pilot job, killing whatever it runs.
    Hard,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlTransport {
    /// Run the control command locally, naming the target machine.
    #[default]
    Local,
    /// Run the control command on the host itself, through a remote shell.
    Ssh,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetirementConfig {
    pub mode: RetirementMode,
    pub control: ControlTransport,
    pub ssh_program: String,
    pub ssh_user: Option<String>,
    pub ssh_args: Vec<String>,
}

impl Default for RetirementConfig {
    fn default() -> Self {
        Self {
            mode: RetirementMode::default(),
            control: ControlTransport::default(),
            ssh_program: "ssh".to_string(),
            ssh_user: None,
            ssh_args: vec![],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    pub name: QueueName,
    /// Job specification file of the pilots of this queue.
    pub submit_file: PathBuf,
    #[serde(default)]
    pub submit_args: String,
    #[serde(
        default = "default_cycle_interval",
        deserialize_with = "deserialize_human_duration"
    )]
    pub cycle_interval: Duration,
    /// Batch snapshots older than this are not used for decisions.
    #[serde(
        default = "default_max_staleness",
        deserialize_with = "deserialize_human_duration"
    )]
    pub max_staleness: Duration,
    /// Constant number of pilots wanted by the queue.
    #[serde(default)]
    pub demand: Option<i64>,
    /// File holding the number of pilots wanted by the queue, re-read every cycle.
    #[serde(default)]
    pub demand_file: Option<PathBuf>,
    #[serde(default)]
    pub max_per_cycle: Option<u64>,
    #[serde(default)]
    pub max_pending: Option<u64>,
}

impl QueueConfig {
    pub fn submit_args(&self) -> Vec<String> {
        split_extra_args(&self.submit_args)
    }
}

impl FactoryConfig {
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|error| {
            FactoryError::ConfigError(format!("Cannot read {}: {error}", path.display()))
        })?;
        content.parse()
    }

    pub fn status_mapping(&self) -> crate::Result<StatusMapping> {
        match &self.status_mapping {
            Some(table) => StatusMapping::from_table(table),
            None => Ok(StatusMapping::condor_default()),
        }
    }

    fn validate(&self) -> crate::Result<()> {
        if self.batch.poll_interval.is_zero() {
            return Err(FactoryError::ConfigError(
                "Poll interval must be larger than zero".to_string(),
            ));
        }
        let mut names = Set::default();
        for queue in &self.queues {
            if !names.insert(queue.name.as_str()) {
                return Err(FactoryError::ConfigError(format!(
                    "Queue `{}` is defined more than once",
                    queue.name
                )));
            }
            if queue.demand.is_some() == queue.demand_file.is_some() {
                return Err(FactoryError::ConfigError(format!(
                    "Queue `{}` must have exactly one of `demand` and `demand_file`",
                    queue.name
                )));
            }
            if queue.cycle_interval.is_zero() {
                return Err(FactoryError::ConfigError(format!(
                    "Cycle interval of queue `{}` must be larger than zero",
                    queue.name
                )));
            }
        }
        self.status_mapping()?;
        Ok(())
    }
}

impl std::str::FromStr for FactoryConfig {
    type Err = FactoryError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let config: FactoryConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}
