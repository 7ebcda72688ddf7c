use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::{HostInstanceId, Map, QueueName};

/// One job or slot entity as returned by a query: lower-cased field name to string value.
pub type RawRecord = Map<String, String>;

/// Names of the (lower-cased) query fields the engine interprets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldNames {
    /// Job attribute holding the logical queue name.
    pub queue: String,
    pub status: String,
    pub entered_status: String,
    pub cluster_id: String,
    pub proc_id: String,
    /// Job attribute holding the identity of the execution host the job started.
    pub job_host_id: String,
    /// Job attribute holding the public address of that host.
    pub job_host_address: String,
    /// Slot attribute holding the identity of the execution host.
    pub slot_host_id: String,
    pub slot_machine: String,
    pub slot_state: String,
    pub slot_activity: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            queue: "match_apf_queue".to_string(),
            status: "jobstatus".to_string(),
            entered_status: "enteredcurrentstatus".to_string(),
            cluster_id: "clusterid".to_string(),
            proc_id: "procid".to_string(),
            job_host_id: "ec2instancename".to_string(),
            job_host_address: "ec2remotevirtualmachinename".to_string(),
            slot_host_id: "ec2instanceid".to_string(),
            slot_machine: "machine".to_string(),
            slot_state: "state".to_string(),
            slot_activity: "activity".to_string(),
        }
    }
}

impl FieldNames {
    pub fn job_fields(&self) -> Vec<&str> {
        vec![
            self.queue.as_str(),
            self.status.as_str(),
            self.entered_status.as_str(),
            self.cluster_id.as_str(),
            self.proc_id.as_str(),
            self.job_host_id.as_str(),
            self.job_host_address.as_str(),
        ]
    }

    pub fn slot_fields(&self) -> Vec<&str> {
        vec![
            self.slot_host_id.as_str(),
            self.slot_machine.as_str(),
            self.slot_state.as_str(),
            self.slot_activity.as_str(),
        ]
    }
}

/// Batch job identifier in the `cluster.proc` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId {
    pub cluster: u64,
    pub proc: u64,
}

impl JobId {
    pub fn new(cluster: u64, proc: u64) -> Self {
        Self { cluster, proc }
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.cluster, self.proc)
    }
}

impl FromStr for JobId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (cluster, proc) = s
            .trim()
            .split_once('.')
            .ok_or_else(|| anyhow::anyhow!("Job id `{s}` is not in the cluster.proc form"))?;
        Ok(Self {
            cluster: cluster.parse()?,
            proc: proc.parse()?,
        })
    }
}

/// Why a raw record could not be turned into a typed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    MissingField(String),
    InvalidField { field: String, value: String },
}

impl Display for RecordError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordError::MissingField(field) => write!(f, "missing field `{field}`"),
            RecordError::InvalidField { field, value } => {
                write!(f, "invalid value `{value}` of field `{field}`")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub queue_name: QueueName,
    pub job_id: JobId,
    pub status_code: String,
    pub host_instance_id: Option<HostInstanceId>,
    pub host_address: Option<String>,
    pub entered_status_time: Option<DateTime<Utc>>,
    /// Attributes not interpreted by the engine.
    pub extra: Map<String, String>,
}

impl JobRecord {
    /// Builds a job record out of a raw record.
    ///
    /// Returns `Ok(None)` for jobs that do not belong to any logical queue, those are not
    /// managed by the factory.
    pub fn from_raw(mut raw: RawRecord, fields: &FieldNames) -> Result<Option<Self>, RecordError> {
        let Some(queue_name) = raw.remove(&fields.queue) else {
            return Ok(None);
        };
        let cluster = take_number(&mut raw, &fields.cluster_id)?;
        let proc = take_number(&mut raw, &fields.proc_id)?;
        let status_code = raw
            .remove(&fields.status)
            .ok_or_else(|| RecordError::MissingField(fields.status.clone()))?;
        let entered_status_time = match raw.remove(&fields.entered_status) {
            Some(value) => Some(
                value
                    .trim()
                    .parse::<i64>()
                    .ok()
                    .and_then(|secs| DateTime::from_timestamp(secs, 0))
                    .ok_or_else(|| RecordError::InvalidField {
                        field: fields.entered_status.clone(),
                        value,
                    })?,
            ),
            None => None,
        };

        Ok(Some(Self {
            queue_name,
            job_id: JobId::new(cluster, proc),
            status_code,
            host_instance_id: raw.remove(&fields.job_host_id),
            host_address: raw.remove(&fields.job_host_address),
            entered_status_time,
            extra: raw,
        }))
    }
}

fn take_number(raw: &mut RawRecord, field: &str) -> Result<u64, RecordError> {
    let value = raw
        .remove(field)
        .ok_or_else(|| RecordError::MissingField(field.to_string()))?;
    value.trim().parse().map_err(|_| RecordError::InvalidField {
        field: field.to_string(),
        value,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    Owner,
    Matched,
    Claimed,
    Unclaimed,
    Preempting,
    Backfill,
    Other(String),
}

impl From<&str> for SlotState {
    fn from(value: &str) -> Self {
        match value.trim() {
            "Owner" => SlotState::Owner,
            "Matched" => SlotState::Matched,
            "Claimed" => SlotState::Claimed,
            "Unclaimed" => SlotState::Unclaimed,
            "Preempting" => SlotState::Preempting,
            "Backfill" => SlotState::Backfill,
            other => SlotState::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotActivity {
    Busy,
    Idle,
    Retiring,
    Suspended,
    Other(String),
}

impl From<&str> for SlotActivity {
    fn from(value: &str) -> Self {
        match value.trim() {
            "Busy" => SlotActivity::Busy,
            "Idle" => SlotActivity::Idle,
            "Retiring" => SlotActivity::Retiring,
            "Suspended" => SlotActivity::Suspended,
            other => SlotActivity::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub host_instance_id: HostInstanceId,
    pub machine_name: String,
    pub state: SlotState,
    pub activity: SlotActivity,
    pub extra: Map<String, String>,
}

impl SlotRecord {
    /// Builds a slot record out of a raw record.
    ///
    /// Returns `Ok(None)` for slots that do not carry a host identity (e.g. static, non-cloud
    /// execution hosts), those can never be correlated with a job.
    pub fn from_raw(mut raw: RawRecord, fields: &FieldNames) -> Result<Option<Self>, RecordError> {
        let Some(host_instance_id) = raw.remove(&fields.slot_host_id) else {
            return Ok(None);
        };
        let machine_name = raw
            .remove(&fields.slot_machine)
            .ok_or_else(|| RecordError::MissingField(fields.slot_machine.clone()))?;
        let state = raw
            .remove(&fields.slot_state)
            .map(|state| SlotState::from(state.as_str()))
            .ok_or_else(|| RecordError::MissingField(fields.slot_state.clone()))?;
        let activity = raw
            .remove(&fields.slot_activity)
            .map(|activity| SlotActivity::from(activity.as_str()))
            .ok_or_else(|| RecordError::MissingField(fields.slot_activity.clone()))?;
        Ok(Some(Self {
            host_instance_id,
            machine_name,
            state,
            activity,
            extra: raw,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldNames, JobId, JobRecord, RawRecord, RecordError, SlotActivity, SlotRecord};

    fn raw(items: &[(&str, &str)]) -> RawRecord {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parse_job_id() {
        assert_eq!("12.3".parse::<JobId>().unwrap(), JobId::new(12, 3));
        assert_eq!(JobId::new(7, 0).to_string(), "7.0");
        assert!("12".parse::<JobId>().is_err());
        assert!("a.b".parse::<JobId>().is_err());
    }

    #[test]
    fn job_without_queue_is_ignored() {
        let record = raw(&[("clusterid", "1"), ("procid", "0"), ("jobstatus", "2")]);
        assert_eq!(
            JobRecord::from_raw(record, &FieldNames::default()).unwrap(),
            None
        );
    }

    #[test]
    fn job_record_keeps_extra_fields() {
        let record = raw(&[
            ("match_apf_queue", "Q1"),
            ("clusterid", "10"),
            ("procid", "2"),
            ("jobstatus", "2"),
            ("enteredcurrentstatus", "1700000000"),
            ("ec2instancename", "i-0abc"),
            ("owner", "pilot"),
        ]);
        let job = JobRecord::from_raw(record, &FieldNames::default())
            .unwrap()
            .unwrap();
        assert_eq!(job.queue_name, "Q1");
        assert_eq!(job.job_id, JobId::new(10, 2));
        assert_eq!(job.host_instance_id.as_deref(), Some("i-0abc"));
        assert_eq!(job.entered_status_time.unwrap().timestamp(), 1700000000);
        assert_eq!(job.extra.len(), 1);
        assert_eq!(job.extra["owner"], "pilot");
    }

    #[test]
    fn job_record_with_invalid_cluster() {
        let record = raw(&[
            ("match_apf_queue", "Q1"),
            ("clusterid", "x"),
            ("procid", "0"),
            ("jobstatus", "1"),
        ]);
        assert_eq!(
            JobRecord::from_raw(record, &FieldNames::default()).unwrap_err(),
            RecordError::InvalidField {
                field: "clusterid".to_string(),
                value: "x".to_string()
            }
        );
    }

    #[test]
    fn slot_without_host_id_is_ignored() {
        let record = raw(&[("machine", "wn1"), ("state", "Claimed"), ("activity", "Busy")]);
        assert_eq!(
            SlotRecord::from_raw(record, &FieldNames::default()).unwrap(),
            None
        );
    }

    #[test]
    fn slot_with_unknown_activity() {
        let record = raw(&[
            ("ec2instanceid", "i-1"),
            ("machine", "wn1"),
            ("state", "Claimed"),
            ("activity", "Vacating"),
        ]);
        let slot = SlotRecord::from_raw(record, &FieldNames::default())
            .unwrap()
            .unwrap();
        assert_eq!(slot.activity, SlotActivity::Other("Vacating".to_string()));
    }

    #[test]
    fn slot_missing_activity() {
        let record = raw(&[("ec2instanceid", "i-1"), ("machine", "wn1"), ("state", "Owner")]);
        assert_eq!(
            SlotRecord::from_raw(record, &FieldNames::default()).unwrap_err(),
            RecordError::MissingField("activity".to_string())
        );
    }
}
