//! Talks to the external batch system: runs its query tools and turns their output into typed
//! job and slot records.
pub mod condor;
pub mod query;
pub mod records;
pub mod xml;

use crate::batch::records::{FieldNames, JobRecord, RawRecord, RecordError, SlotRecord};

/// Typed records of one query together with the number of records that were left out.
#[derive(Debug, Clone)]
pub struct Normalized<T> {
    pub records: Vec<T>,
    /// Records that are not managed by the factory (e.g. jobs without a queue name).
    pub ignored: usize,
    /// Records that could not be interpreted.
    pub invalid: usize,
}

impl<T> Default for Normalized<T> {
    fn default() -> Self {
        Self {
            records: vec![],
            ignored: 0,
            invalid: 0,
        }
    }
}

fn normalize<T, F>(raw: Vec<RawRecord>, kind: &str, parse: F) -> Normalized<T>
where
    F: Fn(RawRecord) -> Result<Option<T>, RecordError>,
{
    let mut normalized = Normalized::default();
    for record in raw {
        match parse(record) {
            Ok(Some(record)) => normalized.records.push(record),
            Ok(None) => normalized.ignored += 1,
            Err(error) => {
                log::warn!("Skipping {kind} record: {error}");
                normalized.invalid += 1;
            }
        }
    }
    normalized
}

pub fn normalize_jobs(raw: Vec<RawRecord>, fields: &FieldNames) -> Normalized<JobRecord> {
    normalize(raw, "job", |record| JobRecord::from_raw(record, fields))
}

pub fn normalize_slots(raw: Vec<RawRecord>, fields: &FieldNames) -> Normalized<SlotRecord> {
    normalize(raw, "slot", |record| SlotRecord::from_raw(record, fields))
}

#[cfg(test)]
mod tests {
    use super::{normalize_jobs, normalize_slots};
    use crate::batch::records::FieldNames;
    use crate::batch::xml::parse_records;
    use crate::tests::utils::{classads, job_ad, slot_ad};

    #[test]
    fn normalize_job_query() {
        let xml = classads(&[
            &job_ad("Q1", "1", "2", Some("i-1")),
            &[("ClusterId", "2"), ("ProcId", "0"), ("JobStatus", "1")],
            &[("MATCH_APF_QUEUE", "Q1"), ("ProcId", "0"), ("JobStatus", "1")],
        ]);
        let jobs = normalize_jobs(parse_records(&xml).unwrap(), &FieldNames::default());
        assert_eq!(jobs.records.len(), 1);
        assert_eq!(jobs.ignored, 1);
        assert_eq!(jobs.invalid, 1);
    }

    #[test]
    fn normalize_slot_query() {
        let xml = classads(&[
            &slot_ad("i-1", "wn1", "Busy"),
            &[("Machine", "static1"), ("State", "Claimed"), ("Activity", "Busy")],
        ]);
        let slots = normalize_slots(parse_records(&xml).unwrap(), &FieldNames::default());
        assert_eq!(slots.records.len(), 1);
        assert_eq!(slots.records[0].host_instance_id, "i-1");
        assert_eq!(slots.ignored, 1);
        assert_eq!(slots.invalid, 0);
    }

    #[test]
    fn normalization_is_idempotent() {
        let xml = classads(&[
            &job_ad("Q1", "1", "2", Some("i-1")),
            &job_ad("Q2", "2", "1", None),
        ]);
        let fields = FieldNames::default();
        let first = normalize_jobs(parse_records(&xml).unwrap(), &fields);
        let second = normalize_jobs(parse_records(&xml).unwrap(), &fields);
        assert_eq!(first.records, second.records);
    }
}
