use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::batch::records::JobRecord;
use crate::common::timeutils::{age_of, now_monotonic};
use crate::get_or_return_with;
use crate::hosts::{Correlation, CorrelationReport};
use crate::stats::{QueueStats, StatsByQueue};

/// Diagnostics of one refresh cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    /// Jobs that do not belong to any queue.
    pub jobs_ignored: usize,
    pub jobs_invalid: usize,
    /// Slots without a host identity.
    pub slots_ignored: usize,
    pub slots_invalid: usize,
    pub correlation: CorrelationReport,
    pub job_query_duration: Duration,
    pub slot_query_duration: Duration,
}

/// Everything that was learned about the batch system in one refresh cycle.
///
/// Snapshots are never modified after they have been published.
#[derive(Debug, Serialize)]
pub struct BatchSnapshot {
    #[serde(skip)]
    pub taken_at: Instant,
    pub stats: StatsByQueue,
    pub correlation: Correlation,
    pub report: CycleReport,
}

impl BatchSnapshot {
    pub fn age(&self) -> Duration {
        age_of(self.taken_at)
    }
}

/// Holds the latest published snapshot.
///
/// The snapshot is replaced as a whole, so readers never observe a partially updated state.
#[derive(Default)]
pub struct SnapshotCell {
    latest: RwLock<Option<Arc<BatchSnapshot>>>,
}

impl SnapshotCell {
    pub fn publish(&self, snapshot: BatchSnapshot) -> Arc<BatchSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.latest.write() = Some(snapshot.clone());
        snapshot
    }

    pub fn latest(&self) -> Option<Arc<BatchSnapshot>> {
        self.latest.read().clone()
    }

    /// Returns the latest snapshot unless it is older than `max_staleness`.
    pub fn fresh(&self, max_staleness: Duration) -> Option<Arc<BatchSnapshot>> {
        let snapshot = self.latest()?;
        let age = snapshot.age();
        if age > max_staleness {
            log::debug!(
                "Latest batch snapshot is {} old, which is more than {}",
                humantime::format_duration(truncate_to_secs(age)),
                humantime::format_duration(max_staleness)
            );
            return None;
        }
        Some(snapshot)
    }

    /// Statistics of the given queue, or of all queues summed together.
    ///
    /// Returns `None` when there is no snapshot younger than `max_staleness`. A queue without
    /// jobs has empty statistics.
    pub fn get_stats(&self, queue: Option<&str>, max_staleness: Duration) -> Option<QueueStats> {
        let snapshot = get_or_return_with!(self.fresh(max_staleness), None);
        let stats = match queue {
            Some(queue) => snapshot.stats.get(queue).cloned().unwrap_or_default(),
            None => {
                let mut stats = QueueStats::default();
                for queue_stats in snapshot.stats.values() {
                    stats.merge(queue_stats);
                }
                stats
            }
        };
        Some(stats)
    }

    /// Jobs of the given queue, or of all queues.
    ///
    /// Returns `None` when there is no snapshot younger than `max_staleness`.
    pub fn get_job_info(
        &self,
        queue: Option<&str>,
        max_staleness: Duration,
    ) -> Option<Vec<JobRecord>> {
        let snapshot = get_or_return_with!(self.fresh(max_staleness), None);
        Some(
            snapshot
                .correlation
                .jobs
                .iter()
                .filter(|job| queue.is_none_or(|queue| job.queue_name == queue))
                .cloned()
                .collect(),
        )
    }
}

fn truncate_to_secs(duration: Duration) -> Duration {
    Duration::from_secs(duration.as_secs())
}

/// Creates a snapshot taken now.
pub fn new_snapshot(stats: StatsByQueue, correlation: Correlation, report: CycleReport) -> BatchSnapshot {
    BatchSnapshot {
        taken_at: now_monotonic(),
        stats,
        correlation,
        report,
    }
}

#[cfg(test)]
mod tests {
    use super::{CycleReport, SnapshotCell, new_snapshot};
    use crate::batch::records::{JobId, JobRecord};
    use crate::common::timeutils::mock_time::MockTime;
    use crate::hosts::{HostRegistry, correlate};
    use crate::stats::{Category, StatusMapping, aggregate_jobs};
    use std::time::{Duration, Instant};

    fn job(queue: &str, proc: u64, status: &str) -> JobRecord {
        JobRecord {
            queue_name: queue.to_string(),
            job_id: JobId::new(1, proc),
            status_code: status.to_string(),
            host_instance_id: None,
            host_address: None,
            entered_status_time: None,
            extra: Default::default(),
        }
    }

    fn publish(cell: &SnapshotCell, jobs: Vec<JobRecord>) {
        let stats = aggregate_jobs(&jobs, &StatusMapping::condor_default());
        let correlation = correlate(jobs, vec![], &HostRegistry::default());
        cell.publish(new_snapshot(stats, correlation, CycleReport::default()));
    }

    #[test]
    fn no_snapshot_yet() {
        let cell = SnapshotCell::default();
        assert!(cell.latest().is_none());
        assert!(cell.get_stats(None, Duration::from_secs(60)).is_none());
        assert!(cell.get_job_info(Some("Q1"), Duration::from_secs(60)).is_none());
    }

    #[test]
    fn stats_of_queue_and_of_all_queues() {
        let cell = SnapshotCell::default();
        publish(
            &cell,
            vec![job("Q1", 0, "1"), job("Q1", 1, "2"), job("Q2", 2, "2")],
        );
        let max_staleness = Duration::from_secs(60);
        let q1 = cell.get_stats(Some("Q1"), max_staleness).unwrap();
        assert_eq!(q1.get(Category::Pending), 1);
        assert_eq!(q1.total(), 2);

        let all = cell.get_stats(None, max_staleness).unwrap();
        assert_eq!(all.get(Category::Running), 2);
        assert_eq!(all.total(), 3);

        let empty = cell.get_stats(Some("Q3"), max_staleness).unwrap();
        assert_eq!(empty.total(), 0);

        let jobs = cell.get_job_info(Some("Q2"), max_staleness).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_id, JobId::new(1, 2));
        assert_eq!(cell.get_job_info(None, max_staleness).unwrap().len(), 3);
    }

    #[test]
    fn stale_snapshot_is_not_served() {
        let now = Instant::now();
        let cell = SnapshotCell::default();
        {
            let _mock = MockTime::mock(now);
            publish(&cell, vec![job("Q1", 0, "2")]);
        }
        {
            let _mock = MockTime::mock(now + Duration::from_secs(30));
            assert!(cell.get_stats(Some("Q1"), Duration::from_secs(60)).is_some());
        }
        {
            let _mock = MockTime::mock(now + Duration::from_secs(61));
            assert!(cell.get_stats(Some("Q1"), Duration::from_secs(60)).is_none());
            assert!(cell.get_job_info(None, Duration::from_secs(60)).is_none());
            // The snapshot itself is still there
            assert!(cell.latest().is_some());
        }
    }

    #[test]
    fn publish_replaces_snapshot() {
        let cell = SnapshotCell::default();
        publish(&cell, vec![job("Q1", 0, "1")]);
        let old = cell.latest().unwrap();
        publish(&cell, vec![job("Q1", 0, "2"), job("Q1", 1, "2")]);

        // Readers holding the old snapshot keep seeing it unchanged
        assert_eq!(old.stats["Q1"].get(Category::Pending), 1);
        let new = cell.latest().unwrap();
        assert_eq!(new.stats["Q1"].get(Category::Running), 2);
    }
}
