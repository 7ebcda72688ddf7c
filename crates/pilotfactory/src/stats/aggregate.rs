use serde::{Deserialize, Serialize};

use crate::batch::records::JobRecord;
use crate::stats::mapping::{Category, StatusMapping};
use crate::{Map, QueueName};

/// How [`QueueStats::fill`] treats categories that already have a count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Overwrite the previous value.
    Replace,
    /// Add to the previous value (used to merge several sources).
    Add,
}

/// Number of jobs of a single queue in each canonical category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    counts: Map<Category, u64>,
    /// Number of jobs observed for the queue, regardless of their category.
    total: u64,
}

impl QueueStats {
    pub fn get(&self, category: Category) -> u64 {
        self.counts.get(&category).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn counts(&self) -> impl Iterator<Item = (Category, u64)> + '_ {
        self.counts.iter().map(|(category, count)| (*category, *count))
    }

    /// Sum of the primary categories. Equals [`QueueStats::total`] for stats computed from jobs.
    pub fn primary_sum(&self) -> u64 {
        Category::PRIMARY.iter().map(|c| self.get(*c)).sum()
    }

    pub fn fill<I>(&mut self, counts: I, mode: FillMode)
    where
        I: IntoIterator<Item = (Category, u64)>,
    {
        for (category, count) in counts {
            let entry = self.counts.entry(category).or_default();
            match mode {
                FillMode::Replace => *entry = count,
                FillMode::Add => *entry += count,
            }
        }
    }

    /// Adds the counts and the total of `other`, e.g. to sum the stats of several queues.
    pub fn merge(&mut self, other: &QueueStats) {
        self.fill(other.counts(), FillMode::Add);
        self.total += other.total;
    }

    /// Drops categories with zero count, so that two stats with the same non-zero counts compare
    /// equal.
    fn compact(mut self) -> Self {
        self.counts.retain(|_, count| *count > 0);
        self
    }
}

pub type StatsByQueue = Map<QueueName, QueueStats>;

/// Groups job records by queue and status code and maps the codes into canonical categories.
///
/// The result is always built from scratch, previous stats are never updated in place.
pub fn aggregate_jobs<'a, I>(jobs: I, mapping: &StatusMapping) -> StatsByQueue
where
    I: IntoIterator<Item = &'a JobRecord>,
{
    let mut raw: Map<&str, Map<&str, u64>> = Map::default();
    for job in jobs {
        *raw.entry(job.queue_name.as_str())
            .or_default()
            .entry(job.status_code.as_str())
            .or_default() += 1;
    }

    raw.into_iter()
        .map(|(queue, codes)| {
            let mut stats = QueueStats::default();
            for (code, count) in codes {
                // Several codes may share a category, so their counts are summed.
                stats.fill(
                    mapping.map(code).categories().map(|category| (category, count)),
                    FillMode::Add,
                );
                stats.total += count;
            }
            (queue.to_string(), stats.compact())
        })
        .collect()
}
