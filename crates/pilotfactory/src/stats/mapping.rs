use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::Map;
use crate::common::error::FactoryError;

/// Backend-agnostic status category of a batch job.
///
/// The primary categories partition the jobs of a queue, every job falls into exactly one of
/// them. The remaining categories are secondary flags that may overlap with a primary one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Pending,
    Running,
    Suspended,
    Done,
    Unknown,
    Retiring,
    Retired,
    Failed,
    Success,
    Transferring,
}

impl Category {
    pub const PRIMARY: [Category; 5] = [
        Category::Pending,
        Category::Running,
        Category::Suspended,
        Category::Done,
        Category::Unknown,
    ];

    pub fn is_primary(&self) -> bool {
        Self::PRIMARY.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Pending => "pending",
            Category::Running => "running",
            Category::Suspended => "suspended",
            Category::Done => "done",
            Category::Unknown => "unknown",
            Category::Retiring => "retiring",
            Category::Retired => "retired",
            Category::Failed => "failed",
            Category::Success => "success",
            Category::Transferring => "transferring",
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = FactoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let category = match s.trim().to_lowercase().as_str() {
            "pending" => Category::Pending,
            "running" => Category::Running,
            "suspended" => Category::Suspended,
            "done" => Category::Done,
            "unknown" => Category::Unknown,
            "retiring" => Category::Retiring,
            "retired" => Category::Retired,
            "failed" => Category::Failed,
            "success" => Category::Success,
            "transferring" => Category::Transferring,
            other => {
                return Err(FactoryError::ConfigError(format!(
                    "Unknown status category `{other}`"
                )));
            }
        };
        Ok(category)
    }
}

/// Canonical meaning of one raw status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedStatus {
    pub primary: Category,
    pub flags: Vec<Category>,
}

impl MappedStatus {
    fn new(primary: Category, flags: &[Category]) -> Self {
        Self {
            primary,
            flags: flags.to_vec(),
        }
    }

    pub fn categories(&self) -> impl Iterator<Item = Category> + '_ {
        std::iter::once(self.primary).chain(self.flags.iter().copied())
    }
}

/// Raw status table as written in the configuration file: the first category of each entry is
/// the primary one, the rest are flags.
pub type StatusTable = Map<String, Vec<Category>>;

/// Translates batch-system specific status codes into canonical categories.
#[derive(Debug, Clone)]
pub struct StatusMapping {
    table: Map<String, MappedStatus>,
}

impl StatusMapping {
    /// HTCondor `JobStatus` codes.
    pub fn condor_default() -> Self {
        use Category::*;

        let table = [
            ("0", MappedStatus::new(Pending, &[])),
            ("1", MappedStatus::new(Pending, &[])),
            ("2", MappedStatus::new(Running, &[])),
            ("3", MappedStatus::new(Done, &[])),
            ("4", MappedStatus::new(Done, &[Success])),
            ("5", MappedStatus::new(Suspended, &[])),
            ("6", MappedStatus::new(Running, &[Transferring])),
            ("7", MappedStatus::new(Suspended, &[])),
        ]
        .into_iter()
        .map(|(code, status)| (code.to_string(), status))
        .collect();
        Self { table }
    }

    pub fn from_table(table: &StatusTable) -> crate::Result<Self> {
        let mut mapping = Map::with_capacity_and_hasher(table.len(), Default::default());
        for (code, categories) in table {
            let Some((&primary, flags)) = categories.split_first() else {
                return Err(FactoryError::ConfigError(format!(
                    "Status code `{code}` is not mapped to any category"
                )));
            };
            if !primary.is_primary() {
                return Err(FactoryError::ConfigError(format!(
                    "Status code `{code}` must be mapped to a primary category first, not `{primary}`"
                )));
            }
            if let Some(flag) = flags.iter().find(|flag| flag.is_primary()) {
                return Err(FactoryError::ConfigError(format!(
                    "Status code `{code}` maps to more than one primary category (`{primary}` and `{flag}`)"
                )));
            }
            mapping.insert(code.trim().to_string(), MappedStatus::new(primary, flags));
        }
        Ok(Self { table: mapping })
    }

    /// Codes missing from the table are reported as [`Category::Unknown`].
    pub fn map(&self, code: &str) -> MappedStatus {
        self.table
            .get(code.trim())
            .cloned()
            .unwrap_or_else(|| MappedStatus::new(Category::Unknown, &[]))
    }
}

impl Default for StatusMapping {
    fn default() -> Self {
        Self::condor_default()
    }
}
