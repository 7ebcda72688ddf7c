use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::batch::records::{SlotActivity, SlotRecord};

/// Canonical lifecycle state of an execution host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostStatus {
    /// At least one slot is doing work.
    Busy,
    /// The host was told to stop accepting work and is draining.
    Retiring,
    /// All slots are idle.
    Idle,
    /// The host no longer reports any slot.
    Retired,
    /// The slots report a combination that is neither busy, retiring nor idle.
    Undetermined,
}

impl HostStatus {
    /// Hosts that may be picked as retirement victims without interrupting work.
    pub fn is_idle_like(&self) -> bool {
        matches!(self, HostStatus::Idle | HostStatus::Undetermined)
    }
}

impl Display for HostStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HostStatus::Busy => "busy",
            HostStatus::Retiring => "retiring",
            HostStatus::Idle => "idle",
            HostStatus::Retired => "retired",
            HostStatus::Undetermined => "undetermined",
        };
        f.write_str(name)
    }
}

/// Derives the lifecycle state of a host from the slots it reported in the current cycle.
///
/// `Busy` dominates `Retiring`, which dominates `Idle`. A host must never be reported idle
/// while any of its slots is doing work.
pub fn derive_host_status(host_id: &str, slots: &[SlotRecord]) -> HostStatus {
    if slots.is_empty() {
        return HostStatus::Retired;
    }
    let has_activity = |activity: SlotActivity| slots.iter().any(|slot| slot.activity == activity);
    if has_activity(SlotActivity::Busy) {
        HostStatus::Busy
    } else if has_activity(SlotActivity::Retiring) {
        HostStatus::Retiring
    } else if slots.iter().all(|slot| slot.activity == SlotActivity::Idle) {
        HostStatus::Idle
    } else {
        log::warn!(
            "Cannot determine the state of host {host_id} from slot activities {:?}",
            slots.iter().map(|slot| &slot.activity).collect::<Vec<_>>()
        );
        HostStatus::Undetermined
    }
}
