//! Consumer-group protocol models.

use std::collections::BTreeSet;

use crate::limits::DEFAULT_PLAN_VERSION;
use crate::types::ShardId;

/// Membership returned by a successful group join.
///
/// Immutable for the lifetime of the membership; a rejoin produces a new
/// value with a fresh `consumer_id`/`version_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMembership {
    /// Service-assigned consumer id within the group.
    pub consumer_id: String,
    /// Membership version, echoed on every heartbeat and sync.
    pub version_id: i64,
    /// Session timeout granted by the service in milliseconds.
    pub session_timeout_ms: u64,
}

/// The shard-assignment plan reported by a heartbeat response.
///
/// `plan_version` is non-decreasing per membership; a lower version in a
/// response is a protocol violation and must not regress the tracked plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatPlan {
    /// Shards assigned to this consumer.
    pub shard_ids: BTreeSet<ShardId>,
    /// Assignment epoch for the consumer group.
    pub plan_version: i64,
}

impl Default for HeartbeatPlan {
    fn default() -> Self {
        Self {
            shard_ids: BTreeSet::new(),
            plan_version: DEFAULT_PLAN_VERSION,
        }
    }
}

/// A release/acquire delta between two shard sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    /// Shards held previously but absent from the target set.
    pub release: BTreeSet<ShardId>,
    /// Shards in the target set not held previously.
    pub acquire: BTreeSet<ShardId>,
}

impl Assignment {
    /// Computes the symmetric difference between the currently held set
    /// and a target set.
    ///
    /// The two result sets are disjoint by construction.
    #[must_use]
    pub fn diff(current: &BTreeSet<ShardId>, target: &BTreeSet<ShardId>) -> Self {
        Self {
            release: current.difference(target).cloned().collect(),
            acquire: target.difference(current).cloned().collect(),
        }
    }

    /// Returns true if there is nothing to release or acquire.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.release.is_empty() && self.acquire.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> BTreeSet<ShardId> {
        ids.iter().map(|id| ShardId::new(*id)).collect()
    }

    #[test]
    fn test_diff_disjoint() {
        let assignment = Assignment::diff(&set(&["0", "1", "2"]), &set(&["1", "2", "3"]));
        assert_eq!(assignment.release, set(&["0"]));
        assert_eq!(assignment.acquire, set(&["3"]));
        assert!(assignment.release.is_disjoint(&assignment.acquire));
    }

    #[test]
    fn test_diff_identical_sets() {
        let assignment = Assignment::diff(&set(&["0", "1"]), &set(&["0", "1"]));
        assert!(assignment.is_empty());
    }

    #[test]
    fn test_diff_from_empty() {
        let assignment = Assignment::diff(&BTreeSet::new(), &set(&["0", "1"]));
        assert!(assignment.release.is_empty());
        assert_eq!(assignment.acquire.len(), 2);
    }

    #[test]
    fn test_default_plan_version() {
        let plan = HeartbeatPlan::default();
        assert_eq!(plan.plan_version, DEFAULT_PLAN_VERSION);
        assert!(plan.shard_ids.is_empty());
    }
}
