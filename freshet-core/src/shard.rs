//! Shard descriptors and derived shard metadata.

use std::collections::{BTreeSet, HashMap};

use crate::types::ShardId;

/// Lifecycle state of a shard.
///
/// Shards move through `Opening` when created by a split/merge, serve
/// traffic while `Active`, and end in `Closed` (sealed) once no further
/// records will ever be appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardState {
    /// The shard is being created and cannot be read yet.
    Opening,
    /// The shard is serving reads and writes.
    Active,
    /// The shard is being closed by a split/merge.
    Closing,
    /// The shard is sealed; no further records will be appended.
    Closed,
}

/// One shard as returned by the shard-listing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDesc {
    /// The shard id.
    pub id: ShardId,
    /// Current lifecycle state.
    pub state: ShardState,
    /// Address of the broker serving the shard.
    pub address: String,
}

impl ShardDesc {
    /// Creates a shard descriptor.
    #[must_use]
    pub fn new(id: impl Into<ShardId>, state: ShardState, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state,
            address: address.into(),
        }
    }
}

/// Metadata derived from one full shard listing.
///
/// The active set drives producer routing and assignment diffs; `settled`
/// is false while any shard is mid split/merge (Opening or Closing).
#[derive(Debug, Clone, Default)]
pub struct ShardMeta {
    active: BTreeSet<ShardId>,
    addresses: HashMap<ShardId, String>,
    settled: bool,
}

impl ShardMeta {
    /// Derives metadata from a shard listing.
    #[must_use]
    pub fn from_shards(shards: &[ShardDesc]) -> Self {
        let mut active = BTreeSet::new();
        let mut addresses = HashMap::new();
        let mut settled = true;

        for shard in shards {
            match shard.state {
                ShardState::Active => {
                    active.insert(shard.id.clone());
                }
                ShardState::Opening | ShardState::Closing => settled = false,
                ShardState::Closed => {}
            }
            addresses.insert(shard.id.clone(), shard.address.clone());
        }

        Self {
            active,
            addresses,
            settled,
        }
    }

    /// Returns the ids of all active shards.
    #[must_use]
    pub const fn active_shard_ids(&self) -> &BTreeSet<ShardId> {
        &self.active
    }

    /// Returns the broker address for a shard, if listed.
    #[must_use]
    pub fn address(&self, shard_id: &ShardId) -> Option<&str> {
        self.addresses.get(shard_id).map(String::as_str)
    }

    /// Returns true if no shard is mid split/merge.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> Vec<ShardDesc> {
        vec![
            ShardDesc::new("0", ShardState::Active, "broker-a"),
            ShardDesc::new("1", ShardState::Active, "broker-b"),
            ShardDesc::new("2", ShardState::Closed, "broker-a"),
        ]
    }

    #[test]
    fn test_active_set() {
        let meta = ShardMeta::from_shards(&listing());
        assert_eq!(meta.active_shard_ids().len(), 2);
        assert!(meta.active_shard_ids().contains(&ShardId::new("0")));
        assert!(!meta.active_shard_ids().contains(&ShardId::new("2")));
    }

    #[test]
    fn test_settled() {
        let meta = ShardMeta::from_shards(&listing());
        assert!(meta.is_settled());

        let mut shards = listing();
        shards.push(ShardDesc::new("3", ShardState::Opening, "broker-c"));
        let meta = ShardMeta::from_shards(&shards);
        assert!(!meta.is_settled());
    }

    #[test]
    fn test_addresses() {
        let meta = ShardMeta::from_shards(&listing());
        assert_eq!(meta.address(&ShardId::new("1")), Some("broker-b"));
        assert_eq!(meta.address(&ShardId::new("9")), None);
    }
}
