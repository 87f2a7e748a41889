use std::collections::BTreeMap;

use types::{
    containers::PoolHeights,
    nonstandard::ChainKind,
    primitives::{Height, ShardId},
};

use crate::{
    participation::Participation,
    traits::{Collaborators, Protocol},
};

/// Snapshot of the heights held by the local pools.
///
/// Refreshed at the start of every resolution cycle. Requests for heights found here are skipped.
#[derive(Default)]
pub struct PoolHeightView {
    heights: PoolHeights,
    cross_shard_destination: Option<ShardId>,
}

impl PoolHeightView {
    pub fn refresh<P: Protocol>(
        &mut self,
        collaborators: &Collaborators<P>,
        syncing_shards: impl IntoIterator<Item = ShardId>,
        participation: Participation,
    ) {
        let Collaborators {
            beacon_pool,
            shard_pools,
            shard_to_beacon_pool,
            cross_shard_pools,
            ..
        } = collaborators;

        let shards = syncing_shards
            .into_iter()
            .filter_map(|shard_id| {
                let pool = shard_pools.get(&shard_id)?;
                Some((shard_id, sorted(pool.valid_heights())))
            })
            .collect();

        let shard_to_beacon = if participation.track_shard_to_beacon {
            sorted_by_shard(shard_to_beacon_pool.valid_pending_heights())
        } else {
            Default::default()
        };

        let cross_shard = participation
            .track_cross_shard
            .and_then(|destination| cross_shard_pools.get(&destination))
            .map(|pool| sorted_by_shard(pool.valid_pending_heights()))
            .unwrap_or_default();

        self.heights = PoolHeights {
            beacon: sorted(beacon_pool.valid_heights()),
            shards,
            shard_to_beacon,
            cross_shard,
        };

        self.cross_shard_destination = participation.track_cross_shard;
    }

    #[must_use]
    pub fn heights(&self, chain: ChainKind) -> &[Height] {
        let heights = match chain {
            ChainKind::Beacon => Some(&self.heights.beacon),
            ChainKind::Shard(shard_id) => self.heights.shards.get(&shard_id),
            ChainKind::ShardToBeacon(shard_id) => self.heights.shard_to_beacon.get(&shard_id),
            ChainKind::CrossShard { from, to } => {
                if self.cross_shard_destination == Some(to) {
                    self.heights.cross_shard.get(&from)
                } else {
                    None
                }
            }
        };

        heights.map(Vec::as_slice).unwrap_or_default()
    }

    #[must_use]
    pub fn contains(&self, chain: ChainKind, height: Height) -> bool {
        self.heights(chain).binary_search(&height).is_ok()
    }

    #[must_use]
    pub fn snapshot(&self) -> PoolHeights {
        self.heights.clone()
    }
}

fn sorted(mut heights: Vec<Height>) -> Vec<Height> {
    heights.sort_unstable();
    heights.dedup();
    heights
}

fn sorted_by_shard(
    heights: impl IntoIterator<Item = (ShardId, Vec<Height>)>,
) -> BTreeMap<ShardId, Vec<Height>> {
    heights
        .into_iter()
        .map(|(shard_id, heights)| (shard_id, sorted(heights)))
        .collect()
}

#[cfg(test)]
mod tests {
    use types::nonstandard::{BeaconRole, CommitteeRole, NodeMode};

    use crate::{fakes::FakeNode, participation::resolve_participation};

    use super::*;

    #[test]
    fn only_tracked_pools_are_visible() {
        let node = FakeNode::default();

        node.beacon_pool.set_valid_heights([12, 10, 11]);
        node.shard_pool(1).set_valid_heights([7]);
        node.shard_pool(2).set_valid_heights([9]);
        node.shard_to_beacon_pool.set_pending_heights(1, [4, 3]);
        node.cross_shard_pool(2).set_pending_heights(0, [5]);

        let participation =
            resolve_participation(NodeMode::Auto, BeaconRole::Shard(2), CommitteeRole::Validator);

        let mut view = PoolHeightView::default();

        view.refresh(&node.collaborators(), [1], participation);

        assert_eq!(view.heights(ChainKind::Beacon), [10, 11, 12]);
        assert!(view.contains(ChainKind::Shard(1), 7));
        assert!(!view.contains(ChainKind::Shard(2), 9));
        assert!(view.heights(ChainKind::ShardToBeacon(1)).is_empty());
        assert!(view.contains(ChainKind::CrossShard { from: 0, to: 2 }, 5));
        assert!(!view.contains(ChainKind::CrossShard { from: 0, to: 3 }, 5));
    }

    #[test]
    fn beacon_committee_members_see_shard_to_beacon_heights() {
        let node = FakeNode::default();

        node.shard_to_beacon_pool.set_pending_heights(1, [4, 3]);

        let participation =
            resolve_participation(NodeMode::Beacon, BeaconRole::Proposer, CommitteeRole::Observer);

        let mut view = PoolHeightView::default();

        view.refresh(&node.collaborators(), [], participation);

        assert_eq!(view.heights(ChainKind::ShardToBeacon(1)), [3, 4]);
        assert_eq!(view.snapshot().shard_to_beacon[&1], [3, 4]);
    }
}
