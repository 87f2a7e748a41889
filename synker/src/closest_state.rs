use core::fmt::Display;
use std::collections::BTreeMap;

use log::debug;
use types::{
    consts::{is_valid_shard_id, MAX_SHARD_COUNT},
    containers::ChainState,
    primitives::{Height, ShardId},
};

use crate::{participation::Participation, peer_states::PeerStateTable};

/// Canonical heights the resolution cycle starts from.
pub struct LocalChains {
    pub beacon: ChainState,
    /// Only shards being synced.
    pub shards: BTreeMap<ShardId, ChainState>,
    /// Highest block of each shard included in the canonical beacon chain.
    pub beacon_view_of_shards: [Height; MAX_SHARD_COUNT],
}

impl LocalChains {
    pub fn beacon_view_of_shard(&self, shard_id: ShardId) -> Height {
        self.beacon_view_of_shards
            .get(usize::from(shard_id))
            .copied()
            .unwrap_or_default()
    }
}

/// Sync targets computed from one round of peer announcements.
pub struct ClosestChainState<I> {
    pub beacon: ChainState,
    pub shards: BTreeMap<ShardId, ChainState>,
    /// Shard blocks the beacon chain has not included yet, by shard.
    pub shard_to_beacon: BTreeMap<ShardId, ChainState>,
    pub shard_to_beacon_blocks: BTreeMap<ShardId, BTreeMap<I, Vec<Height>>>,
    /// Cross-shard blocks destined for the local shard, by source shard.
    pub cross_shard_blocks: BTreeMap<ShardId, BTreeMap<I, Vec<Height>>>,
}

#[derive(PartialEq, Eq, Debug)]
pub struct Readiness {
    pub beacon: bool,
    pub shards: BTreeMap<ShardId, bool>,
}

impl<I: Ord + Copy + Display> ClosestChainState<I> {
    /// Adopts the lowest height that improves on the local one.
    ///
    /// Peers claiming the most advanced chain are not trusted more than peers slightly ahead.
    /// Requests are bounded by the most conservative improvement seen in the round.
    pub fn resolve(
        local: &LocalChains,
        peers: &PeerStateTable<I>,
        participation: Participation,
    ) -> Self {
        let mut closest = Self {
            beacon: local.beacon,
            shards: local.shards.clone(),
            shard_to_beacon: BTreeMap::new(),
            shard_to_beacon_blocks: BTreeMap::new(),
            cross_shard_blocks: BTreeMap::new(),
        };

        for (peer_id, peer_state) in peers.iter() {
            for (shard_id, local_shard) in &local.shards {
                let Some(reported) = peer_state.shard_states.get(shard_id) else {
                    continue;
                };

                let qualifies = reported.height >= local.beacon_view_of_shard(*shard_id)
                    && reported.height > local_shard.height;

                if qualifies {
                    if let Some(target) = closest.shards.get_mut(shard_id) {
                        adopt_lowest_improvement(target, *reported, local_shard.height);
                    }
                }
            }

            if peer_state.beacon_state.height > local.beacon.height {
                adopt_lowest_improvement(
                    &mut closest.beacon,
                    peer_state.beacon_state,
                    local.beacon.height,
                );
            }

            // Pending pool contents are only taken from peers that are not behind.
            if peer_state.beacon_state.height < local.beacon.height {
                continue;
            }

            if participation.track_shard_to_beacon {
                for (shard_id, heights) in &peer_state.shard_to_beacon_pending {
                    if !is_valid_shard_id(*shard_id) {
                        debug!("ignoring shard-to-beacon heights of shard {shard_id} from peer {peer_id}");
                        continue;
                    }

                    closest
                        .shard_to_beacon_blocks
                        .entry(*shard_id)
                        .or_default()
                        .insert(peer_id, heights.iter().copied().collect());
                }

                for (shard_id, reported) in &peer_state.shard_states {
                    if !is_valid_shard_id(*shard_id) {
                        debug!("ignoring state of shard {shard_id} from peer {peer_id}");
                        continue;
                    }

                    if reported.height <= local.beacon_view_of_shard(*shard_id) {
                        continue;
                    }

                    closest
                        .shard_to_beacon
                        .entry(*shard_id)
                        .and_modify(|target| {
                            if reported.height < target.height {
                                *target = *reported;
                            }
                        })
                        .or_insert(*reported);
                }
            }

            if let Some(destination) = participation.track_cross_shard {
                let Some(pending) = peer_state.cross_shard_pending.get(&destination) else {
                    continue;
                };

                for (source, heights) in pending {
                    if !is_valid_shard_id(*source) {
                        debug!("ignoring cross-shard heights from shard {source} reported by peer {peer_id}");
                        continue;
                    }

                    closest
                        .cross_shard_blocks
                        .entry(*source)
                        .or_default()
                        .insert(peer_id, heights.iter().copied().collect());
                }
            }
        }

        features::log!(
            LogClosestState,
            "closest beacon height: {}, closest shard heights: {:?}",
            closest.beacon.height,
            closest
                .shards
                .iter()
                .map(|(shard_id, state)| (*shard_id, state.height))
                .collect::<Vec<_>>(),
        );

        closest
    }

    /// Returns `None` if no peer reported anything.
    /// A node without peers cannot tell whether it is behind, so its flags stay as they were.
    pub fn readiness(&self, local: &LocalChains, peer_count: usize) -> Option<Readiness> {
        if peer_count == 0 {
            return None;
        }

        let shards = local
            .shards
            .iter()
            .map(|(shard_id, local_shard)| {
                let caught_up = self
                    .shards
                    .get(shard_id)
                    .is_some_and(|target| target.height == local_shard.height);

                let included_by_beacon =
                    local_shard.height >= local.beacon_view_of_shard(*shard_id);

                (*shard_id, caught_up && included_by_beacon)
            })
            .collect();

        Some(Readiness {
            beacon: self.beacon.height == local.beacon.height,
            shards,
        })
    }
}

fn adopt_lowest_improvement(target: &mut ChainState, reported: ChainState, local_height: Height) {
    if target.height == local_height || reported.height < target.height {
        *target = reported;
    }
}
