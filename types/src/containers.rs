use std::collections::{BTreeMap, BTreeSet};

use derive_more::Constructor;
use serde::{Deserialize, Serialize};

use crate::primitives::{Height, ShardId, H256};

/// Snapshot of a single chain as seen by some node.
///
/// Snapshots are replaced as a whole. Nothing mutates the fields of a stored snapshot.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Constructor, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChainState {
    pub height: Height,
    pub block_hash: H256,
    pub best_state_hash: H256,
}

impl ChainState {
    #[must_use]
    pub const fn at_height(height: Height) -> Self {
        Self {
            height,
            block_hash: H256::zero(),
            best_state_hash: H256::zero(),
        }
    }
}

/// Chain states and pending pool contents announced by a peer in one broadcast.
#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PeerReportedState {
    pub beacon_state: ChainState,
    pub shard_states: BTreeMap<ShardId, ChainState>,
    // Heights of shard-to-beacon blocks waiting in the peer's pool, by source shard.
    pub shard_to_beacon_pending: BTreeMap<ShardId, BTreeSet<Height>>,
    // Heights of cross-shard blocks waiting in the peer's pool,
    // by destination shard and then by source shard.
    pub cross_shard_pending: BTreeMap<ShardId, BTreeMap<ShardId, BTreeSet<Height>>>,
}

impl PeerReportedState {
    #[must_use]
    pub fn shard_height(&self, shard_id: ShardId) -> Option<Height> {
        self.shard_states.get(&shard_id).map(|state| state.height)
    }
}

/// Heights of valid blocks currently held by the local pools.
#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PoolHeights {
    pub beacon: Vec<Height>,
    pub shards: BTreeMap<ShardId, Vec<Height>>,
    pub shard_to_beacon: BTreeMap<ShardId, Vec<Height>>,
    // Cross-shard blocks destined for the local shard, by source shard.
    pub cross_shard: BTreeMap<ShardId, Vec<Height>>,
}

/// What the local node announces to its peers.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LocalChainState {
    pub beacon_state: ChainState,
    pub shard_states: BTreeMap<ShardId, ChainState>,
    pub pool_heights: PoolHeights,
}
