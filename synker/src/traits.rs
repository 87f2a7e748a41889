use core::{
    fmt::{Debug, Display},
    hash::Hash,
};
use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use types::{
    containers::ChainState,
    nonstandard::{BeaconRole, CommitteeRole},
    primitives::{Height, PublicKey, Round, ShardId, H256},
};

/// Types supplied by the embedding node.
pub trait Protocol: Send + Sync + 'static {
    /// Opaque peer identity. Only compared and used as a map key.
    type PeerId: Copy + Eq + Ord + Hash + Debug + Display + Send + Sync + 'static;
    type BeaconBlock: Block;
    type ShardBlock: Block;
}

pub trait Block: Send + Sync + 'static {
    fn height(&self) -> Height;

    fn hash(&self) -> H256;
}

/// Blocks that passed validation but are not yet part of canonical state.
pub trait BlockPool: Send + Sync {
    type Block: Block;

    fn valid_heights(&self) -> Vec<Height>;

    /// Removes and returns the contiguous run of validated blocks starting right
    /// above the canonical height.
    fn pop_validated_run(&self) -> Vec<Self::Block>;

    fn contains_block(&self, block_hash: H256) -> bool;
}

/// Pool of shard-to-beacon or cross-shard blocks, keyed by source shard.
pub trait PendingBlockPool: Send + Sync {
    fn valid_pending_heights(&self) -> BTreeMap<ShardId, Vec<Height>>;

    fn contains_block(&self, block_hash: H256) -> bool;
}

pub trait ChainManager<P: Protocol>: Send + Sync {
    fn beacon_state(&self) -> ChainState;

    fn shard_state(&self, shard_id: ShardId) -> ChainState;

    /// Highest block of `shard_id` included in the canonical beacon chain.
    fn best_height_of_shard(&self, shard_id: ShardId) -> Height;

    fn active_shards(&self) -> ShardId;

    fn beacon_round(&self) -> Round;

    fn shard_round(&self, shard_id: ShardId) -> Round;

    fn insert_beacon_block(&self, block: P::BeaconBlock, from_pool: bool) -> Result<()>;

    fn insert_shard_block(&self, block: P::ShardBlock, from_pool: bool) -> Result<()>;
}

pub trait RoleOracle: Send + Sync {
    fn beacon_role(&self, public_key: &PublicKey, round: Round) -> BeaconRole;

    fn shard_role(&self, shard_id: ShardId, public_key: &PublicKey, round: Round) -> CommitteeRole;
}

/// Collaborators owned by the embedding node and shared with the synker.
pub struct Collaborators<P: Protocol> {
    pub chain_manager: Arc<dyn ChainManager<P>>,
    pub role_oracle: Arc<dyn RoleOracle>,
    pub beacon_pool: Arc<dyn BlockPool<Block = P::BeaconBlock>>,
    pub shard_pools: BTreeMap<ShardId, Arc<dyn BlockPool<Block = P::ShardBlock>>>,
    pub shard_to_beacon_pool: Arc<dyn PendingBlockPool>,
    /// Cross-shard pools by destination shard.
    pub cross_shard_pools: BTreeMap<ShardId, Arc<dyn PendingBlockPool>>,
}
