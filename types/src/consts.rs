use crate::primitives::{Height, ShardId};

pub const MAX_SHARD_NUMBER: ShardId = 8;

// Length of arrays indexed by shard id.
pub const MAX_SHARD_COUNT: usize = 8;

// Blocks at this height are part of the genesis configuration and are never requested.
pub const GENESIS_HEIGHT: Height = 0;

#[must_use]
pub const fn is_valid_shard_id(shard_id: ShardId) -> bool {
    shard_id < MAX_SHARD_NUMBER
}

#[must_use]
pub fn shard_ids() -> impl Iterator<Item = ShardId> {
    0..MAX_SHARD_NUMBER
}
