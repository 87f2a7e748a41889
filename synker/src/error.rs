use core::error::Error as StdError;

use thiserror::Error;
use types::{
    nonstandard::ChainKind,
    primitives::{Height, ShardId},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("shard {shard_id} is already being synced")]
    AlreadySyncing { shard_id: ShardId },
    #[error("shard {shard_id} cannot be stopped because the node is a member of its committee")]
    CannotStop { shard_id: ShardId },
    #[error("shard {shard_id} does not exist")]
    InvalidShard { shard_id: ShardId },
    #[error("shard {shard_id} is not being synced")]
    NotSyncing { shard_id: ShardId },
    #[error("shard {shard_id} is a relay shard and cannot be stopped")]
    NotRelayed { shard_id: ShardId },
}

/// A pooled block rejected by the chain manager. Ends the drain of that chain for one tick.
#[derive(Debug, Error)]
#[error("failed to insert {chain} block at height {height}")]
pub struct InsertionFailure {
    pub chain: ChainKind,
    pub height: Height,
    #[source]
    pub source: Box<dyn StdError + Send + Sync>,
}

impl InsertionFailure {
    pub(crate) fn new(chain: ChainKind, height: Height, error: anyhow::Error) -> Self {
        Self {
            chain,
            height,
            source: error.into(),
        }
    }
}
