use core::time::Duration;

use serde::Deserialize;
use serde_with::{As, DurationMilliSeconds};
use types::{
    nonstandard::NodeMode,
    primitives::{Height, ShardId},
};

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    // Participation
    pub node_mode: NodeMode,
    pub public_key: Option<String>,
    pub relay_shards: Vec<ShardId>,

    // Timers
    #[serde(with = "As::<DurationMilliSeconds>")]
    pub broadcast_interval: Duration,
    #[serde(with = "As::<DurationMilliSeconds>")]
    pub state_update_interval: Duration,
    #[serde(with = "As::<DurationMilliSeconds>")]
    pub pool_drain_interval: Duration,
    #[serde(with = "As::<DurationMilliSeconds>")]
    pub drain_min_interval: Duration,

    // Requests
    /// How long a requested height or hash blocks a repeat request.
    #[serde(with = "As::<DurationMilliSeconds>")]
    pub request_timeout: Duration,
    pub max_blocks_per_request: Height,
    pub max_blocks_per_cycle: Height,
    pub in_flight_cache_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            node_mode: NodeMode::Auto,
            public_key: None,
            relay_shards: vec![],
            broadcast_interval: Duration::from_secs(2),
            state_update_interval: Duration::from_secs(3),
            pool_drain_interval: Duration::from_millis(100),
            drain_min_interval: Duration::from_millis(30),
            request_timeout: Duration::from_secs(15),
            max_blocks_per_request: 600,
            max_blocks_per_cycle: 1200,
            in_flight_cache_capacity: 100_000,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn is_relay_shard(&self, shard_id: ShardId) -> bool {
        self.relay_shards.contains(&shard_id)
    }
}
