use core::time::Duration;
use std::time::Instant;

use anyhow::Result;
use parking_lot::Mutex;
use prometheus_metrics::Metrics;
use types::{
    consts::MAX_SHARD_COUNT,
    nonstandard::ChainKind,
    primitives::{Height, ShardId},
};

use crate::{
    error::InsertionFailure,
    traits::{Block, BlockPool, ChainManager, Protocol},
};

/// Outcome of draining one pool.
#[derive(Debug)]
pub struct DrainReport {
    pub chain: ChainKind,
    pub inserted: usize,
    pub last_inserted_height: Option<Height>,
    pub failure: Option<InsertionFailure>,
}

/// Moves validated pool blocks into canonical state.
///
/// Each chain has its own guard. Drains of the same chain never overlap while
/// drains of different chains run in parallel.
pub struct PoolDrainer {
    beacon_guard: Mutex<()>,
    shard_guards: [Mutex<()>; MAX_SHARD_COUNT],
    last_tick_at: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl PoolDrainer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            beacon_guard: Mutex::new(()),
            shard_guards: core::array::from_fn(|_| Mutex::new(())),
            last_tick_at: Mutex::new(None),
            min_interval,
        }
    }

    /// Returns `false` if the previous tick started less than `min_interval` ago.
    pub fn try_begin_tick(&self, now: Instant) -> bool {
        let mut last_tick_at = self.last_tick_at.lock();

        if let Some(last) = *last_tick_at {
            if now.saturating_duration_since(last) < self.min_interval {
                return false;
            }
        }

        *last_tick_at = Some(now);

        true
    }

    /// Returns `None` if the beacon pool is already being drained.
    pub fn drain_beacon<P: Protocol>(
        &self,
        pool: &dyn BlockPool<Block = P::BeaconBlock>,
        chain_manager: &dyn ChainManager<P>,
        metrics: Option<&Metrics>,
    ) -> Option<DrainReport> {
        let _guard = self.beacon_guard.try_lock()?;

        Some(insert_in_order(
            ChainKind::Beacon,
            pool.pop_validated_run(),
            |block| chain_manager.insert_beacon_block(block, true),
            metrics,
        ))
    }

    /// Returns `None` if the shard pool is already being drained or the shard id is invalid.
    pub fn drain_shard<P: Protocol>(
        &self,
        shard_id: ShardId,
        pool: &dyn BlockPool<Block = P::ShardBlock>,
        chain_manager: &dyn ChainManager<P>,
        metrics: Option<&Metrics>,
    ) -> Option<DrainReport> {
        let _guard = self.shard_guards.get(usize::from(shard_id))?.try_lock()?;

        Some(insert_in_order(
            ChainKind::Shard(shard_id),
            pool.pop_validated_run(),
            |block| chain_manager.insert_shard_block(block, true),
            metrics,
        ))
    }
}

fn insert_in_order<B: Block>(
    chain: ChainKind,
    mut blocks: Vec<B>,
    insert: impl Fn(B) -> Result<()>,
    metrics: Option<&Metrics>,
) -> DrainReport {
    let mut report = DrainReport {
        chain,
        inserted: 0,
        last_inserted_height: None,
        failure: None,
    };

    if blocks.is_empty() {
        return report;
    }

    let timer = metrics.and_then(|metrics| {
        prometheus_metrics::start_chain_timer(&metrics.pool_drain_times, chain)
    });

    blocks.sort_by_key(Block::height);

    for block in blocks {
        let height = block.height();

        if let Err(error) = insert(block) {
            logging::warn_with_peers!(
                "failed to insert pooled {chain} block at height {height}: {error:?}",
            );

            if let Some(metrics) = metrics {
                metrics.register_insertion_failure(chain);
            }

            report.failure = Some(InsertionFailure::new(chain, height, error));

            break;
        }

        report.inserted += 1;
        report.last_inserted_height = Some(height);
    }

    if report.inserted == 0 {
        prometheus_metrics::stop_and_discard(timer);
    } else {
        prometheus_metrics::stop_and_record(timer);
    }

    if let Some(metrics) = metrics {
        metrics.register_inserted_blocks(chain, report.inserted);
    }

    features::log!(
        LogPoolDrains,
        "inserted {} pooled {chain} blocks (last height: {:?})",
        report.inserted,
        report.last_inserted_height,
    );

    report
}
