use core::{fmt::Display, ops::RangeInclusive};
use std::time::Instant;

use futures::channel::mpsc::UnboundedSender;
use itertools::Itertools as _;
use prometheus_metrics::{Metrics, RequestType};
use types::{
    consts::GENESIS_HEIGHT,
    nonstandard::ChainKind,
    primitives::{Height, H256},
};

use crate::{
    in_flight_requests::{InFlightRequests, RequestKey},
    messages::SyncToNetwork,
    pool_heights::PoolHeightView,
};

/// Turns sync targets into deduplicated block requests for one resolution cycle.
pub struct RequestScheduler<'cycle, I> {
    pub in_flight: &'cycle mut InFlightRequests,
    pub pool_heights: &'cycle PoolHeightView,
    pub sync_to_network_tx: &'cycle UnboundedSender<SyncToNetwork<I>>,
    pub metrics: Option<&'cycle Metrics>,
    pub max_blocks_per_request: Height,
    pub max_blocks_per_cycle: Height,
    pub now: Instant,
}

impl<I: Copy + Display> RequestScheduler<'_, I> {
    /// Requests heights above `local_height` up to `target_height` from capable peers.
    ///
    /// `peers` yields each peer with the height it reported for `chain`. Peers are assigned
    /// consecutive batches in iteration order until the target or the peers run out.
    pub fn request_range(
        &mut self,
        chain: ChainKind,
        local_height: Height,
        target_height: Height,
        peers: impl IntoIterator<Item = (I, Height)>,
    ) {
        let max_blocks_per_request = self.max_blocks_per_request.max(1);
        let max_blocks_per_cycle = self.max_blocks_per_cycle.max(1);

        let end = target_height.min(local_height.saturating_add(max_blocks_per_cycle));
        let mut cursor = local_height.saturating_add(1);

        for (peer_id, peer_height) in peers {
            if cursor > end {
                break;
            }

            if peer_height < cursor {
                continue;
            }

            let batch_end = end.min(cursor.saturating_add(max_blocks_per_request - 1));

            self.request_heights_in_range(chain, cursor..=batch_end, peer_id);

            cursor = batch_end.saturating_add(1);
        }
    }

    /// Requests `hashes` from `peer_id` in one message, skipping pooled and in-flight blocks.
    pub fn request_hashes(
        &mut self,
        chain: ChainKind,
        hashes: impl IntoIterator<Item = H256>,
        from_pool: bool,
        peer_id: I,
        is_pooled: impl Fn(H256) -> bool,
    ) {
        let mut skipped = 0;

        let hashes = hashes
            .into_iter()
            .unique()
            .filter(|hash| {
                let needed = !is_pooled(*hash)
                    && !self
                        .in_flight
                        .is_in_flight(&RequestKey::by_hash(chain, *hash), self.now);

                skipped += usize::from(!needed);
                needed
            })
            .collect_vec();

        self.register_skipped(chain, skipped);

        if hashes.is_empty() {
            return;
        }

        for hash in &hashes {
            self.in_flight
                .register(RequestKey::by_hash(chain, *hash), self.now);
        }

        features::log!(
            LogSyncRequests,
            "requesting {} {chain} blocks by hash from peer {peer_id}",
            hashes.len(),
        );

        self.register_request(chain, RequestType::ByHash, hashes.len());

        SyncToNetwork::RequestBlocksByHash {
            chain,
            hashes,
            from_pool,
            peer_id,
        }
        .send(self.sync_to_network_tx);
    }

    /// Requests out-of-order heights of shard-to-beacon or cross-shard blocks.
    pub fn request_specific_heights(
        &mut self,
        chain: ChainKind,
        heights: impl IntoIterator<Item = Height>,
        peer_id: I,
    ) {
        let mut skipped = 0;

        let heights = heights
            .into_iter()
            .filter(|height| *height != GENESIS_HEIGHT)
            .sorted_unstable()
            .dedup()
            .filter(|height| {
                let needed = self.is_needed(chain, *height);
                skipped += usize::from(!needed);
                needed
            })
            .collect_vec();

        self.register_skipped(chain, skipped);

        if heights.is_empty() {
            return;
        }

        for height in &heights {
            self.in_flight
                .register(RequestKey::by_height(chain, *height), self.now);
        }

        features::log!(
            LogSyncRequests,
            "requesting {chain} blocks at heights {heights:?} from peer {peer_id}",
        );

        self.register_request(chain, RequestType::BySpecificHeights, heights.len());

        SyncToNetwork::RequestBlocksBySpecificHeights {
            chain,
            heights,
            from_pool: true,
            peer_id,
        }
        .send(self.sync_to_network_tx);
    }

    fn request_heights_in_range(
        &mut self,
        chain: ChainKind,
        heights: RangeInclusive<Height>,
        peer_id: I,
    ) {
        let candidate_count = heights.clone().count();

        let needed = heights
            .filter(|height| self.is_needed(chain, *height))
            .collect_vec();

        self.register_skipped(chain, candidate_count - needed.len());

        for height in &needed {
            self.in_flight
                .register(RequestKey::by_height(chain, *height), self.now);
        }

        let runs = needed
            .into_iter()
            .map(|height| (height, height))
            .coalesce(|(start, end), (next_start, next_end)| {
                if end + 1 == next_start {
                    Ok((start, next_end))
                } else {
                    Err(((start, end), (next_start, next_end)))
                }
            });

        for (start, end) in runs {
            features::log!(
                LogSyncRequests,
                "requesting {chain} blocks {start}..={end} from peer {peer_id}",
            );

            self.register_request(chain, RequestType::ByRange, run_length(start, end));

            SyncToNetwork::RequestBlocksByRange {
                chain,
                start,
                end,
                peer_id,
            }
            .send(self.sync_to_network_tx);
        }
    }

    fn is_needed(&mut self, chain: ChainKind, height: Height) -> bool {
        !self.pool_heights.contains(chain, height)
            && !self
                .in_flight
                .is_in_flight(&RequestKey::by_height(chain, height), self.now)
    }

    fn register_request(&self, chain: ChainKind, request_type: RequestType, block_count: usize) {
        if let Some(metrics) = self.metrics {
            metrics.register_sync_request(chain, request_type, block_count);
        }
    }

    fn register_skipped(&self, chain: ChainKind, block_count: usize) {
        if block_count == 0 {
            return;
        }

        if let Some(metrics) = self.metrics {
            metrics.register_skipped_blocks(chain, block_count);
        }
    }
}

fn run_length(start: Height, end: Height) -> usize {
    usize::try_from(end - start + 1).unwrap_or(usize::MAX)
}
