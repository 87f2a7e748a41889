use anyhow::Result;
use log::warn;
use prometheus::{
    histogram_opts, opts, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Registry,
};
use types::nonstandard::ChainKind;

#[derive(Clone, Copy, Debug)]
pub enum RequestType {
    ByHash,
    ByRange,
    BySpecificHeights,
}

impl RequestType {
    const fn label(self) -> &'static str {
        match self {
            Self::ByHash => "by_hash",
            Self::ByRange => "by_range",
            Self::BySpecificHeights => "by_specific_heights",
        }
    }
}

#[derive(Debug)]
pub struct Metrics {
    // Requests
    sync_requests: IntCounterVec,
    sync_requested_blocks: IntCounterVec,
    sync_skipped_blocks: IntCounterVec,

    // Pool draining
    pool_inserted_blocks: IntCounterVec,
    pool_insertion_failures: IntCounterVec,
    pub pool_drain_times: HistogramVec,

    // Resolution cycle
    pub sync_cycle_times: Histogram,
    reporting_peers: IntGauge,
    syncing_shards: IntGauge,
    in_flight_requests: IntGauge,
    in_flight_live_evictions: IntCounter,

    // Collection Lengths
    collection_lengths: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        Ok(Self {
            // Requests
            sync_requests: IntCounterVec::new(
                opts!("SYNC_REQUESTS", "Number of block requests sent to peers"),
                &["chain", "request_type"],
            )?,

            sync_requested_blocks: IntCounterVec::new(
                opts!(
                    "SYNC_REQUESTED_BLOCKS",
                    "Number of heights or hashes included in block requests",
                ),
                &["chain"],
            )?,

            sync_skipped_blocks: IntCounterVec::new(
                opts!(
                    "SYNC_SKIPPED_BLOCKS",
                    "Number of heights or hashes left out of requests because they were \
                     already in flight or already pooled",
                ),
                &["chain"],
            )?,

            // Pool draining
            pool_inserted_blocks: IntCounterVec::new(
                opts!(
                    "POOL_INSERTED_BLOCKS",
                    "Number of pooled blocks inserted into canonical chain state",
                ),
                &["chain"],
            )?,

            pool_insertion_failures: IntCounterVec::new(
                opts!(
                    "POOL_INSERTION_FAILURES",
                    "Number of pooled blocks rejected by the chain manager",
                ),
                &["chain"],
            )?,

            pool_drain_times: HistogramVec::new(
                histogram_opts!("POOL_DRAIN_TIMES", "Time spent draining a pool"),
                &["chain"],
            )?,

            // Resolution cycle
            sync_cycle_times: Histogram::with_opts(histogram_opts!(
                "SYNC_CYCLE_TIMES",
                "Time spent resolving peer states and scheduling requests",
            ))?,

            reporting_peers: IntGauge::new(
                "SYNC_REPORTING_PEERS",
                "Number of peers that reported their state in the last cycle",
            )?,

            syncing_shards: IntGauge::new("SYNC_SYNCING_SHARDS", "Number of shards being synced")?,

            in_flight_requests: IntGauge::new(
                "SYNC_IN_FLIGHT_REQUESTS",
                "Number of requested heights or hashes awaiting a response",
            )?,

            in_flight_live_evictions: IntCounter::new(
                "SYNC_IN_FLIGHT_LIVE_EVICTIONS",
                "Number of unexpired in-flight requests evicted because the cache was full",
            )?,

            // Collection Lengths
            collection_lengths: IntGaugeVec::new(
                opts!("COLLECTION_LENGTHS", "Number of items in each collection"),
                &["type", "name"],
            )?,
        })
    }

    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.sync_requests.clone()))?;
        registry.register(Box::new(self.sync_requested_blocks.clone()))?;
        registry.register(Box::new(self.sync_skipped_blocks.clone()))?;
        registry.register(Box::new(self.pool_inserted_blocks.clone()))?;
        registry.register(Box::new(self.pool_insertion_failures.clone()))?;
        registry.register(Box::new(self.pool_drain_times.clone()))?;
        registry.register(Box::new(self.sync_cycle_times.clone()))?;
        registry.register(Box::new(self.reporting_peers.clone()))?;
        registry.register(Box::new(self.syncing_shards.clone()))?;
        registry.register(Box::new(self.in_flight_requests.clone()))?;
        registry.register(Box::new(self.in_flight_live_evictions.clone()))?;
        registry.register(Box::new(self.collection_lengths.clone()))?;

        Ok(())
    }

    pub fn register_with_default_metrics(&self) -> Result<()> {
        self.register(prometheus::default_registry())
    }

    // Requests
    pub fn register_sync_request(
        &self,
        chain: ChainKind,
        request_type: RequestType,
        block_count: usize,
    ) {
        match self
            .sync_requests
            .get_metric_with_label_values(&[chain.label(), request_type.label()])
        {
            Ok(counter) => counter.inc(),
            Err(error) => warn!("unable to register sync request for {chain}: {error:?}"),
        }

        Self::inc_by(&self.sync_requested_blocks, chain, block_count);
    }

    pub fn register_skipped_blocks(&self, chain: ChainKind, block_count: usize) {
        Self::inc_by(&self.sync_skipped_blocks, chain, block_count);
    }

    // Pool draining
    pub fn register_inserted_blocks(&self, chain: ChainKind, block_count: usize) {
        Self::inc_by(&self.pool_inserted_blocks, chain, block_count);
    }

    pub fn register_insertion_failure(&self, chain: ChainKind) {
        Self::inc_by(&self.pool_insertion_failures, chain, 1);
    }

    // Resolution cycle
    pub fn set_reporting_peers(&self, peer_count: usize) {
        self.reporting_peers.set(saturating_i64(peer_count))
    }

    pub fn set_syncing_shards(&self, shard_count: usize) {
        self.syncing_shards.set(saturating_i64(shard_count))
    }

    pub fn set_in_flight_requests(&self, request_count: usize) {
        self.in_flight_requests.set(saturating_i64(request_count))
    }

    pub fn register_in_flight_live_evictions(&self, eviction_count: usize) {
        self.in_flight_live_evictions
            .inc_by(u64::try_from(eviction_count).unwrap_or(u64::MAX));
    }

    // Collection Lengths
    pub fn set_collection_length(&self, typename: &str, collection_name: &str, value: usize) {
        match self
            .collection_lengths
            .get_metric_with_label_values(&[typename, collection_name])
        {
            Ok(gauge) => gauge.set(saturating_i64(value)),
            Err(error) => warn!(
                "unable to set collection length for {typename}.{collection_name}: {error:?}",
            ),
        }
    }

    fn inc_by(counter_vec: &IntCounterVec, chain: ChainKind, count: usize) {
        match counter_vec.get_metric_with_label_values(&[chain.label()]) {
            Ok(counter) => counter.inc_by(u64::try_from(count).unwrap_or(u64::MAX)),
            Err(error) => warn!("unable to update counter for {chain}: {error:?}"),
        }
    }
}

fn saturating_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_counters_are_labelled_by_chain_kind() -> Result<()> {
        let registry = Registry::new();
        let metrics = Metrics::new()?;

        metrics.register(&registry)?;
        metrics.register_sync_request(ChainKind::Shard(3), RequestType::ByRange, 5);
        metrics.register_sync_request(ChainKind::Shard(1), RequestType::ByRange, 2);
        metrics.register_sync_request(ChainKind::Beacon, RequestType::ByHash, 1);

        let shard_blocks = metrics
            .sync_requested_blocks
            .get_metric_with_label_values(&["shard"])?;

        let shard_range_requests = metrics
            .sync_requests
            .get_metric_with_label_values(&["shard", "by_range"])?;

        assert_eq!(shard_blocks.get(), 7);
        assert_eq!(shard_range_requests.get(), 2);
        assert!(!registry.gather().is_empty());

        Ok(())
    }

    #[test]
    fn live_evictions_accumulate() -> Result<()> {
        let metrics = Metrics::new()?;

        metrics.register_in_flight_live_evictions(3);
        metrics.register_in_flight_live_evictions(0);
        metrics.register_in_flight_live_evictions(2);

        assert_eq!(metrics.in_flight_live_evictions.get(), 5);

        Ok(())
    }

    #[test]
    fn registering_twice_fails() -> Result<()> {
        let registry = Registry::new();
        let metrics = Metrics::new()?;

        metrics.register(&registry)?;

        assert!(metrics.register(&registry).is_err());

        Ok(())
    }
}
