use core::time::Duration;
use std::time::Instant;

use cached::{Cached as _, SizedCache};
use itertools::Itertools as _;
use types::{
    nonstandard::ChainKind,
    primitives::{Height, H256},
};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum RequestTarget {
    ByHash(H256),
    ByHeight(Height),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RequestKey {
    pub chain: ChainKind,
    pub target: RequestTarget,
}

impl RequestKey {
    pub const fn by_hash(chain: ChainKind, hash: H256) -> Self {
        Self {
            chain,
            target: RequestTarget::ByHash(hash),
        }
    }

    pub const fn by_height(chain: ChainKind, height: Height) -> Self {
        Self {
            chain,
            target: RequestTarget::ByHeight(height),
        }
    }
}

/// Heights and hashes requested from peers that have not been answered yet.
///
/// A key requested at `T` blocks new requests for it until `T + ttl`.
/// Entries are never removed on response. Responses advance pools and canonical
/// state, which stops the key from being requested again.
///
/// When full, registering a key evicts the least recently used one. Evicted keys
/// that had not expired yet are counted so the caller can report them.
pub struct InFlightRequests {
    requests: SizedCache<RequestKey, Instant>,
    capacity: usize,
    ttl: Duration,
    live_evictions: usize,
}

impl InFlightRequests {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);

        Self {
            requests: SizedCache::with_size(capacity),
            capacity,
            ttl,
            live_evictions: 0,
        }
    }

    pub fn prune_expired(&mut self, now: Instant) {
        let expired = self
            .requests
            .key_order()
            .zip(self.requests.value_order())
            .filter(|(_, requested_at)| self.is_expired(**requested_at, now))
            .map(|(key, _)| *key)
            .collect_vec();

        for key in expired {
            self.requests.cache_remove(&key);
        }
    }

    pub fn is_in_flight(&mut self, key: &RequestKey, now: Instant) -> bool {
        let ttl = self.ttl;

        self.requests
            .cache_get(key)
            .is_some_and(|requested_at| now < *requested_at + ttl)
    }

    pub fn register(&mut self, key: RequestKey, now: Instant) {
        self.requests.cache_remove(&key);

        let evicts_live_request = self.requests.cache_size() >= self.capacity
            && self
                .requests
                .value_order()
                .last()
                .is_some_and(|requested_at| !self.is_expired(*requested_at, now));

        if evicts_live_request {
            self.live_evictions += 1;
        }

        self.requests.cache_set(key, now);
    }

    /// Number of unexpired keys evicted since the last call.
    pub fn take_live_evictions(&mut self) -> usize {
        core::mem::take(&mut self.live_evictions)
    }

    pub fn len(&self) -> usize {
        self.requests.cache_size()
    }

    fn is_expired(&self, requested_at: Instant, now: Instant) -> bool {
        now >= requested_at + self.ttl
    }
}
