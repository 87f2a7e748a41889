use core::{future::Future, time::Duration};
use std::{collections::BTreeMap, sync::Arc};

use futures::{channel::mpsc::UnboundedSender, StreamExt as _};
use itertools::Itertools as _;
use log::debug;
use parking_lot::{Mutex, RwLock};
use prometheus_metrics::Metrics;
use tokio::{sync::watch, task::JoinHandle};
use tokio_stream::wrappers::IntervalStream;
use types::{
    consts::{is_valid_shard_id, shard_ids, MAX_SHARD_COUNT},
    containers::{LocalChainState, PeerReportedState},
    nonstandard::ChainKind,
    primitives::{Height, ShardId, H256},
};

use crate::{
    closest_state::{ClosestChainState, LocalChains, Readiness},
    config::SyncConfig,
    error::Error,
    in_flight_requests::InFlightRequests,
    messages::SyncToNetwork,
    participation::{resolve_participation, Participation},
    peer_states::PeerStateTable,
    pool_drainer::{DrainReport, PoolDrainer},
    pool_heights::PoolHeightView,
    request_scheduler::RequestScheduler,
    traits::{Collaborators, Protocol},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum SyncReason {
    Relay,
    Assigned,
    Requested,
}

struct Status {
    syncing_shards: BTreeMap<ShardId, SyncReason>,
    in_flight: InFlightRequests,
}

#[derive(Default)]
struct LatestFlags {
    beacon: bool,
    shards: BTreeMap<ShardId, bool>,
}

// Locks are always taken in the order `status`, `peer_states`, `pool_heights`.
// `latest` is only held for single reads and writes.
struct Shared<P: Protocol> {
    config: SyncConfig,
    collaborators: Collaborators<P>,
    sync_to_network_tx: UnboundedSender<SyncToNetwork<P::PeerId>>,
    metrics: Option<Arc<Metrics>>,
    status: Mutex<Status>,
    peer_states: Mutex<PeerStateTable<P::PeerId>>,
    pool_heights: Mutex<PoolHeightView>,
    latest: RwLock<LatestFlags>,
    drainer: PoolDrainer,
}

struct RunningTasks {
    stop_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Keeps the beacon chain and the shards of interest in sync with peers.
///
/// While running, three timers drive it: local state broadcasts, pool drains and
/// resolution cycles. Every operation can also be invoked directly.
pub struct Synker<P: Protocol> {
    shared: Arc<Shared<P>>,
    running: Mutex<Option<RunningTasks>>,
    stopping: Mutex<Vec<JoinHandle<()>>>,
}

impl<P: Protocol> Synker<P> {
    #[must_use]
    pub fn new(
        config: SyncConfig,
        collaborators: Collaborators<P>,
        sync_to_network_tx: UnboundedSender<SyncToNetwork<P::PeerId>>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let status = Status {
            syncing_shards: BTreeMap::new(),
            in_flight: InFlightRequests::new(
                config.in_flight_cache_capacity,
                config.request_timeout,
            ),
        };

        let drainer = PoolDrainer::new(config.drain_min_interval);

        let shared = Shared {
            config,
            collaborators,
            sync_to_network_tx,
            metrics,
            status: Mutex::new(status),
            peer_states: Mutex::default(),
            pool_heights: Mutex::default(),
            latest: RwLock::default(),
            drainer,
        };

        Self {
            shared: Arc::new(shared),
            running: Mutex::new(None),
            stopping: Mutex::new(vec![]),
        }
    }

    /// Starts syncing relay shards and spawns the timer tasks. Does nothing if already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut running = self.running.lock();

        if running.is_some() {
            return;
        }

        self.shared.start_relay_shards();

        let (stop_tx, stop_rx) = watch::channel(false);
        let config = &self.shared.config;

        let broadcast = {
            let shared = Arc::clone(&self.shared);
            spawn_periodic(stop_rx.clone(), config.broadcast_interval, move || {
                shared.broadcast_local_state();
                core::future::ready(())
            })
        };

        // Drains are detached so a slow insert only holds up its own chain.
        // A chain still being drained skips later ticks until its guard is released.
        let drain = {
            let shared = Arc::clone(&self.shared);
            spawn_periodic(stop_rx.clone(), config.pool_drain_interval, move || {
                drop(Shared::spawn_drains(&shared));
                core::future::ready(())
            })
        };

        let update = {
            let shared = Arc::clone(&self.shared);
            spawn_periodic(stop_rx, config.state_update_interval, move || {
                shared.update_state();
                core::future::ready(())
            })
        };

        debug!("synker started");

        *running = Some(RunningTasks {
            stop_tx,
            handles: vec![broadcast, drain, update],
        });
    }

    /// Signals the timer tasks to exit. They finish their current tick first.
    pub fn stop(&self) {
        let Some(RunningTasks { stop_tx, handles }) = self.running.lock().take() else {
            return;
        };

        if stop_tx.send(true).is_err() {
            debug!("synker tasks exited before being stopped");
        }

        self.stopping.lock().extend(handles);

        debug!("synker stopped");
    }

    pub async fn wait_for_shutdown(&self) {
        let handles = core::mem::take(&mut *self.stopping.lock());

        for handle in handles {
            if let Err(error) = handle.await {
                logging::error_with_peers!("synker task failed: {error:?}");
            }
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn start_syncing_shard(&self, shard_id: ShardId) -> Result<(), Error> {
        if !is_valid_shard_id(shard_id) {
            return Err(Error::InvalidShard { shard_id });
        }

        let mut status = self.shared.status.lock();

        if status.syncing_shards.contains_key(&shard_id) {
            return Err(Error::AlreadySyncing { shard_id });
        }

        status
            .syncing_shards
            .insert(shard_id, SyncReason::Requested);

        logging::info_with_peers!("started syncing shard {shard_id}");

        Ok(())
    }

    pub fn stop_syncing_shard(&self, shard_id: ShardId) -> Result<(), Error> {
        let participation = self.shared.participation();

        if participation.requires_shard(shard_id) {
            return Err(Error::CannotStop { shard_id });
        }

        let mut status = self.shared.status.lock();

        if !status.syncing_shards.contains_key(&shard_id) {
            return Err(Error::NotSyncing { shard_id });
        }

        if self.shared.config.is_relay_shard(shard_id) {
            return Err(Error::NotRelayed { shard_id });
        }

        status.syncing_shards.remove(&shard_id);
        self.shared.latest.write().shards.remove(&shard_id);

        logging::info_with_peers!("stopped syncing shard {shard_id}");

        Ok(())
    }

    /// Stops syncing every shard that is neither a relay shard nor required by the node's role.
    pub fn stop_syncing_unnecessary_shards(&self) {
        let participation = self.shared.participation();
        let mut status = self.shared.status.lock();
        let mut latest = self.shared.latest.write();

        status.syncing_shards.retain(|shard_id, reason| {
            let keep = *reason == SyncReason::Relay || participation.requires_shard(*shard_id);

            if !keep {
                latest.shards.remove(shard_id);
                debug!("stopped syncing unnecessary shard {shard_id}");
            }

            keep
        });
    }

    /// Reads the readiness flags computed by the last resolution cycle that had peers.
    #[must_use]
    pub fn is_latest(&self, is_shard: bool, shard_id: ShardId) -> bool {
        let latest = self.shared.latest.read();

        if is_shard {
            latest.shards.get(&shard_id).copied().unwrap_or_default()
        } else {
            latest.beacon
        }
    }

    #[must_use]
    pub fn current_syncing_shards(&self) -> Vec<ShardId> {
        self.shared
            .status
            .lock()
            .syncing_shards
            .keys()
            .copied()
            .collect()
    }

    pub fn on_peer_state(&self, peer_id: P::PeerId, state: PeerReportedState) {
        features::log!(DebugPeerStates, "peer {peer_id} reported {state:?}");

        self.shared.peer_states.lock().insert(peer_id, state);
    }

    pub fn update_state(&self) {
        self.shared.update_state();
    }

    pub async fn drain_pools(&self) -> Vec<DrainReport> {
        Shared::drain_pools(&self.shared).await
    }

    /// Requests blocks whose hashes are already known, such as blocks that failed validation.
    pub fn sync_blocks_by_hash(
        &self,
        chain: ChainKind,
        hashes: impl IntoIterator<Item = H256>,
        from_pool: bool,
        peer_id: P::PeerId,
    ) {
        self.shared
            .sync_blocks_by_hash(chain, hashes, from_pool, peer_id);
    }

    pub fn broadcast_local_state(&self) {
        self.shared.broadcast_local_state();
    }
}

impl<P: Protocol> Drop for Synker<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<P: Protocol> Shared<P> {
    fn participation(&self) -> Participation {
        let Some(public_key) = self.config.public_key.as_deref() else {
            return Participation::OBSERVER;
        };

        let Collaborators {
            chain_manager,
            role_oracle,
            ..
        } = &self.collaborators;

        let beacon_role = role_oracle.beacon_role(public_key, chain_manager.beacon_round());

        let shard_role = beacon_role
            .assigned_shard()
            .map(|shard_id| {
                role_oracle.shard_role(shard_id, public_key, chain_manager.shard_round(shard_id))
            })
            .unwrap_or_default();

        resolve_participation(self.config.node_mode, beacon_role, shard_role)
    }

    fn start_relay_shards(&self) {
        let active_shards = self.collaborators.chain_manager.active_shards();
        let mut status = self.status.lock();

        for shard_id in &self.config.relay_shards {
            if *shard_id < active_shards && is_valid_shard_id(*shard_id) {
                status
                    .syncing_shards
                    .entry(*shard_id)
                    .or_insert(SyncReason::Relay);
            }
        }
    }

    fn adjust_to_role(status: &mut Status, participation: Participation) {
        status.syncing_shards.retain(|shard_id, reason| {
            *reason != SyncReason::Assigned || participation.requires_shard(*shard_id)
        });

        if let Some(shard_id) = participation.assigned_shard {
            status
                .syncing_shards
                .entry(shard_id)
                .or_insert(SyncReason::Assigned);
        }
    }

    #[expect(clippy::too_many_lines)]
    fn update_state(&self) {
        let timer = self
            .metrics
            .as_ref()
            .map(|metrics| metrics.sync_cycle_times.start_timer());

        let participation = self.participation();
        let now = tokio::time::Instant::now().into_std();
        let chain_manager = &self.collaborators.chain_manager;

        let mut status = self.status.lock();
        let mut peer_states = self.peer_states.lock();
        let mut pool_heights = self.pool_heights.lock();

        Self::adjust_to_role(&mut status, participation);

        pool_heights.refresh(
            &self.collaborators,
            status.syncing_shards.keys().copied(),
            participation,
        );

        status.in_flight.prune_expired(now);

        let mut beacon_view_of_shards = [0; MAX_SHARD_COUNT];

        for (height, shard_id) in beacon_view_of_shards.iter_mut().zip(shard_ids()) {
            *height = chain_manager.best_height_of_shard(shard_id);
        }

        let local = LocalChains {
            beacon: chain_manager.beacon_state(),
            shards: status
                .syncing_shards
                .keys()
                .map(|shard_id| (*shard_id, chain_manager.shard_state(*shard_id)))
                .collect(),
            beacon_view_of_shards,
        };

        let closest = ClosestChainState::resolve(&local, &peer_states, participation);

        if let Some(readiness) = closest.readiness(&local, peer_states.len()) {
            self.set_latest(readiness);
        }

        let is_beacon_latest = self.latest.read().beacon;

        let Status {
            syncing_shards,
            in_flight,
        } = &mut *status;

        let mut scheduler = RequestScheduler {
            in_flight,
            pool_heights: &pool_heights,
            sync_to_network_tx: &self.sync_to_network_tx,
            metrics: self.metrics.as_deref(),
            max_blocks_per_request: self.config.max_blocks_per_request,
            max_blocks_per_cycle: self.config.max_blocks_per_cycle,
            now,
        };

        scheduler.request_range(
            ChainKind::Beacon,
            local.beacon.height,
            closest.beacon.height,
            peer_states
                .iter()
                .map(|(peer_id, state)| (peer_id, state.beacon_state.height)),
        );

        if is_beacon_latest && participation.track_shard_to_beacon {
            for (shard_id, peers) in &closest.shard_to_beacon_blocks {
                for (peer_id, heights) in peers {
                    scheduler.request_specific_heights(
                        ChainKind::ShardToBeacon(*shard_id),
                        heights.iter().copied(),
                        *peer_id,
                    );
                }
            }

            for (shard_id, target) in &closest.shard_to_beacon {
                scheduler.request_range(
                    ChainKind::ShardToBeacon(*shard_id),
                    local.beacon_view_of_shard(*shard_id),
                    target.height,
                    peers_reporting_shard(&peer_states, *shard_id),
                );
            }
        }

        if let Some(destination) = participation.track_cross_shard {
            if is_beacon_latest && self.is_shard_latest(destination) {
                for (source, peers) in &closest.cross_shard_blocks {
                    for (peer_id, heights) in peers {
                        scheduler.request_specific_heights(
                            ChainKind::CrossShard {
                                from: *source,
                                to: destination,
                            },
                            heights.iter().copied(),
                            *peer_id,
                        );
                    }
                }
            }
        }

        for (shard_id, local_shard) in &local.shards {
            let target = closest
                .shards
                .get(shard_id)
                .map_or(local_shard.height, |target| target.height);

            scheduler.request_range(
                ChainKind::Shard(*shard_id),
                local_shard.height,
                target,
                peers_reporting_shard(&peer_states, *shard_id),
            );
        }

        SyncToNetwork::UpdateConsensusState {
            layer: participation.layer,
            public_key: self.config.public_key.clone(),
        }
        .send(&self.sync_to_network_tx);

        self.report_live_evictions(in_flight);

        logging::PEER_LOG_METRICS.set_reporting_peer_count(peer_states.len());
        logging::PEER_LOG_METRICS.set_syncing_shard_count(syncing_shards.len());

        if let Some(metrics) = self.metrics.as_ref() {
            metrics.set_reporting_peers(peer_states.len());
            metrics.set_syncing_shards(syncing_shards.len());
            metrics.set_in_flight_requests(in_flight.len());
            metrics.set_collection_length("synker", "peer_states", peer_states.len());
            metrics.set_collection_length("synker", "syncing_shards", syncing_shards.len());
        }

        logging::debug_with_peers!(
            "resolution cycle done (beacon: {} -> {}, latest: {is_beacon_latest})",
            local.beacon.height,
            closest.beacon.height,
        );

        peer_states.clear();

        if let Some(timer) = timer {
            timer.observe_duration();
        }
    }

    fn set_latest(&self, readiness: Readiness) {
        let Readiness { beacon, shards } = readiness;
        let mut latest = self.latest.write();

        latest.beacon = beacon;
        latest.shards = shards;
    }

    fn is_shard_latest(&self, shard_id: ShardId) -> bool {
        self.latest
            .read()
            .shards
            .get(&shard_id)
            .copied()
            .unwrap_or_default()
    }

    async fn drain_pools(shared: &Arc<Self>) -> Vec<DrainReport> {
        let mut reports = vec![];

        for handle in Self::spawn_drains(shared) {
            match handle.await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(error) => logging::error_with_peers!("pool drain task failed: {error:?}"),
            }
        }

        reports
    }

    /// Starts one blocking drain for the beacon chain and one for every syncing shard.
    fn spawn_drains(shared: &Arc<Self>) -> Vec<JoinHandle<Option<DrainReport>>> {
        if !shared
            .drainer
            .try_begin_tick(tokio::time::Instant::now().into_std())
        {
            return vec![];
        }

        let syncing_shards = shared
            .status
            .lock()
            .syncing_shards
            .keys()
            .copied()
            .collect_vec();

        let mut handles = Vec::with_capacity(syncing_shards.len() + 1);

        handles.push({
            let shared = Arc::clone(shared);

            tokio::task::spawn_blocking(move || {
                let Collaborators {
                    chain_manager,
                    beacon_pool,
                    ..
                } = &shared.collaborators;

                shared.drainer.drain_beacon(
                    beacon_pool.as_ref(),
                    chain_manager.as_ref(),
                    shared.metrics.as_deref(),
                )
            })
        });

        for shard_id in syncing_shards {
            if !shared.collaborators.shard_pools.contains_key(&shard_id) {
                debug!("no pool for shard {shard_id}");
                continue;
            }

            let shared = Arc::clone(shared);

            handles.push(tokio::task::spawn_blocking(move || {
                let Collaborators {
                    chain_manager,
                    shard_pools,
                    ..
                } = &shared.collaborators;

                let pool = shard_pools.get(&shard_id)?;

                shared.drainer.drain_shard(
                    shard_id,
                    pool.as_ref(),
                    chain_manager.as_ref(),
                    shared.metrics.as_deref(),
                )
            }));
        }

        handles
    }

    fn sync_blocks_by_hash(
        &self,
        chain: ChainKind,
        hashes: impl IntoIterator<Item = H256>,
        from_pool: bool,
        peer_id: P::PeerId,
    ) {
        let now = tokio::time::Instant::now().into_std();
        let mut status = self.status.lock();
        let pool_heights = self.pool_heights.lock();

        let mut scheduler = RequestScheduler {
            in_flight: &mut status.in_flight,
            pool_heights: &pool_heights,
            sync_to_network_tx: &self.sync_to_network_tx,
            metrics: self.metrics.as_deref(),
            max_blocks_per_request: self.config.max_blocks_per_request,
            max_blocks_per_cycle: self.config.max_blocks_per_cycle,
            now,
        };

        scheduler.request_hashes(chain, hashes, from_pool, peer_id, |hash| {
            self.is_pooled(chain, hash)
        });

        self.report_live_evictions(&mut status.in_flight);
    }

    fn report_live_evictions(&self, in_flight: &mut InFlightRequests) {
        let eviction_count = in_flight.take_live_evictions();

        if eviction_count == 0 {
            return;
        }

        logging::warn_with_peers!(
            "in-flight request cache is full; evicted {eviction_count} unexpired requests \
             that may be sent again (capacity: {})",
            self.config.in_flight_cache_capacity,
        );

        if let Some(metrics) = self.metrics.as_ref() {
            metrics.register_in_flight_live_evictions(eviction_count);
        }
    }

    fn is_pooled(&self, chain: ChainKind, block_hash: H256) -> bool {
        let Collaborators {
            beacon_pool,
            shard_pools,
            shard_to_beacon_pool,
            cross_shard_pools,
            ..
        } = &self.collaborators;

        match chain {
            ChainKind::Beacon => beacon_pool.contains_block(block_hash),
            ChainKind::Shard(shard_id) => shard_pools
                .get(&shard_id)
                .is_some_and(|pool| pool.contains_block(block_hash)),
            ChainKind::ShardToBeacon(_) => shard_to_beacon_pool.contains_block(block_hash),
            ChainKind::CrossShard { to, .. } => cross_shard_pools
                .get(&to)
                .is_some_and(|pool| pool.contains_block(block_hash)),
        }
    }

    fn broadcast_local_state(&self) {
        let participation = self.participation();
        let chain_manager = &self.collaborators.chain_manager;
        let status = self.status.lock();

        let shard_states = status
            .syncing_shards
            .keys()
            .map(|shard_id| (*shard_id, chain_manager.shard_state(*shard_id)))
            .collect();

        let pool_heights = {
            let mut pool_heights = self.pool_heights.lock();

            pool_heights.refresh(
                &self.collaborators,
                status.syncing_shards.keys().copied(),
                participation,
            );

            pool_heights.snapshot()
        };

        drop(status);

        SyncToNetwork::BroadcastLocalState(LocalChainState {
            beacon_state: chain_manager.beacon_state(),
            shard_states,
            pool_heights,
        })
        .send(&self.sync_to_network_tx);
    }
}

fn peers_reporting_shard<I: Ord + Copy>(
    peer_states: &PeerStateTable<I>,
    shard_id: ShardId,
) -> impl Iterator<Item = (I, Height)> + '_ {
    peer_states
        .iter()
        .filter_map(move |(peer_id, state)| Some((peer_id, state.shard_height(shard_id)?)))
}

fn spawn_periodic<F, T>(
    mut stop_rx: watch::Receiver<bool>,
    period: Duration,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> T + Send + 'static,
    T: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut interval = IntervalStream::new(tokio::time::interval_at(start, period)).fuse();

        loop {
            tokio::select! {
                _ = interval.select_next_some() => tick().await,
                _ = stop_rx.changed() => break,
            }
        }
    })
}
