use core::time::Duration;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Instant,
};

use anyhow::{anyhow, bail, Result};
use futures::{channel::mpsc::UnboundedReceiver, FutureExt as _, StreamExt as _};
use parking_lot::Mutex;
use types::{
    consts::shard_ids,
    containers::ChainState,
    nonstandard::{BeaconRole, ChainKind, CommitteeRole},
    primitives::{Height, PublicKey, Round, ShardId, H256},
};

use crate::{
    messages::SyncToNetwork,
    traits::{Block, BlockPool, ChainManager, Collaborators, PendingBlockPool, Protocol, RoleOracle},
};

pub struct FakeProtocol;

impl Protocol for FakeProtocol {
    type PeerId = u32;
    type BeaconBlock = FakeBlock;
    type ShardBlock = FakeBlock;
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FakeBlock {
    pub chain: ChainKind,
    pub height: Height,
}

impl Block for FakeBlock {
    fn height(&self) -> Height {
        self.height
    }

    fn hash(&self) -> H256 {
        H256::from_low_u64_be(self.height)
    }
}

#[derive(Default)]
pub struct FakeBlockPool {
    valid_heights: Mutex<Vec<Height>>,
    validated_run: Mutex<Vec<FakeBlock>>,
    keep_blocks_after_pop: Mutex<bool>,
}

impl FakeBlockPool {
    pub fn set_valid_heights(&self, heights: impl IntoIterator<Item = Height>) {
        *self.valid_heights.lock() = heights.into_iter().collect();
    }

    pub fn push_validated(&self, chain: ChainKind, heights: impl IntoIterator<Item = Height>) {
        self.validated_run
            .lock()
            .extend(heights.into_iter().map(|height| FakeBlock { chain, height }));
    }

    pub fn keep_blocks_after_pop(&self) {
        *self.keep_blocks_after_pop.lock() = true;
    }
}

impl BlockPool for FakeBlockPool {
    type Block = FakeBlock;

    fn valid_heights(&self) -> Vec<Height> {
        self.valid_heights.lock().clone()
    }

    fn pop_validated_run(&self) -> Vec<FakeBlock> {
        let mut validated_run = self.validated_run.lock();

        if *self.keep_blocks_after_pop.lock() {
            validated_run.clone()
        } else {
            core::mem::take(&mut *validated_run)
        }
    }

    fn contains_block(&self, block_hash: H256) -> bool {
        self.valid_heights
            .lock()
            .iter()
            .any(|height| H256::from_low_u64_be(*height) == block_hash)
    }
}

#[derive(Default)]
pub struct FakePendingPool {
    pending_heights: Mutex<BTreeMap<ShardId, Vec<Height>>>,
}

impl FakePendingPool {
    pub fn set_pending_heights(&self, shard_id: ShardId, heights: impl IntoIterator<Item = Height>) {
        self.pending_heights
            .lock()
            .insert(shard_id, heights.into_iter().collect());
    }
}

impl PendingBlockPool for FakePendingPool {
    fn valid_pending_heights(&self) -> BTreeMap<ShardId, Vec<Height>> {
        self.pending_heights.lock().clone()
    }

    fn contains_block(&self, block_hash: H256) -> bool {
        self.pending_heights
            .lock()
            .values()
            .flatten()
            .any(|height| H256::from_low_u64_be(*height) == block_hash)
    }
}

#[derive(Default)]
struct InsertLog {
    inserted: BTreeMap<ChainKind, Vec<Height>>,
    active: BTreeMap<ChainKind, usize>,
    max_active: BTreeMap<ChainKind, usize>,
}

pub struct FakeChainManager {
    beacon_height: Mutex<Height>,
    shard_heights: Mutex<BTreeMap<ShardId, Height>>,
    beacon_view_of_shards: Mutex<BTreeMap<ShardId, Height>>,
    active_shards: Mutex<ShardId>,
    failing: Mutex<BTreeSet<(ChainKind, Height)>>,
    insert_delay: Mutex<Duration>,
    stalled: Mutex<BTreeSet<ChainKind>>,
    // A failing chain waits for another chain to insert before failing.
    failure_waits_for: Mutex<Option<ChainKind>>,
    failure_saw_other_chain: Mutex<Option<bool>>,
    log: Mutex<InsertLog>,
}

impl Default for FakeChainManager {
    fn default() -> Self {
        Self {
            beacon_height: Mutex::new(0),
            shard_heights: Mutex::new(BTreeMap::new()),
            beacon_view_of_shards: Mutex::new(BTreeMap::new()),
            active_shards: Mutex::new(4),
            failing: Mutex::new(BTreeSet::new()),
            insert_delay: Mutex::new(Duration::ZERO),
            stalled: Mutex::new(BTreeSet::new()),
            failure_waits_for: Mutex::new(None),
            failure_saw_other_chain: Mutex::new(None),
            log: Mutex::new(InsertLog::default()),
        }
    }
}

impl FakeChainManager {
    pub fn set_beacon_height(&self, height: Height) {
        *self.beacon_height.lock() = height;
    }

    pub fn set_shard_height(&self, shard_id: ShardId, height: Height) {
        self.shard_heights.lock().insert(shard_id, height);
    }

    pub fn set_beacon_view_of_shard(&self, shard_id: ShardId, height: Height) {
        self.beacon_view_of_shards.lock().insert(shard_id, height);
    }

    pub fn set_active_shards(&self, active_shards: ShardId) {
        *self.active_shards.lock() = active_shards;
    }

    pub fn fail_at(&self, chain: ChainKind, height: Height) {
        self.failing.lock().insert((chain, height));
    }

    pub fn set_insert_delay(&self, delay: Duration) {
        *self.insert_delay.lock() = delay;
    }

    /// Inserts into `chain` block until [`Self::release_inserts`] is called.
    pub fn stall_inserts(&self, chain: ChainKind) {
        self.stalled.lock().insert(chain);
    }

    pub fn release_inserts(&self, chain: ChainKind) {
        self.stalled.lock().remove(&chain);
    }

    pub fn make_failures_wait_for(&self, chain: ChainKind) {
        *self.failure_waits_for.lock() = Some(chain);
    }

    /// Whether the awaited chain inserted a block while the failing insert was in progress.
    pub fn failure_saw_other_chain(&self) -> Option<bool> {
        *self.failure_saw_other_chain.lock()
    }

    pub fn beacon_height(&self) -> Height {
        *self.beacon_height.lock()
    }

    pub fn shard_height(&self, shard_id: ShardId) -> Height {
        self.shard_heights
            .lock()
            .get(&shard_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn inserted(&self, chain: ChainKind) -> Vec<Height> {
        self.log
            .lock()
            .inserted
            .get(&chain)
            .cloned()
            .unwrap_or_default()
    }

    pub fn max_concurrent_inserts(&self, chain: ChainKind) -> usize {
        self.log
            .lock()
            .max_active
            .get(&chain)
            .copied()
            .unwrap_or_default()
    }

    fn insert(&self, block: FakeBlock) -> Result<()> {
        let FakeBlock { chain, height } = block;

        {
            let mut log = self.log.lock();
            let active = log.active.entry(chain).or_default();
            *active += 1;
            let active = *active;
            let max_active = log.max_active.entry(chain).or_default();
            *max_active = (*max_active).max(active);
        }

        self.wait_while_stalled(chain);

        let delay = *self.insert_delay.lock();

        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let result = if self.failing.lock().contains(&(chain, height)) {
            self.wait_for_other_chain();
            Err(anyhow!("{chain} block at height {height} is invalid"))
        } else {
            self.apply(chain, height)
        };

        if let Some(active) = self.log.lock().active.get_mut(&chain) {
            *active -= 1;
        }

        result
    }

    fn apply(&self, chain: ChainKind, height: Height) -> Result<()> {
        match chain {
            ChainKind::Beacon => self.set_beacon_height(height),
            ChainKind::Shard(shard_id) => self.set_shard_height(shard_id, height),
            ChainKind::ShardToBeacon(_) | ChainKind::CrossShard { .. } => {
                bail!("{chain} blocks are not inserted into canonical state")
            }
        }

        self.log.lock().inserted.entry(chain).or_default().push(height);

        Ok(())
    }

    fn wait_while_stalled(&self, chain: ChainKind) {
        let deadline = Instant::now() + Duration::from_secs(5);

        while Instant::now() < deadline && self.stalled.lock().contains(&chain) {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn wait_for_other_chain(&self) {
        let Some(other) = *self.failure_waits_for.lock() else {
            return;
        };

        let deadline = Instant::now() + Duration::from_secs(5);

        while Instant::now() < deadline && self.inserted(other).is_empty() {
            std::thread::sleep(Duration::from_millis(1));
        }

        *self.failure_saw_other_chain.lock() = Some(!self.inserted(other).is_empty());
    }
}

impl ChainManager<FakeProtocol> for FakeChainManager {
    fn beacon_state(&self) -> ChainState {
        ChainState::at_height(self.beacon_height())
    }

    fn shard_state(&self, shard_id: ShardId) -> ChainState {
        ChainState::at_height(self.shard_height(shard_id))
    }

    fn best_height_of_shard(&self, shard_id: ShardId) -> Height {
        self.beacon_view_of_shards
            .lock()
            .get(&shard_id)
            .copied()
            .unwrap_or_default()
    }

    fn active_shards(&self) -> ShardId {
        *self.active_shards.lock()
    }

    fn beacon_round(&self) -> Round {
        1
    }

    fn shard_round(&self, _shard_id: ShardId) -> Round {
        1
    }

    fn insert_beacon_block(&self, block: FakeBlock, _from_pool: bool) -> Result<()> {
        self.insert(block)
    }

    fn insert_shard_block(&self, block: FakeBlock, _from_pool: bool) -> Result<()> {
        self.insert(block)
    }
}

#[derive(Default)]
pub struct FakeRoleOracle {
    beacon_role: Mutex<BeaconRole>,
    shard_role: Mutex<CommitteeRole>,
}

impl FakeRoleOracle {
    pub fn set_roles(&self, beacon_role: BeaconRole, shard_role: CommitteeRole) {
        *self.beacon_role.lock() = beacon_role;
        *self.shard_role.lock() = shard_role;
    }
}

impl RoleOracle for FakeRoleOracle {
    fn beacon_role(&self, _public_key: &PublicKey, _round: Round) -> BeaconRole {
        *self.beacon_role.lock()
    }

    fn shard_role(&self, shard_id: ShardId, _public_key: &PublicKey, _round: Round) -> CommitteeRole {
        match *self.beacon_role.lock() {
            BeaconRole::Shard(assigned) if assigned == shard_id => *self.shard_role.lock(),
            _ => CommitteeRole::Observer,
        }
    }
}

pub struct FakeNode {
    pub chain_manager: Arc<FakeChainManager>,
    pub role_oracle: Arc<FakeRoleOracle>,
    pub beacon_pool: Arc<FakeBlockPool>,
    pub shard_pools: BTreeMap<ShardId, Arc<FakeBlockPool>>,
    pub shard_to_beacon_pool: Arc<FakePendingPool>,
    pub cross_shard_pools: BTreeMap<ShardId, Arc<FakePendingPool>>,
}

impl Default for FakeNode {
    fn default() -> Self {
        Self {
            chain_manager: Arc::default(),
            role_oracle: Arc::default(),
            beacon_pool: Arc::default(),
            shard_pools: shard_ids().map(|shard_id| (shard_id, Arc::default())).collect(),
            shard_to_beacon_pool: Arc::default(),
            cross_shard_pools: shard_ids().map(|shard_id| (shard_id, Arc::default())).collect(),
        }
    }
}

impl FakeNode {
    pub fn shard_pool(&self, shard_id: ShardId) -> &Arc<FakeBlockPool> {
        &self.shard_pools[&shard_id]
    }

    pub fn cross_shard_pool(&self, destination: ShardId) -> &Arc<FakePendingPool> {
        &self.cross_shard_pools[&destination]
    }

    pub fn collaborators(&self) -> Collaborators<FakeProtocol> {
        Collaborators {
            chain_manager: Arc::<FakeChainManager>::clone(&self.chain_manager),
            role_oracle: Arc::<FakeRoleOracle>::clone(&self.role_oracle),
            beacon_pool: Arc::<FakeBlockPool>::clone(&self.beacon_pool),
            shard_pools: self
                .shard_pools
                .iter()
                .map(|(shard_id, pool)| {
                    let pool: Arc<dyn BlockPool<Block = FakeBlock>> = Arc::<FakeBlockPool>::clone(pool);
                    (*shard_id, pool)
                })
                .collect(),
            shard_to_beacon_pool: Arc::<FakePendingPool>::clone(&self.shard_to_beacon_pool),
            cross_shard_pools: self
                .cross_shard_pools
                .iter()
                .map(|(shard_id, pool)| {
                    let pool: Arc<dyn PendingBlockPool> = Arc::<FakePendingPool>::clone(pool);
                    (*shard_id, pool)
                })
                .collect(),
        }
    }
}

/// Messages sent so far. Does not wait for new ones.
pub fn received_messages<I>(rx: &mut UnboundedReceiver<SyncToNetwork<I>>) -> Vec<SyncToNetwork<I>> {
    core::iter::from_fn(|| rx.next().now_or_never().flatten()).collect()
}
