use futures::channel::mpsc::UnboundedSender;
use log::debug;
use types::{
    containers::LocalChainState,
    nonstandard::{ChainKind, Layer},
    primitives::{Height, H256},
};

/// Fire-and-forget requests for the network layer.
///
/// Nothing waits for a response. Lost requests are retried once their in-flight entries expire.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum SyncToNetwork<I> {
    RequestBlocksByHash {
        chain: ChainKind,
        hashes: Vec<H256>,
        from_pool: bool,
        peer_id: I,
    },
    /// Inclusive height range.
    RequestBlocksByRange {
        chain: ChainKind,
        start: Height,
        end: Height,
        peer_id: I,
    },
    RequestBlocksBySpecificHeights {
        chain: ChainKind,
        heights: Vec<Height>,
        from_pool: bool,
        peer_id: I,
    },
    BroadcastLocalState(LocalChainState),
    UpdateConsensusState {
        layer: Layer,
        public_key: Option<String>,
    },
}

impl<I> SyncToNetwork<I> {
    pub fn send(self, tx: &UnboundedSender<Self>) {
        if tx.unbounded_send(self).is_err() {
            debug!("send to network failed because the receiver was dropped");
        }
    }
}
