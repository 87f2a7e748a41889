use std::collections::BTreeMap;

use types::containers::PeerReportedState;

/// Chain states announced by peers since the last resolution cycle.
///
/// Peers that stop announcing drop out after one cycle because the table is
/// cleared at the end of every cycle.
pub struct PeerStateTable<I> {
    states: BTreeMap<I, PeerReportedState>,
}

impl<I> Default for PeerStateTable<I> {
    fn default() -> Self {
        Self {
            states: BTreeMap::new(),
        }
    }
}

impl<I: Ord + Copy> PeerStateTable<I> {
    pub fn insert(&mut self, peer_id: I, state: PeerReportedState) {
        self.states.insert(peer_id, state);
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Peers in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (I, &PeerReportedState)> {
        self.states.iter().map(|(peer_id, state)| (*peer_id, state))
    }
}
