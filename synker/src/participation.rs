use types::{
    nonstandard::{BeaconRole, CommitteeRole, Layer, NodeMode},
    primitives::ShardId,
};

/// What the node has to track in the current round, derived once per cycle from its roles.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Participation {
    pub layer: Layer,
    /// Shard whose committee the node belongs to. Its synchronization cannot be stopped.
    pub assigned_shard: Option<ShardId>,
    pub track_shard_to_beacon: bool,
    /// Destination shard whose cross-shard pool is tracked.
    pub track_cross_shard: Option<ShardId>,
}

impl Participation {
    pub const OBSERVER: Self = Self {
        layer: Layer::Observer,
        assigned_shard: None,
        track_shard_to_beacon: false,
        track_cross_shard: None,
    };

    #[must_use]
    pub fn requires_shard(self, shard_id: ShardId) -> bool {
        self.assigned_shard == Some(shard_id)
    }
}

#[must_use]
pub fn resolve_participation(
    node_mode: NodeMode,
    beacon_role: BeaconRole,
    shard_role: CommitteeRole,
) -> Participation {
    match beacon_role {
        BeaconRole::Proposer | BeaconRole::Validator => Participation {
            layer: Layer::Beacon,
            assigned_shard: None,
            track_shard_to_beacon: node_mode.participates_in_beacon(),
            track_cross_shard: None,
        },
        BeaconRole::Shard(shard_id) => {
            let participates = node_mode.participates_in_shard();

            Participation {
                layer: Layer::Shard,
                assigned_shard: participates.then_some(shard_id),
                track_shard_to_beacon: false,
                track_cross_shard: (participates && shard_role.is_committee_member())
                    .then_some(shard_id),
            }
        }
        BeaconRole::Observer => Participation::OBSERVER,
    }
}
