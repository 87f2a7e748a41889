use core::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display as StrumDisplay, EnumString, IntoStaticStr};

use crate::primitives::ShardId;

/// The four kinds of block the node synchronizes.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, IntoStaticStr, Deserialize, Serialize,
)]
#[strum(serialize_all = "snake_case")]
pub enum ChainKind {
    Beacon,
    Shard(ShardId),
    ShardToBeacon(ShardId),
    CrossShard { from: ShardId, to: ShardId },
}

impl Display for ChainKind {
    fn fmt(&self, formatter: &mut Formatter) -> FmtResult {
        match self {
            Self::Beacon => write!(formatter, "beacon"),
            Self::Shard(shard_id) => write!(formatter, "shard {shard_id}"),
            Self::ShardToBeacon(shard_id) => write!(formatter, "shard {shard_id} to beacon"),
            Self::CrossShard { from, to } => write!(formatter, "cross shard {from} to {to}"),
        }
    }
}

impl ChainKind {
    /// Metric label. Shard ids are left out to keep label cardinality fixed.
    #[must_use]
    pub fn label(self) -> &'static str {
        self.into()
    }

    #[must_use]
    pub const fn shard_ids(self) -> (Option<ShardId>, Option<ShardId>) {
        match self {
            Self::Beacon => (None, None),
            Self::Shard(shard_id) | Self::ShardToBeacon(shard_id) => (Some(shard_id), None),
            Self::CrossShard { from, to } => (Some(from), Some(to)),
        }
    }
}

#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Debug,
    AsRefStr,
    StrumDisplay,
    EnumString,
    Deserialize,
    Serialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum NodeMode {
    #[default]
    Auto,
    Beacon,
    Shard,
    Relay,
}

impl NodeMode {
    #[must_use]
    pub const fn participates_in_beacon(self) -> bool {
        matches!(self, Self::Auto | Self::Beacon)
    }

    #[must_use]
    pub const fn participates_in_shard(self) -> bool {
        matches!(self, Self::Auto | Self::Shard)
    }
}

/// Role of the local key as seen from the beacon chain.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub enum BeaconRole {
    Proposer,
    Validator,
    /// Member of the committee of the given shard.
    Shard(ShardId),
    #[default]
    Observer,
}

impl BeaconRole {
    #[must_use]
    pub const fn is_beacon_committee_member(self) -> bool {
        matches!(self, Self::Proposer | Self::Validator)
    }

    #[must_use]
    pub const fn assigned_shard(self) -> Option<ShardId> {
        match self {
            Self::Shard(shard_id) => Some(shard_id),
            _ => None,
        }
    }
}

/// Role of the local key inside a shard committee.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub enum CommitteeRole {
    Proposer,
    Validator,
    #[default]
    Observer,
}

impl CommitteeRole {
    #[must_use]
    pub const fn is_committee_member(self) -> bool {
        matches!(self, Self::Proposer | Self::Validator)
    }
}

/// Consensus layer the node currently takes part in.
#[derive(Clone, Copy, PartialEq, Eq, Debug, StrumDisplay, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Beacon,
    Shard,
    Observer,
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(ChainKind::Beacon => "beacon")]
    #[test_case(ChainKind::Shard(3) => "shard")]
    #[test_case(ChainKind::ShardToBeacon(3) => "shard_to_beacon")]
    #[test_case(ChainKind::CrossShard { from: 1, to: 2 } => "cross_shard")]
    fn chain_kind_label_omits_shard_ids(kind: ChainKind) -> &'static str {
        kind.label()
    }

    #[test]
    fn chain_kind_display_includes_shard_ids() {
        assert_eq!(
            ChainKind::CrossShard { from: 1, to: 2 }.to_string(),
            "cross shard 1 to 2",
        );
    }

    #[test_case("auto" => NodeMode::Auto)]
    #[test_case("BEACON" => NodeMode::Beacon)]
    #[test_case("shard" => NodeMode::Shard)]
    #[test_case("relay" => NodeMode::Relay)]
    fn node_mode_parses_case_insensitively(input: &str) -> NodeMode {
        input.parse().expect("test inputs are valid node modes")
    }

    #[test]
    fn only_auto_and_beacon_modes_participate_in_beacon() {
        assert!(NodeMode::Auto.participates_in_beacon());
        assert!(NodeMode::Beacon.participates_in_beacon());
        assert!(!NodeMode::Shard.participates_in_beacon());
        assert!(!NodeMode::Relay.participates_in_beacon());
    }
}
