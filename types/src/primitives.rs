pub use ethereum_types::H256;

pub type Height = u64;
pub type Round = u64;
pub type ShardId = u8;

// Base58 encoded committee key of the local node.
pub type PublicKey = str;
