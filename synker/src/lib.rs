pub use crate::{
    config::SyncConfig,
    error::{Error, InsertionFailure},
    messages::SyncToNetwork,
    pool_drainer::DrainReport,
    synker::Synker,
    traits::{
        Block, BlockPool, ChainManager, Collaborators, PendingBlockPool, Protocol, RoleOracle,
    },
};

mod closest_state;
mod config;
mod error;
mod in_flight_requests;
mod messages;
mod participation;
mod peer_states;
mod pool_drainer;
mod pool_heights;
mod request_scheduler;
mod synker;
mod traits;

#[cfg(test)]
mod fakes;
