pub use crate::{
    helpers::{start_chain_timer, stop_and_discard, stop_and_record},
    metrics::{Metrics, RequestType},
};

mod helpers;
mod metrics;
