use core::sync::atomic::{AtomicUsize, Ordering};

use derive_more::Display;

pub static PEER_LOG_METRICS: PeerLogMetrics = PeerLogMetrics::new();

/// Sync context prepended to log messages emitted through the macros below.
#[derive(Display, Debug)]
#[display("peers: {reporting_peer_count:?}, syncing shards: {syncing_shard_count:?}")]
pub struct PeerLogMetrics {
    reporting_peer_count: AtomicUsize,
    syncing_shard_count: AtomicUsize,
}

impl PeerLogMetrics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            reporting_peer_count: AtomicUsize::new(0),
            syncing_shard_count: AtomicUsize::new(0),
        }
    }

    pub fn set_reporting_peer_count(&self, reporting_peer_count: usize) {
        self.reporting_peer_count
            .store(reporting_peer_count, Ordering::Relaxed)
    }

    pub fn set_syncing_shard_count(&self, syncing_shard_count: usize) {
        self.syncing_shard_count
            .store(syncing_shard_count, Ordering::Relaxed)
    }
}

impl Default for PeerLogMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[macro_export]
macro_rules! info_with_peers {
    ($($arg:tt)*) => {
        ::tracing::info!("[{}] {}", $crate::PEER_LOG_METRICS, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! debug_with_peers {
    ($($arg:tt)*) => {
        ::tracing::debug!("[{}] {}", $crate::PEER_LOG_METRICS, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! warn_with_peers {
    ($($arg:tt)*) => {
        ::tracing::warn!("[{}] {}", $crate::PEER_LOG_METRICS, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! error_with_peers {
    ($($arg:tt)*) => {
        ::tracing::error!("[{}] {}", $crate::PEER_LOG_METRICS, format_args!($($arg)*));
    };
}
