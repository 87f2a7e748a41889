use core::{
    fmt::Display,
    sync::atomic::{AtomicBool, Ordering},
};

use log::info;
use parse_display::{Display, FromStr};
use variant_count::VariantCount;

static FEATURES: [AtomicBool; Feature::VARIANT_COUNT] =
    [const { AtomicBool::new(false) }; Feature::VARIANT_COUNT];

/// Diagnostics that are too noisy to be logged unconditionally.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, FromStr, VariantCount)]
pub enum Feature {
    DebugPeerStates,
    LogClosestState,
    LogPoolDrains,
    LogSyncRequests,
}

impl Feature {
    const ORDERING: Ordering = Ordering::SeqCst;

    #[inline]
    #[must_use]
    pub fn is_enabled(self) -> bool {
        FEATURES[self as usize].load(Self::ORDERING)
    }

    #[inline]
    pub fn enable(self) {
        FEATURES[self as usize].store(true, Self::ORDERING)
    }

    #[inline]
    pub fn disable(self) {
        FEATURES[self as usize].store(false, Self::ORDERING)
    }

    pub fn log(self, message: impl Display) {
        info!("[{self}] {message}");
    }
}

#[macro_export]
macro_rules! log {
    ($feature: ident, $($message: tt)+) => {{
        let feature = $crate::Feature::$feature;
        if feature.is_enabled() {
            feature.log(format_args!($($message)+))
        }
    }};
}
