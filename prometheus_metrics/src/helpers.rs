use log::warn;
use prometheus::{Histogram, HistogramTimer, HistogramVec};
use types::nonstandard::ChainKind;

/// Starts a timer in the histogram labelled with `chain`.
///
/// Returns `None` if the label set is rejected so callers can carry on without timing.
pub fn start_chain_timer(histogram_vec: &HistogramVec, chain: ChainKind) -> Option<HistogramTimer> {
    match histogram_vec
        .get_metric_with_label_values(&[chain.label()])
        .as_ref()
        .map(Histogram::start_timer)
    {
        Ok(timer) => Some(timer),
        Err(error) => {
            warn!("unable to start {chain} timer: {error}");
            None
        }
    }
}

pub fn stop_and_record(timer: Option<HistogramTimer>) {
    if let Some(timer) = timer {
        timer.stop_and_record();
    }
}

// Drains that were skipped because another one was running are not timed.
pub fn stop_and_discard(timer: Option<HistogramTimer>) {
    if let Some(timer) = timer {
        timer.stop_and_discard();
    }
}
